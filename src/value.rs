//! Decoded result tree: presentation-agnostic nodes produced by the decoder.

use std::fmt;

/// Everything known about a failed field decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeDiagnostic {
    pub rule: String,
    /// Dotted field path (`parent.child`); empty for rule-level failures.
    pub field_path: String,
    /// Where the data came from, e.g. `buffer` or `capture payload`.
    pub source: String,
    pub offset: Option<usize>,
    pub width: Option<usize>,
    /// Truncated printable-or-hex view of the raw data.
    pub preview: String,
    pub reason: String,
}

impl fmt::Display for DecodeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule '{}'", self.rule)?;
        if !self.field_path.is_empty() {
            write!(f, " field '{}'", self.field_path)?;
        }
        write!(f, " ({}", self.source)?;
        if let Some(offset) = self.offset {
            write!(f, ", offset {}", offset)?;
        }
        if let Some(width) = self.width {
            write!(f, ", width {}", width)?;
        }
        if !self.preview.is_empty() {
            write!(f, ", data {}", self.preview)?;
        }
        write!(f, "): {}", self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Ok,
    /// An offset/width referenced a variable that was never bound.
    Skipped { missing: String },
    Error(Box<DecodeDiagnostic>),
}

/// One row of the decoded tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedNode {
    pub label: String,
    pub display: String,
    pub status: NodeStatus,
    pub children: Vec<DecodedNode>,
}

impl DecodedNode {
    pub fn ok(label: impl Into<String>, display: impl Into<String>) -> Self {
        DecodedNode {
            label: label.into(),
            display: display.into(),
            status: NodeStatus::Ok,
            children: Vec::new(),
        }
    }

    pub fn skipped(label: impl Into<String>, missing: &str) -> Self {
        DecodedNode {
            label: label.into(),
            display: format!("skipped: missing `{}`", missing),
            status: NodeStatus::Skipped {
                missing: missing.to_string(),
            },
            children: Vec::new(),
        }
    }

    pub fn error(label: impl Into<String>, diagnostic: DecodeDiagnostic) -> Self {
        DecodedNode {
            label: label.into(),
            display: format!("decode error: {}", diagnostic.reason),
            status: NodeStatus::Error(Box::new(diagnostic)),
            children: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, NodeStatus::Ok)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, NodeStatus::Error(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, NodeStatus::Skipped { .. })
    }

    pub fn diagnostic(&self) -> Option<&DecodeDiagnostic> {
        match &self.status {
            NodeStatus::Error(d) => Some(d),
            _ => None,
        }
    }

    /// Hover text for presentation layers.
    pub fn tooltip(&self) -> Option<String> {
        match &self.status {
            NodeStatus::Ok => None,
            NodeStatus::Skipped { missing } => {
                Some(format!("value `{}` was not decoded before this field", missing))
            }
            NodeStatus::Error(d) => Some(d.to_string()),
        }
    }

    /// Depth-first search for the first node with this label.
    pub fn find(&self, label: &str) -> Option<&DecodedNode> {
        if self.label == label {
            return Some(self);
        }
        find_in(&self.children, label)
    }
}

/// Depth-first search over a list of sibling trees.
pub fn find_in<'a>(nodes: &'a [DecodedNode], label: &str) -> Option<&'a DecodedNode> {
    nodes.iter().find_map(|n| n.find(label))
}

/// Result of decoding one line against one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The rule's pattern does not match the line.
    NoMatch,
    Decoded(Vec<DecodedNode>),
    /// The rule-level buffer could not be prepared; no fields were decoded.
    Failed(Box<DecodeDiagnostic>),
}

impl DecodeOutcome {
    pub fn nodes(&self) -> &[DecodedNode] {
        match self {
            DecodeOutcome::Decoded(nodes) => nodes,
            _ => &[],
        }
    }

    /// Display text of the first node labelled `label`.
    pub fn display_of(&self, label: &str) -> Option<&str> {
        find_in(self.nodes(), label).map(|n| n.display.as_str())
    }
}
