//! Format decoded trees as indented text (CLI output, logs).

use crate::value::{DecodeOutcome, DecodedNode, NodeStatus};

/// One node and its subtree, two spaces per level.
pub fn node_to_dump(node: &DecodedNode, indent: usize) -> String {
    let mut lines = Vec::new();
    push_node(node, indent, &mut lines);
    lines.join("\n")
}

fn push_node(node: &DecodedNode, indent: usize, lines: &mut Vec<String>) {
    let pad = "  ".repeat(indent);
    let marker = match node.status {
        NodeStatus::Ok => "",
        NodeStatus::Skipped { .. } => " [skipped]",
        NodeStatus::Error(_) => " [error]",
    };
    lines.push(format!("{}{}: {}{}", pad, node.label, node.display, marker));
    if let Some(d) = node.diagnostic() {
        lines.push(format!("{}  ! {}", pad, d));
    }
    for child in &node.children {
        push_node(child, indent + 1, lines);
    }
}

/// Sibling trees, one after another.
pub fn tree_to_dump(nodes: &[DecodedNode], indent: usize) -> String {
    let mut lines = Vec::new();
    for node in nodes {
        push_node(node, indent, &mut lines);
    }
    lines.join("\n")
}

/// Header line naming the rule, followed by the tree or the failure.
pub fn outcome_to_dump(rule: &str, outcome: &DecodeOutcome) -> String {
    match outcome {
        DecodeOutcome::NoMatch => format!("{}: no match", rule),
        DecodeOutcome::Failed(d) => format!("{}: decode failed\n  ! {}", rule, d),
        DecodeOutcome::Decoded(nodes) if nodes.is_empty() => format!("{}: (no fields)", rule),
        DecodeOutcome::Decoded(nodes) => format!("{}:\n{}", rule, tree_to_dump(nodes, 1)),
    }
}

/// `label: display` of a node without its children.
pub fn node_summary_line(node: &DecodedNode) -> String {
    format!("{}: {}", node.label, node.display)
}
