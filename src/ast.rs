//! Preview rule definitions: the in-memory form of a previews JSON document.

use regex::Regex;
use std::fmt;

/// How a text or byte buffer is turned into canonical bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEncoding {
    Text,
    HexText,
    Base64,
    BinaryText,
    RawBytes,
}

impl BufferEncoding {
    /// Case-insensitive lookup of a `type` value.
    pub fn from_config(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" => Some(BufferEncoding::Text),
            "hexstring" => Some(BufferEncoding::HexText),
            "base64" => Some(BufferEncoding::Base64),
            "bin" | "binary" => Some(BufferEncoding::BinaryText),
            "bytes" => Some(BufferEncoding::RawBytes),
            _ => None,
        }
    }

    pub fn as_config(self) -> &'static str {
        match self {
            BufferEncoding::Text => "string",
            BufferEncoding::HexText => "hexString",
            BufferEncoding::Base64 => "base64",
            BufferEncoding::BinaryText => "bin",
            BufferEncoding::RawBytes => "bytes",
        }
    }
}

/// How a decoded field is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFormat {
    /// Nested field list over the decoded bytes.
    Fields,
    /// Nested pattern applied to the decoded text; children read its captures.
    Match,
    String,
    Digits,
    Decimal,
    Hex,
    Binary,
    Enum,
    Flags,
    Bitfield,
}

impl DisplayFormat {
    pub fn from_config(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fields" => Some(DisplayFormat::Fields),
            "match" => Some(DisplayFormat::Match),
            "string" => Some(DisplayFormat::String),
            "dig" => Some(DisplayFormat::Digits),
            "dec" => Some(DisplayFormat::Decimal),
            "hex" => Some(DisplayFormat::Hex),
            "bin" => Some(DisplayFormat::Binary),
            "enum" => Some(DisplayFormat::Enum),
            "flags" => Some(DisplayFormat::Flags),
            "bitfield" => Some(DisplayFormat::Bitfield),
            _ => None,
        }
    }

    pub fn as_config(self) -> &'static str {
        match self {
            DisplayFormat::Fields => "fields",
            DisplayFormat::Match => "match",
            DisplayFormat::String => "string",
            DisplayFormat::Digits => "dig",
            DisplayFormat::Decimal => "dec",
            DisplayFormat::Hex => "hex",
            DisplayFormat::Binary => "bin",
            DisplayFormat::Enum => "enum",
            DisplayFormat::Flags => "flags",
            DisplayFormat::Bitfield => "bitfield",
        }
    }

}

/// Where a field's raw data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldSource {
    #[default]
    Buffer,
    Capture,
}

impl FieldSource {
    pub fn from_config(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buffer" => Some(FieldSource::Buffer),
            "capture" => Some(FieldSource::Capture),
            _ => None,
        }
    }

    pub fn as_config(self) -> &'static str {
        match self {
            FieldSource::Buffer => "buffer",
            FieldSource::Capture => "capture",
        }
    }
}

/// Byte order for numeric interpretation of byte slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

impl Endianness {
    pub fn from_config(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "big" => Some(Endianness::Big),
            "little" => Some(Endianness::Little),
            _ => None,
        }
    }

    pub fn as_config(self) -> &'static str {
        match self {
            Endianness::Big => "big",
            Endianness::Little => "little",
        }
    }
}

/// Offset/width expression: unset, an integer literal, or `[sign] term (+|- term)*` text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueExpr {
    #[default]
    Unset,
    Literal(i64),
    Text(String),
}

impl ValueExpr {
    pub fn is_set(&self) -> bool {
        !matches!(self, ValueExpr::Unset)
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueExpr::Unset => f.write_str("<unset>"),
            ValueExpr::Literal(v) => write!(f, "{}", v),
            ValueExpr::Text(t) => f.write_str(t),
        }
    }
}

/// Regex capture group reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureRef {
    /// 1-based group index (0 is the whole match).
    Index(usize),
    Name(String),
}

impl fmt::Display for CaptureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureRef::Index(i) => write!(f, "#{}", i),
            CaptureRef::Name(n) => f.write_str(n),
        }
    }
}

/// Numeric-string key → label, in declaration order. The first key that
/// parses to a given value wins on lookup.
pub type LabelTable = Vec<(String, String)>;

/// A compiled regular expression that remembers its source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Pattern {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// One node of a rule's decode tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub source: FieldSource,
    pub capture: Option<CaptureRef>,
    pub offset: ValueExpr,
    pub width: ValueExpr,
    pub encoding: BufferEncoding,
    pub endianness: Endianness,
    pub format: DisplayFormat,
    pub enum_table: LabelTable,
    pub flag_table: LabelTable,
    /// Nested pattern for [`DisplayFormat::Match`].
    pub pattern: Option<Pattern>,
    pub children: Vec<FieldSpec>,
    pub bit_subfields: Vec<FieldSpec>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        FieldSpec {
            name: name.into(),
            source: FieldSource::Buffer,
            capture: None,
            offset: ValueExpr::Unset,
            width: ValueExpr::Unset,
            encoding: BufferEncoding::RawBytes,
            endianness: Endianness::Big,
            format: DisplayFormat::String,
            enum_table: Vec::new(),
            flag_table: Vec::new(),
            pattern: None,
            children: Vec::new(),
            bit_subfields: Vec::new(),
        }
    }
}

/// A named, regex-gated decoding rule.
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    pub name: String,
    pub pattern: Pattern,
    pub enabled: bool,
    /// Whether `enabled` was stated explicitly (merges keep the old state otherwise).
    pub enabled_explicit: bool,
    pub buffer_capture: Option<CaptureRef>,
    pub start_offset: ValueExpr,
    pub buffer_encoding: BufferEncoding,
    pub format: DisplayFormat,
    pub fields: Vec<FieldSpec>,
}

impl RuleDefinition {
    pub fn new(name: impl Into<String>, pattern: Pattern) -> Self {
        RuleDefinition {
            name: name.into(),
            pattern,
            enabled: true,
            enabled_explicit: false,
            buffer_capture: None,
            start_offset: ValueExpr::Unset,
            buffer_encoding: BufferEncoding::Text,
            format: DisplayFormat::Fields,
            fields: Vec::new(),
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }
}

// `enabled_explicit` records how the rule was written, not what it is.
impl PartialEq for RuleDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.pattern == other.pattern
            && self.enabled == other.enabled
            && self.buffer_capture == other.buffer_capture
            && self.start_offset == other.start_offset
            && self.buffer_encoding == other.buffer_encoding
            && self.format == other.format
            && self.fields == other.fields
    }
}
