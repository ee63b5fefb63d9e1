//! # logpreview: declarative log line previews
//!
//! Rules written in JSON pick log lines with a regular expression, take a
//! byte buffer from the line (the whole line or a capture group), and decode
//! that buffer into a tree of named fields for inspection.
//!
//! ## Pipeline
//!
//! - **Parser** ([`parser`]): JSON document → [`RuleDefinition`]s plus
//!   collected errors (rule dropped) and warnings (rule kept).
//! - **Registry** ([`registry`]): owns the rule set, persists every change
//!   through the [`ConfigStore`], finds the first enabled matching rule.
//! - **Decoder** ([`decode`]): walks a rule's fields against one line and
//!   returns a [`DecodedNode`] tree; problems become per-field error or
//!   skipped nodes instead of aborting.
//! - **Expressions** ([`expr`]): `offset`/`width` values such as `{size}-6`
//!   that read earlier fields of the same pass.
//!
//! ## Field types and formats
//!
//! - `type`: `string`, `hexString`, `base64`, `bin`, `bytes`
//! - `format`: `fields` (nested list), `match` (nested regex), `string`,
//!   `dig`, `dec`, `hex`, `bin`, `enum`, `flags`, `bitfield`
//!
//! ## Example rule
//!
//! ```text
//! {"previews": [{
//!   "name": "EHCP",
//!   "regex": "^SRING: 1,48,(?<payload>[0-9A-F]+)$",
//!   "fields": [{
//!     "name": "ehcp", "source": "capture", "capture": "payload",
//!     "type": "hexString", "format": "fields",
//!     "fields": [
//!       {"name": "header", "type": "string", "width": 4},
//!       {"name": "size", "type": "hexString", "format": "dig", "width": 3},
//!       {"name": "checksum", "type": "hexString", "format": "hex",
//!        "offset": "{ehcp.size}-6", "width": 4}
//!     ]
//!   }]
//! }]}
//! ```
//!
//! ## Usage
//!
//! See `tests/integration.rs` for registry, store and decode end to end.

pub mod ast;
pub mod codec;
pub mod decode;
pub mod dump;
pub mod expr;
pub mod parser;
pub mod registry;
pub mod store;
pub mod value;

pub use ast::{
    BufferEncoding, CaptureRef, DisplayFormat, Endianness, FieldSource, FieldSpec, LabelTable,
    Pattern, RuleDefinition, ValueExpr,
};
pub use codec::CodecError;
pub use decode::decode_line;
pub use expr::{evaluate, ExprError, Values};
pub use parser::{parse, parse_file, parse_str, ParseReport};
pub use registry::{ImportResult, LoadSummary, PreviewRegistry, RegistryError, RegistryEvent};
pub use store::{ConfigStore, StoreError};
pub use value::{DecodeDiagnostic, DecodeOutcome, DecodedNode, NodeStatus};
