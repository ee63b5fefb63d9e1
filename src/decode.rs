//! Field decoder: walks a rule's field tree against one matched line.
//!
//! A decode pass keeps three pieces of state:
//!
//! - a **cursor** into the current buffer (buffer-sourced fields consume bytes
//!   from it in declaration order; nested `fields`/`match` get a fresh buffer),
//! - the **value map** of integers bound so far, keyed by dotted field path,
//!   which `{name}` terms in offsets/widths read from,
//! - the active **regex match**, used by capture-sourced fields at any depth.
//!
//! Failures never abort the pass. A field whose offset/width names an unbound
//! variable becomes a *skipped* node; any other problem becomes an *error*
//! node carrying a [`DecodeDiagnostic`]. Siblings and ancestors keep decoding.

use crate::ast::{
    BufferEncoding, CaptureRef, DisplayFormat, FieldSource, FieldSpec, RuleDefinition, ValueExpr,
};
use crate::codec::{decode_bytes, format_number, numeric_value, preview_bytes};
use crate::expr::{evaluate, ExprError, Values};
use crate::value::{DecodeDiagnostic, DecodeOutcome, DecodedNode};
use regex::{Captures, Regex};

const PREVIEW_LIMIT: usize = 32;

/// The regex match that capture-sourced fields read from.
struct Scope<'a, 'h> {
    regex: &'a Regex,
    caps: &'a Captures<'h>,
}

fn capture_text<'h>(scope: &Scope<'_, 'h>, capture: &CaptureRef) -> Result<&'h str, String> {
    match capture {
        CaptureRef::Index(i) => {
            if *i >= scope.caps.len() {
                return Err(format!("capture group {} does not exist in the pattern", i));
            }
            Ok(scope.caps.get(*i).map_or("", |m| m.as_str()))
        }
        CaptureRef::Name(name) => {
            if !scope
                .regex
                .capture_names()
                .any(|n| n == Some(name.as_str()))
            {
                return Err(format!("capture group '{}' does not exist in the pattern", name));
            }
            Ok(scope.caps.name(name).map_or("", |m| m.as_str()))
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

struct BufferCursor<'b> {
    data: &'b [u8],
    pos: usize,
}

/// Raw bytes of one field before encoding/format handling.
struct RawSlice {
    bytes: Vec<u8>,
    source: String,
    offset: Option<usize>,
    width: Option<usize>,
}

/// State of one decode pass over one rule.
struct DecodePass<'r> {
    rule: &'r str,
    values: Values,
}

impl<'r> DecodePass<'r> {
    fn new(rule: &'r str) -> Self {
        DecodePass {
            rule,
            values: Values::new(),
        }
    }

    fn diagnostic(
        &self,
        path: &str,
        source: &str,
        offset: Option<usize>,
        width: Option<usize>,
        raw: &[u8],
        reason: String,
    ) -> DecodeDiagnostic {
        let diagnostic = DecodeDiagnostic {
            rule: self.rule.to_string(),
            field_path: path.to_string(),
            source: source.to_string(),
            offset,
            width,
            preview: preview_bytes(raw, PREVIEW_LIMIT),
            reason,
        };
        log::warn!("preview decode error: {}", diagnostic);
        diagnostic
    }

    fn fail_slice(&self, field: &FieldSpec, path: &str, raw: &RawSlice, reason: String) -> DecodedNode {
        let d = self.diagnostic(path, &raw.source, raw.offset, raw.width, &raw.bytes, reason);
        DecodedNode::error(&field.name, d)
    }

    fn skip(&self, field: &FieldSpec, path: &str, what: &str, missing: &str) -> DecodedNode {
        log::warn!(
            "preview '{}' field '{}': {} skipped, missing `{}`",
            self.rule,
            path,
            what,
            missing
        );
        DecodedNode::skipped(&field.name, missing)
    }

    fn bind(&mut self, path: &str, value: u64) {
        self.values.insert(path.to_string(), value as i64);
    }

    fn decode_field(
        &mut self,
        field: &FieldSpec,
        cursor: &mut BufferCursor<'_>,
        scope: &Scope<'_, '_>,
        prefix: &str,
    ) -> DecodedNode {
        let path = join_path(prefix, &field.name);
        let raw = match field.source {
            FieldSource::Capture => self.capture_slice(field, scope, &path),
            FieldSource::Buffer => self.buffer_slice(field, cursor, &path),
        };
        match raw {
            Ok(raw) => self.render(field, raw, scope, &path),
            Err(node) => node,
        }
    }

    fn capture_slice(
        &self,
        field: &FieldSpec,
        scope: &Scope<'_, '_>,
        path: &str,
    ) -> Result<RawSlice, DecodedNode> {
        let Some(capture) = &field.capture else {
            let d = self.diagnostic(path, "capture", None, None, &[], "capture not set".to_string());
            return Err(DecodedNode::error(&field.name, d));
        };
        let source = format!("capture {}", capture);
        match capture_text(scope, capture) {
            Ok(text) => Ok(RawSlice {
                bytes: text.as_bytes().to_vec(),
                source,
                offset: None,
                width: None,
            }),
            Err(reason) => {
                let d = self.diagnostic(path, &source, None, None, &[], reason);
                Err(DecodedNode::error(&field.name, d))
            }
        }
    }

    fn buffer_slice(
        &self,
        field: &FieldSpec,
        cursor: &mut BufferCursor<'_>,
        path: &str,
    ) -> Result<RawSlice, DecodedNode> {
        let data = cursor.data;
        let len = data.len();
        let here = &data[cursor.pos.min(len)..];
        let fail = |offset: usize, width: Option<usize>, raw: &[u8], reason: String| {
            let d = self.diagnostic(path, "buffer", Some(offset), width, raw, reason);
            DecodedNode::error(&field.name, d)
        };

        let offset = match evaluate(&field.offset, &self.values) {
            Ok(v) => v,
            Err(ExprError::MissingVariable(name)) => {
                return Err(self.skip(field, path, "offset", &name))
            }
            Err(e) => return Err(fail(cursor.pos, None, here, format!("offset: {}", e))),
        };
        if offset < 0 {
            return Err(fail(cursor.pos, None, here, format!("negative offset {}", offset)));
        }
        let start = match usize::try_from(offset)
            .ok()
            .and_then(|o| cursor.pos.checked_add(o))
            .filter(|&s| s <= len)
        {
            Some(s) => s,
            None => {
                return Err(fail(
                    cursor.pos,
                    None,
                    here,
                    format!(
                        "offset exceeds buffer (cursor {} + offset {} > length {})",
                        cursor.pos, offset, len
                    ),
                ))
            }
        };
        cursor.pos = start;
        let remaining = len - start;
        let rest = &data[start..];

        let width = match &field.width {
            ValueExpr::Unset => remaining as i64,
            expr => match evaluate(expr, &self.values) {
                Ok(w) => w,
                Err(ExprError::MissingVariable(name)) => {
                    return Err(self.skip(field, path, "width", &name))
                }
                Err(e) => return Err(fail(start, None, rest, format!("width: {}", e))),
            },
        };
        if width < 0 {
            return Err(fail(start, None, rest, format!("negative width {}", width)));
        }
        let width = match usize::try_from(width).ok().filter(|&w| w <= remaining) {
            Some(w) => w,
            None => {
                return Err(fail(
                    start,
                    usize::try_from(width).ok(),
                    rest,
                    format!("width {} exceeds remaining {} bytes", width, remaining),
                ))
            }
        };
        cursor.pos = start + width;
        Ok(RawSlice {
            bytes: rest[..width].to_vec(),
            source: "buffer".to_string(),
            offset: Some(start),
            width: Some(width),
        })
    }

    fn render(
        &mut self,
        field: &FieldSpec,
        raw: RawSlice,
        scope: &Scope<'_, '_>,
        path: &str,
    ) -> DecodedNode {
        match field.format {
            DisplayFormat::Fields => {
                let decoded = match decode_bytes(&raw.bytes, field.encoding) {
                    Ok(d) => d.into_owned(),
                    Err(e) => return self.fail_slice(field, path, &raw, e.to_string()),
                };
                let mut node = DecodedNode::ok(&field.name, format!("{} bytes", decoded.len()));
                let mut child_cursor = BufferCursor {
                    data: &decoded,
                    pos: 0,
                };
                node.children = field
                    .children
                    .iter()
                    .map(|child| self.decode_field(child, &mut child_cursor, scope, path))
                    .collect();
                node
            }
            DisplayFormat::Match => {
                let decoded = match decode_bytes(&raw.bytes, field.encoding) {
                    Ok(d) => d.into_owned(),
                    Err(e) => return self.fail_slice(field, path, &raw, e.to_string()),
                };
                let Some(pattern) = &field.pattern else {
                    return self.fail_slice(field, path, &raw, "no nested pattern".to_string());
                };
                let text = String::from_utf8_lossy(&decoded);
                let Some(caps) = pattern.regex().captures(&text) else {
                    return self.fail_slice(
                        field,
                        path,
                        &raw,
                        "nested pattern did not match".to_string(),
                    );
                };
                let nested = Scope {
                    regex: pattern.regex(),
                    caps: &caps,
                };
                let mut node = DecodedNode::ok(&field.name, format!("{} bytes", decoded.len()));
                let mut child_cursor = BufferCursor {
                    data: &decoded,
                    pos: 0,
                };
                node.children = field
                    .children
                    .iter()
                    .map(|child| self.decode_field(child, &mut child_cursor, &nested, path))
                    .collect();
                node
            }
            DisplayFormat::String => match field.encoding {
                BufferEncoding::HexText | BufferEncoding::Base64 => {
                    match decode_bytes(&raw.bytes, field.encoding) {
                        Ok(d) => DecodedNode::ok(&field.name, String::from_utf8_lossy(&d)),
                        Err(e) => self.fail_slice(field, path, &raw, e.to_string()),
                    }
                }
                _ => DecodedNode::ok(&field.name, String::from_utf8_lossy(&raw.bytes)),
            },
            _ => {
                let value = match numeric_value(&raw.bytes, field.encoding, field.endianness) {
                    Ok(v) => v,
                    Err(e) => return self.fail_slice(field, path, &raw, e.to_string()),
                };
                self.bind(path, value);
                let mut node = DecodedNode::ok(&field.name, format_number(value, field));
                if field.format == DisplayFormat::Bitfield {
                    node.children = self.decode_bits(field, value, path);
                }
                node
            }
        }
    }

    /// Bit width of one bit-subfield; unresolved or non-positive widths count as 1.
    fn bit_width(&self, sub: &FieldSpec) -> i64 {
        match evaluate(&sub.width, &self.values) {
            Ok(w) if sub.width.is_set() && w > 0 => w,
            _ => 1,
        }
    }

    fn bitfield_width(&self, field: &FieldSpec) -> i64 {
        match evaluate(&field.width, &self.values) {
            Ok(w) if w > 0 => w,
            _ => field
                .bit_subfields
                .iter()
                .map(|sub| self.bit_width(sub))
                .fold(0i64, i64::saturating_add),
        }
    }

    /// Split `value` into the field's bit-subfields, most significant first.
    fn decode_bits(&mut self, field: &FieldSpec, value: u64, path: &str) -> Vec<DecodedNode> {
        let mut remaining = self.bitfield_width(field);
        let mut nodes = Vec::with_capacity(field.bit_subfields.len());
        for sub in &field.bit_subfields {
            let width = self.bit_width(sub);
            remaining = remaining.saturating_sub(width);
            let mask = if width >= 64 {
                u64::MAX
            } else {
                (1u64 << width) - 1
            };
            let bits = if remaining >= 0 {
                u32::try_from(remaining)
                    .ok()
                    .and_then(|shift| value.checked_shr(shift))
                    .unwrap_or(0)
                    & mask
            } else {
                0
            };
            let sub_path = join_path(path, &sub.name);
            self.bind(&sub_path, bits);
            let mut node = DecodedNode::ok(&sub.name, format_number(bits, sub));
            if sub.format == DisplayFormat::Bitfield && !sub.bit_subfields.is_empty() {
                node.children = self.decode_bits(sub, bits, &sub_path);
            }
            nodes.push(node);
        }
        nodes
    }
}

/// Decode one line against one rule.
///
/// A non-matching line is [`DecodeOutcome::NoMatch`]. If the rule-level buffer
/// (capture, encoding, start offset) cannot be prepared the outcome is
/// [`DecodeOutcome::Failed`]; otherwise every top-level field yields a node.
pub fn decode_line(rule: &RuleDefinition, line: &str) -> DecodeOutcome {
    let regex = rule.pattern.regex();
    let Some(caps) = regex.captures(line) else {
        return DecodeOutcome::NoMatch;
    };
    let scope = Scope { regex, caps: &caps };
    let mut pass = DecodePass::new(&rule.name);

    let (raw, source) = match &rule.buffer_capture {
        Some(capture) => match capture_text(&scope, capture) {
            Ok(text) => (text.as_bytes(), format!("capture {}", capture)),
            Err(reason) => {
                let source = format!("capture {}", capture);
                let d = pass.diagnostic("", &source, None, None, &[], reason);
                return DecodeOutcome::Failed(Box::new(d));
            }
        },
        None => (line.as_bytes(), "line".to_string()),
    };

    let buffer = match decode_bytes(raw, rule.buffer_encoding) {
        Ok(b) => b,
        Err(e) => {
            let d = pass.diagnostic("", &source, None, None, raw, e.to_string());
            return DecodeOutcome::Failed(Box::new(d));
        }
    };

    let start = match evaluate(&rule.start_offset, &pass.values) {
        Ok(v) if v >= 0 && (v as u64) <= buffer.len() as u64 => v as usize,
        Ok(v) => {
            let d = pass.diagnostic(
                "",
                &source,
                None,
                None,
                &buffer,
                format!("start offset {} outside buffer of {} bytes", v, buffer.len()),
            );
            return DecodeOutcome::Failed(Box::new(d));
        }
        Err(e) => {
            let d = pass.diagnostic("", &source, None, None, &buffer, format!("start offset: {}", e));
            return DecodeOutcome::Failed(Box::new(d));
        }
    };

    let mut cursor = BufferCursor {
        data: &buffer,
        pos: start,
    };
    let nodes = rule
        .fields
        .iter()
        .map(|field| pass.decode_field(field, &mut cursor, &scope, ""))
        .collect();
    DecodeOutcome::Decoded(nodes)
}
