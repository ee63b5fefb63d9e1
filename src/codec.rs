//! Value codec: turns captured text or sliced bytes into canonical bytes and
//! integers, and renders integers for display.
//!
//! Numeric text follows C conventions (`0x` hex, leading `0` octal, else
//! decimal) with one twist: a token made only of `0`/`1` characters, or
//! prefixed with `0b`, is read as binary.

use crate::ast::{BufferEncoding, DisplayFormat, Endianness, FieldSpec, LabelTable};
use base64::{engine::general_purpose::STANDARD, Engine};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid hex digit '{ch}' at position {position}")]
    InvalidHexDigit { ch: char, position: usize },
    #[error("hex string is empty")]
    EmptyHex,
    #[error("odd number of hex digits ({0}) for a byte decode")]
    OddHexDigits(usize),
    #[error("hex value too large ({0} digits)")]
    HexTooLarge(usize),
    #[error("failed to decode base64: {0}")]
    Base64(String),
    #[error("invalid numeric text '{0}'")]
    InvalidNumber(String),
    #[error("no bytes to interpret as an integer")]
    NoBytes,
}

/// Result of parsing hex digits straight into an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexNumber {
    pub value: u64,
    pub digit_count: usize,
}

fn trim_ascii_whitespace(input: &[u8]) -> &[u8] {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    let end = input
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &input[start..end]
}

/// Hex digits of `input` with whitespace, `_` separators and one leading `0x` removed.
fn normalize_hex(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let trimmed = trim_ascii_whitespace(input);
    let body = match trimmed {
        [b'0', b'x' | b'X', rest @ ..] => rest,
        _ => trimmed,
    };
    let mut digits = Vec::with_capacity(body.len());
    for &b in body {
        if b.is_ascii_whitespace() || b == b'_' {
            continue;
        }
        if b.is_ascii_hexdigit() {
            digits.push(b);
            continue;
        }
        return Err(CodecError::InvalidHexDigit {
            ch: b as char,
            position: digits.len() + 1,
        });
    }
    Ok(digits)
}

fn fold_hex_digits(digits: &[u8]) -> Result<u64, CodecError> {
    if digits.is_empty() {
        return Err(CodecError::EmptyHex);
    }
    if digits.len() > 16 {
        return Err(CodecError::HexTooLarge(digits.len()));
    }
    let mut value = 0u64;
    for (i, &b) in digits.iter().enumerate() {
        let nibble = (b as char).to_digit(16).ok_or(CodecError::InvalidHexDigit {
            ch: b as char,
            position: i + 1,
        })?;
        value = (value << 4) | nibble as u64;
    }
    Ok(value)
}

/// Parse hex text as an unsigned integer. Odd digit counts are accepted and
/// read as if left-padded with a zero nibble (`"042"` is `0x42`, 3 digits).
pub fn parse_hex(input: &[u8]) -> Result<HexNumber, CodecError> {
    let digits = normalize_hex(input)?;
    let value = fold_hex_digits(&digits)?;
    Ok(HexNumber {
        value,
        digit_count: digits.len(),
    })
}

/// Decode hex text into bytes. An even digit count is required; empty input yields no bytes.
pub fn decode_hex_bytes(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let digits = normalize_hex(input)?;
    if digits.len() % 2 != 0 {
        return Err(CodecError::OddHexDigits(digits.len()));
    }
    hex::decode(&digits).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => CodecError::InvalidHexDigit {
            ch: c,
            position: index + 1,
        },
        _ => CodecError::OddHexDigits(digits.len()),
    })
}

/// Decode standard base64 (whitespace ignored). Empty input yields no bytes.
pub fn decode_base64(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cleaned: Vec<u8> = input
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }
    STANDARD
        .decode(&cleaned)
        .map_err(|e| CodecError::Base64(e.to_string()))
}

/// Canonical bytes of `raw` under `encoding`. Text-like encodings pass through.
pub fn decode_bytes(raw: &[u8], encoding: BufferEncoding) -> Result<Cow<'_, [u8]>, CodecError> {
    match encoding {
        BufferEncoding::HexText => decode_hex_bytes(raw).map(Cow::Owned),
        BufferEncoding::Base64 => decode_base64(raw).map(Cow::Owned),
        BufferEncoding::Text | BufferEncoding::BinaryText | BufferEncoding::RawBytes => {
            Ok(Cow::Borrowed(raw))
        }
    }
}

fn is_binary_string(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b == b'0' || b == b'1')
}

fn strip_binary_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0b").or_else(|| s.strip_prefix("0B"))
}

/// Split C-style radix prefixes: `0x` hex, leading `0` octal, else decimal.
fn split_c_radix(s: &str) -> (u32, &str) {
    if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (16, rest)
    } else if s.len() > 1 && s.starts_with('0') {
        (8, &s[1..])
    } else {
        (10, s)
    }
}

fn parse_radix_u64(digits: &str, radix: u32) -> Option<u64> {
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Unsigned numeric text: `0b` binary, bare 0/1 binary, else C radix inference.
pub fn parse_unsigned_text(text: &str) -> Result<u64, CodecError> {
    let trimmed = text.trim();
    let parsed = if let Some(bits) = strip_binary_prefix(trimmed) {
        parse_radix_u64(bits, 2)
    } else if is_binary_string(trimmed) {
        parse_radix_u64(trimmed, 2)
    } else {
        let (radix, digits) = split_c_radix(trimmed);
        parse_radix_u64(digits, radix)
    };
    parsed.ok_or_else(|| CodecError::InvalidNumber(trimmed.to_string()))
}

/// Signed integer token as used by offset/width expressions.
pub fn parse_signed_integer(token: &str) -> Option<i64> {
    let trimmed = token.trim();
    if let Some(bits) = strip_binary_prefix(trimmed) {
        return parse_radix_u64(bits, 2).and_then(|v| i64::try_from(v).ok());
    }
    if is_binary_string(trimmed) {
        return parse_radix_u64(trimmed, 2).and_then(|v| i64::try_from(v).ok());
    }
    let (negative, magnitude) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let (radix, digits) = split_c_radix(magnitude);
    let value = parse_radix_u64(digits, radix)?;
    if negative {
        if value == 1u64 << 63 {
            Some(i64::MIN)
        } else {
            i64::try_from(value).ok().map(|v| -v)
        }
    } else {
        i64::try_from(value).ok()
    }
}

/// Unsigned integer from the first (up to) 8 bytes in the given byte order.
pub fn read_uint(bytes: &[u8], endianness: Endianness) -> Result<u64, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::NoBytes);
    }
    let take = &bytes[..bytes.len().min(8)];
    let mut buf = [0u8; 8];
    let value = match endianness {
        Endianness::Big => {
            buf[8 - take.len()..].copy_from_slice(take);
            BigEndian::read_u64(&buf)
        }
        Endianness::Little => {
            buf[..take.len()].copy_from_slice(take);
            LittleEndian::read_u64(&buf)
        }
    };
    Ok(value)
}

/// Interpret raw (undecoded) field data as an unsigned integer.
///
/// Hex text is read digit-wise so odd digit counts work; only little-endian
/// fields with a whole number of bytes are reinterpreted byte-wise.
pub fn numeric_value(
    raw: &[u8],
    encoding: BufferEncoding,
    endianness: Endianness,
) -> Result<u64, CodecError> {
    match encoding {
        BufferEncoding::HexText => {
            let digits = normalize_hex(raw)?;
            if endianness == Endianness::Little && !digits.is_empty() && digits.len() % 2 == 0 {
                let bytes = decode_hex_bytes(&digits)?;
                read_uint(&bytes, endianness)
            } else {
                fold_hex_digits(&digits)
            }
        }
        BufferEncoding::Base64 => read_uint(&decode_base64(raw)?, endianness),
        BufferEncoding::Text | BufferEncoding::BinaryText => {
            parse_unsigned_text(&String::from_utf8_lossy(raw))
        }
        BufferEncoding::RawBytes => read_uint(raw, endianness),
    }
}

/// Label of the first entry whose key parses to `value`, else the decimal value.
pub fn format_enum(value: u64, table: &LabelTable) -> String {
    table
        .iter()
        .find(|(key, _)| parse_unsigned_text(key).ok() == Some(value))
        .map(|(_, label)| label.clone())
        .unwrap_or_else(|| value.to_string())
}

/// Labels of every entry whose key shares a bit with `value`, else `0x` hex.
pub fn format_flags(value: u64, table: &LabelTable) -> String {
    let names: Vec<&str> = table
        .iter()
        .filter(|(key, _)| matches!(parse_unsigned_text(key), Ok(k) if k & value != 0))
        .map(|(_, label)| label.as_str())
        .collect();
    if names.is_empty() {
        format!("0x{:x}", value)
    } else {
        names.join(", ")
    }
}

/// Render an integer per the field's display format.
pub fn format_number(value: u64, field: &FieldSpec) -> String {
    match field.format {
        DisplayFormat::Hex => format!("0x{:x}", value),
        DisplayFormat::Binary => format!("{:b}", value),
        DisplayFormat::Enum => format_enum(value, &field.enum_table),
        DisplayFormat::Flags => format_flags(value, &field.flag_table),
        _ => value.to_string(),
    }
}

/// Short printable preview of raw data: the text itself when it is printable
/// ASCII, otherwise hex. Truncated to `limit` characters/bytes.
pub fn preview_bytes(raw: &[u8], limit: usize) -> String {
    let truncated = raw.len() > limit;
    let head = &raw[..raw.len().min(limit)];
    let mut out = if head.iter().all(|b| (0x20..0x7f).contains(b)) {
        String::from_utf8_lossy(head).into_owned()
    } else {
        format!("hex({})", hex::encode(head))
    };
    if truncated {
        out.push_str("...");
    }
    out
}
