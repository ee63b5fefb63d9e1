//! On-disk persistence of the rule set.
//!
//! The document is `{"version": 1, "previews": [...]}`, pretty-printed.
//! Writes go to a temporary file in the target directory that is then
//! renamed over the old file, so a crash mid-write leaves the previous
//! configuration intact.

use crate::ast::*;
use crate::parser::{parse_file, ParseReport};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
    #[error("cannot serialize previews: {0}")]
    Json(#[from] serde_json::Error),
}

/// Location of the previews file plus load/save over it.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub const FILE_NAME: &'static str = "previews.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    /// `previews.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        ConfigStore::new(dir.as_ref().join(Self::FILE_NAME))
    }

    /// `<config dir>/logpreview/previews.json`, falling back to the working directory.
    pub fn default_location() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        ConfigStore::in_dir(base.join("logpreview"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the stored document. A missing file is an empty, error-free report.
    pub fn load(&self) -> ParseReport {
        if !self.path.exists() {
            return ParseReport::default();
        }
        parse_file(&self.path)
    }

    /// Atomically replace the stored document with `rules`.
    pub fn save(&self, rules: &[RuleDefinition]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let text = to_string_pretty(rules)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(text.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|source| StoreError::Persist {
            path: self.path.clone(),
            source,
        })?;
        log::debug!("saved {} previews to {}", rules.len(), self.path.display());
        Ok(())
    }
}

fn value_expr_json(expr: &ValueExpr) -> Option<Value> {
    match expr {
        ValueExpr::Unset => None,
        ValueExpr::Literal(v) => Some(json!(v)),
        ValueExpr::Text(t) => Some(json!(t)),
    }
}

fn capture_json(capture: &Option<CaptureRef>) -> Option<Value> {
    capture.as_ref().map(|c| match c {
        CaptureRef::Index(i) => json!(i),
        CaptureRef::Name(n) => json!(n),
    })
}

fn label_table_json(table: &LabelTable) -> Value {
    let map: Map<String, Value> = table
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

fn field_json(field: &FieldSpec) -> Value {
    let mut obj = Map::new();
    obj.insert("name".into(), json!(field.name));
    if field.source != FieldSource::Buffer {
        obj.insert("source".into(), json!(field.source.as_config()));
    }
    if let Some(v) = capture_json(&field.capture) {
        obj.insert("capture".into(), v);
    }
    if let Some(v) = value_expr_json(&field.offset) {
        obj.insert("offset".into(), v);
    }
    if let Some(v) = value_expr_json(&field.width) {
        obj.insert("width".into(), v);
    }
    if field.encoding != BufferEncoding::RawBytes {
        obj.insert("type".into(), json!(field.encoding.as_config()));
    }
    if field.endianness != Endianness::Big {
        obj.insert("endianness".into(), json!(field.endianness.as_config()));
    }
    if field.format != DisplayFormat::String {
        obj.insert("format".into(), json!(field.format.as_config()));
    }
    if let Some(pattern) = &field.pattern {
        obj.insert("regex".into(), json!(pattern.as_str()));
    }
    if !field.enum_table.is_empty() {
        obj.insert("enumMap".into(), label_table_json(&field.enum_table));
    }
    if !field.flag_table.is_empty() {
        obj.insert("flagMap".into(), label_table_json(&field.flag_table));
    }
    let nested = matches!(field.format, DisplayFormat::Fields | DisplayFormat::Match);
    if nested || !field.children.is_empty() {
        obj.insert("fields".into(), fields_json(&field.children));
    }
    if !field.bit_subfields.is_empty() {
        obj.insert("bitfieldMap".into(), fields_json(&field.bit_subfields));
    }
    Value::Object(obj)
}

fn fields_json(fields: &[FieldSpec]) -> Value {
    Value::Array(fields.iter().map(field_json).collect())
}

fn rule_json(rule: &RuleDefinition) -> Value {
    let mut obj = Map::new();
    obj.insert("name".into(), json!(rule.name));
    obj.insert("regex".into(), json!(rule.pattern.as_str()));
    obj.insert("enabled".into(), json!(rule.enabled));
    if let Some(v) = capture_json(&rule.buffer_capture) {
        obj.insert("bufferCapture".into(), v);
    }
    if let Some(v) = value_expr_json(&rule.start_offset) {
        obj.insert("offset".into(), v);
    }
    obj.insert("type".into(), json!(rule.buffer_encoding.as_config()));
    obj.insert("format".into(), json!(rule.format.as_config()));
    if rule.format == DisplayFormat::Fields || !rule.fields.is_empty() {
        obj.insert("fields".into(), fields_json(&rule.fields));
    }
    Value::Object(obj)
}

/// The stored document for `rules`.
pub fn to_json(rules: &[RuleDefinition]) -> Value {
    json!({
        "version": FORMAT_VERSION,
        "previews": rules.iter().map(rule_json).collect::<Vec<_>>(),
    })
}

pub fn to_string_pretty(rules: &[RuleDefinition]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&to_json(rules))
}
