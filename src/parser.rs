//! Parse a previews JSON document into validated rule definitions.
//!
//! Problems never stop the parse. Structural errors drop the affected rule
//! (a rejected field drops every enclosing field and the rule), warnings keep
//! it with the defect noted. Both lists are returned in a [`ParseReport`].

use crate::ast::*;
use serde_json::{Map, Value};
use std::path::Path;

/// Everything one parse produced.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub rules: Vec<RuleDefinition>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ParseReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }
}

const RULE_KEYS: &[&str] = &[
    "name",
    "regex",
    "pattern",
    "enabled",
    "bufferCapture",
    "offset",
    "type",
    "format",
    "fields",
];

const FIELD_KEYS: &[&str] = &[
    "name",
    "source",
    "capture",
    "offset",
    "width",
    "type",
    "endianness",
    "format",
    "regex",
    "enumMap",
    "flagMap",
    "fields",
    "bitfieldMap",
];

fn sub_context(context: &str, key: &str) -> String {
    if context.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", context, key)
    }
}

/// Parse a previews document from raw JSON bytes.
pub fn parse(json: &[u8]) -> ParseReport {
    let mut report = ParseReport::default();
    let document: Value = match serde_json::from_slice(json) {
        Ok(v) => v,
        Err(e) => {
            report.error(format!("Invalid JSON: {}.", e));
            return report;
        }
    };
    parse_value(&document, report)
}

pub fn parse_str(json: &str) -> ParseReport {
    parse(json.as_bytes())
}

/// Read and parse a previews file.
pub fn parse_file(path: impl AsRef<Path>) -> ParseReport {
    let path = path.as_ref();
    match std::fs::read(path) {
        Ok(bytes) => parse(&bytes),
        Err(e) => ParseReport {
            errors: vec![format!("Failed to open {}: {}.", path.display(), e)],
            ..ParseReport::default()
        },
    }
}

fn parse_value(document: &Value, mut report: ParseReport) -> ParseReport {
    let entries = match document {
        Value::Array(entries) => entries,
        Value::Object(root) => match root.get("previews") {
            Some(Value::Array(entries)) => entries,
            _ => {
                report.error("Missing 'previews' array in JSON.".to_string());
                return report;
            }
        },
        _ => {
            report.error("Unsupported JSON root format.".to_string());
            return report;
        }
    };

    for (index, entry) in entries.iter().enumerate() {
        let Some(object) = entry.as_object() else {
            report.error(format!("Preview entry {} is not an object.", index));
            continue;
        };
        let Some(rule) = build_rule(object, index, &mut report) else {
            continue;
        };
        if let Some(existing) = report.rules.iter_mut().find(|r| r.name == rule.name) {
            let message = format!(
                "Duplicate preview name '{}' at index {}; the later definition is used.",
                rule.name, index
            );
            *existing = rule;
            report.warn(message);
        } else {
            report.rules.push(rule);
        }
    }
    report
}

fn warn_unknown_keys(
    object: &Map<String, Value>,
    known: &[&str],
    report: &mut ParseReport,
    describe: impl Fn(&str) -> String,
) {
    for key in object.keys() {
        if !known.contains(&key.as_str()) {
            report.warn(describe(key));
        }
    }
}

fn build_value_expr(value: Option<&Value>, context: &str, report: &mut ParseReport) -> ValueExpr {
    match value {
        None | Some(Value::Null) => ValueExpr::Unset,
        Some(Value::Number(n)) => match n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
            Some(v) => ValueExpr::Literal(v),
            None => ValueExpr::Unset,
        },
        Some(Value::String(s)) => ValueExpr::Text(s.clone()),
        Some(_) => {
            report.warn(format!("Invalid value expression at {}.", context));
            ValueExpr::Unset
        }
    }
}

fn build_capture_ref(
    value: Option<&Value>,
    context: &str,
    report: &mut ParseReport,
) -> Option<CaptureRef> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(CaptureRef::Name(s.clone())),
        Some(Value::Number(n)) => match n.as_u64().and_then(|i| usize::try_from(i).ok()) {
            Some(i) => Some(CaptureRef::Index(i)),
            None => {
                report.warn(format!("Invalid capture reference at {}.", context));
                None
            }
        },
        Some(_) => {
            report.warn(format!("Invalid capture reference at {}.", context));
            None
        }
    }
}

/// Look up a case-insensitive enum value; unknown strings leave the default.
fn build_choice<T>(
    value: Option<&Value>,
    lookup: impl Fn(&str) -> Option<T>,
    report: &mut ParseReport,
    warning: impl Fn() -> String,
) -> Option<T> {
    let value = value?;
    match value.as_str().and_then(lookup) {
        Some(v) => Some(v),
        None => {
            report.warn(warning());
            None
        }
    }
}

fn build_label_table(
    value: Option<&Value>,
    context: &str,
    report: &mut ParseReport,
) -> LabelTable {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, label)| {
                let label = match label {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), label)
            })
            .collect(),
        Some(_) => {
            report.warn(format!("Expected object at {}.", context));
            Vec::new()
        }
    }
}

/// Parse every element; `None` when the value is not an array or any element was rejected.
fn build_field_array(
    value: &Value,
    context: &str,
    report: &mut ParseReport,
) -> Option<Vec<FieldSpec>> {
    let Some(items) = value.as_array() else {
        report.error(format!("Expected array at {}.", context));
        return None;
    };
    let mut fields = Vec::with_capacity(items.len());
    let mut rejected = false;
    for (index, item) in items.iter().enumerate() {
        let item_context = format!("{}[{}]", context, index);
        let Some(object) = item.as_object() else {
            report.error(format!("Expected object at {}.", item_context));
            rejected = true;
            continue;
        };
        match build_field(object, &item_context, report) {
            Some(field) => fields.push(field),
            None => rejected = true,
        }
    }
    if rejected {
        None
    } else {
        Some(fields)
    }
}

fn build_field(object: &Map<String, Value>, context: &str, report: &mut ParseReport) -> Option<FieldSpec> {
    let name = match object.get("name").and_then(Value::as_str) {
        Some(n) if !n.trim().is_empty() => n,
        _ => {
            report.error(format!("Missing field name at {}.", context));
            return None;
        }
    };
    let mut field = FieldSpec::new(name);
    warn_unknown_keys(object, FIELD_KEYS, report, |key| {
        format!("Unknown field property '{}' at {}.", key, context)
    });

    if let Some(source) = build_choice(object.get("source"), FieldSource::from_config, report, || {
        format!("Unknown field source at {}.", context)
    }) {
        field.source = source;
    }
    field.capture = build_capture_ref(object.get("capture"), &sub_context(context, "capture"), report);
    field.offset = build_value_expr(object.get("offset"), &sub_context(context, "offset"), report);
    field.width = build_value_expr(object.get("width"), &sub_context(context, "width"), report);

    if let Some(encoding) = build_choice(object.get("type"), BufferEncoding::from_config, report, || {
        format!("Unknown field type at {}.", context)
    }) {
        field.encoding = encoding;
    }
    if object.contains_key("format") {
        if let Some(format) = build_choice(object.get("format"), DisplayFormat::from_config, report, || {
            format!("Unknown field format at {}.", context)
        }) {
            field.format = format;
        }
    } else if object.contains_key("fields") {
        field.format = DisplayFormat::Fields;
    }
    if let Some(endianness) = build_choice(object.get("endianness"), Endianness::from_config, report, || {
        format!("Unknown endianness at {}.", context)
    }) {
        field.endianness = endianness;
    }

    field.enum_table = build_label_table(object.get("enumMap"), &sub_context(context, "enumMap"), report);
    field.flag_table = build_label_table(object.get("flagMap"), &sub_context(context, "flagMap"), report);

    if field.source == FieldSource::Capture && field.capture.is_none() {
        report.warn(format!("Missing capture for field {}.", context));
    }
    if field.format == DisplayFormat::Enum && field.enum_table.is_empty() {
        report.warn(format!("Missing enumMap for field {}.", context));
    }
    if field.format == DisplayFormat::Flags && field.flag_table.is_empty() {
        report.warn(format!("Missing flagMap for field {}.", context));
    }

    if field.format == DisplayFormat::Match {
        match object.get("regex").and_then(Value::as_str) {
            Some(source) if !source.trim().is_empty() => match Pattern::new(source) {
                Ok(pattern) => field.pattern = Some(pattern),
                Err(e) => {
                    report.error(format!("Invalid regex at {}: {}", context, e));
                    return None;
                }
            },
            _ => {
                report.error(format!("Missing regex for {}.", context));
                return None;
            }
        }
    } else if object.contains_key("regex") {
        report.warn(format!("Ignoring regex at {}: format is not 'match'.", context));
    }

    if matches!(field.format, DisplayFormat::Fields | DisplayFormat::Match) {
        let Some(children) = object.get("fields") else {
            report.error(format!("Missing fields for {}.", context));
            return None;
        };
        field.children = build_field_array(children, &sub_context(context, "fields"), report)?;
    }

    if field.format == DisplayFormat::Bitfield {
        match object.get("bitfieldMap") {
            Some(bits) => {
                field.bit_subfields =
                    build_field_array(bits, &sub_context(context, "bitfieldMap"), report)?;
            }
            None => report.warn(format!("Missing bitfieldMap for {}.", context)),
        }
    }

    Some(field)
}

fn build_rule(object: &Map<String, Value>, index: usize, report: &mut ParseReport) -> Option<RuleDefinition> {
    let name = match object.get("name").and_then(Value::as_str) {
        Some(n) if !n.trim().is_empty() => n,
        _ => {
            report.error(format!("Missing preview name at index {}.", index));
            return None;
        }
    };

    let regex_value = object.get("regex").or_else(|| object.get("pattern"));
    let source = match regex_value.and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            report.error(format!("Missing preview regex for '{}'.", name));
            return None;
        }
    };

    warn_unknown_keys(object, RULE_KEYS, report, |key| {
        format!("Unknown preview property '{}' for '{}'.", key, name)
    });

    let pattern = match Pattern::new(source) {
        Ok(p) => p,
        Err(e) => {
            report.error(format!("Invalid regex for '{}': {}", name, e));
            return None;
        }
    };
    let mut rule = RuleDefinition::new(name, pattern);

    match object.get("enabled") {
        None => {}
        Some(Value::Bool(enabled)) => {
            rule.enabled = *enabled;
            rule.enabled_explicit = true;
        }
        Some(_) => report.warn(format!(
            "Invalid 'enabled' value for '{}'; expected true or false.",
            name
        )),
    }

    rule.buffer_capture = build_capture_ref(
        object.get("bufferCapture"),
        &format!("preview {} bufferCapture", name),
        report,
    );
    rule.start_offset = build_value_expr(
        object.get("offset"),
        &format!("preview {} offset", name),
        report,
    );

    if let Some(encoding) = build_choice(object.get("type"), BufferEncoding::from_config, report, || {
        format!("Unknown preview buffer type for '{}'.", name)
    }) {
        rule.buffer_encoding = encoding;
    }
    if let Some(format) = build_choice(object.get("format"), DisplayFormat::from_config, report, || {
        format!("Unknown preview format for '{}'.", name)
    }) {
        rule.format = format;
    }

    if rule.format == DisplayFormat::Fields {
        let Some(fields) = object.get("fields") else {
            report.error(format!("Missing fields for '{}'.", name));
            return None;
        };
        rule.fields = build_field_array(fields, &format!("preview {} fields", name), report)?;
    }

    Some(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_array_and_previews_object() {
        let bare = parse_str(r#"[{"name":"a","regex":"x","fields":[]}]"#);
        assert!(bare.is_ok(), "{:?}", bare.errors);
        assert_eq!(bare.rules.len(), 1);

        let wrapped = parse_str(r#"{"version":1,"previews":[{"name":"a","pattern":"x","fields":[]}]}"#);
        assert!(wrapped.is_ok(), "{:?}", wrapped.errors);
        assert_eq!(wrapped.rules[0].pattern.as_str(), "x");
    }

    #[test]
    fn root_errors() {
        assert_eq!(
            parse_str(r#"{"rules":[]}"#).errors,
            vec!["Missing 'previews' array in JSON.".to_string()]
        );
        assert_eq!(
            parse_str("42").errors,
            vec!["Unsupported JSON root format.".to_string()]
        );
        let bad = parse_str("{not json");
        assert_eq!(bad.errors.len(), 1);
        assert!(bad.errors[0].starts_with("Invalid JSON:"));
    }

    #[test]
    fn rejects_rule_but_keeps_going() {
        let report = parse_str(
            r#"[
                {"regex":"x","fields":[]},
                {"name":"bad","regex":"(","fields":[]},
                {"name":"ok","regex":"y","fields":[]},
                7
            ]"#,
        );
        assert_eq!(report.rules.len(), 1);
        assert_eq!(report.rules[0].name, "ok");
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.errors[0], "Missing preview name at index 0.");
        assert!(report.errors[1].starts_with("Invalid regex for 'bad':"));
        assert_eq!(report.errors[2], "Preview entry 3 is not an object.");
    }

    #[test]
    fn defaults() {
        let report = parse_str(r#"[{"name":"r","regex":"x","fields":[{"name":"f"},{"name":"g","fields":[]}]}]"#);
        let rule = &report.rules[0];
        assert!(rule.enabled);
        assert!(!rule.enabled_explicit);
        assert_eq!(rule.buffer_encoding, BufferEncoding::Text);
        assert_eq!(rule.format, DisplayFormat::Fields);
        let f = &rule.fields[0];
        assert_eq!(f.source, FieldSource::Buffer);
        assert_eq!(f.encoding, BufferEncoding::RawBytes);
        assert_eq!(f.format, DisplayFormat::String);
        assert_eq!(f.endianness, Endianness::Big);
        assert_eq!(rule.fields[1].format, DisplayFormat::Fields);
    }

    #[test]
    fn unknown_keys_and_soft_defects_warn() {
        let report = parse_str(
            r#"[{"name":"r","regex":"x","colour":"red","fields":[
                {"name":"a","source":"capture","bogus":1},
                {"name":"b","format":"enum"},
                {"name":"c","format":"flags","type":"HEXSTRING"},
                {"name":"d","format":"bitfield"},
                {"name":"e","type":"weird","endianness":"middle"}
            ]}]"#,
        );
        assert!(report.is_ok(), "{:?}", report.errors);
        let w = &report.warnings;
        assert!(w.contains(&"Unknown preview property 'colour' for 'r'.".to_string()));
        assert!(w.contains(&"Unknown field property 'bogus' at preview r fields[0].".to_string()));
        assert!(w.contains(&"Missing capture for field preview r fields[0].".to_string()));
        assert!(w.contains(&"Missing enumMap for field preview r fields[1].".to_string()));
        assert!(w.contains(&"Missing flagMap for field preview r fields[2].".to_string()));
        assert!(w.contains(&"Missing bitfieldMap for preview r fields[3].".to_string()));
        assert!(w.contains(&"Unknown field type at preview r fields[4].".to_string()));
        let rule = &report.rules[0];
        assert_eq!(rule.fields[2].encoding, BufferEncoding::HexText);
        assert_eq!(rule.fields[4].encoding, BufferEncoding::RawBytes);
        assert_eq!(rule.fields[4].endianness, Endianness::Big);
        assert!(rule.fields[3].bit_subfields.is_empty());
    }

    #[test]
    fn nested_rejection_drops_the_rule() {
        let report = parse_str(
            r#"[{"name":"r","regex":"x","fields":[
                {"name":"outer","format":"fields","fields":[{"name":"inner","format":"fields"}]}
            ]},{"name":"keep","regex":"y","fields":[]}]"#,
        );
        assert_eq!(report.rules.len(), 1);
        assert_eq!(report.rules[0].name, "keep");
        assert_eq!(
            report.errors,
            vec!["Missing fields for preview r fields[0].fields[0].".to_string()]
        );
    }

    #[test]
    fn collects_every_field_error() {
        let report = parse_str(
            r#"[{"name":"r","regex":"x","fields":[{"width":1}, "oops", {"name":"ok"}]}]"#,
        );
        assert!(report.rules.is_empty());
        assert_eq!(
            report.errors,
            vec![
                "Missing field name at preview r fields[0].".to_string(),
                "Expected object at preview r fields[1].".to_string(),
            ]
        );
    }

    #[test]
    fn missing_rule_fields_is_an_error() {
        let report = parse_str(r#"[{"name":"r","regex":"x"}]"#);
        assert_eq!(report.errors, vec!["Missing fields for 'r'.".to_string()]);
        let string_rule = parse_str(r#"[{"name":"s","regex":"x","format":"string"}]"#);
        assert!(string_rule.is_ok());
    }

    #[test]
    fn expressions_and_capture_refs() {
        let report = parse_str(
            r#"[{"name":"r","regex":"(?<p>.*)","bufferCapture":"p","offset":2,"fields":[
                {"name":"a","width":"{x}-1","offset":true},
                {"name":"b","source":"capture","capture":1},
                {"name":"c","source":"capture","capture":-1}
            ]}]"#,
        );
        let rule = &report.rules[0];
        assert_eq!(rule.buffer_capture, Some(CaptureRef::Name("p".to_string())));
        assert_eq!(rule.start_offset, ValueExpr::Literal(2));
        assert_eq!(rule.fields[0].width, ValueExpr::Text("{x}-1".to_string()));
        assert_eq!(rule.fields[0].offset, ValueExpr::Unset);
        assert_eq!(rule.fields[1].capture, Some(CaptureRef::Index(1)));
        assert_eq!(rule.fields[2].capture, None);
        assert!(report
            .warnings
            .contains(&"Invalid value expression at preview r fields[0].offset.".to_string()));
        assert!(report
            .warnings
            .contains(&"Invalid capture reference at preview r fields[2].capture.".to_string()));
    }

    #[test]
    fn enabled_handling() {
        let report = parse_str(
            r#"[{"name":"a","regex":"x","enabled":false,"fields":[]},
                {"name":"b","regex":"x","enabled":"no","fields":[]}]"#,
        );
        assert!(!report.rules[0].enabled);
        assert!(report.rules[0].enabled_explicit);
        assert!(report.rules[1].enabled);
        assert!(!report.rules[1].enabled_explicit);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn duplicate_names_keep_the_later_definition_in_place() {
        let report = parse_str(
            r#"[{"name":"a","regex":"1","fields":[]},
                {"name":"b","regex":"2","fields":[]},
                {"name":"a","regex":"3","fields":[]}]"#,
        );
        let names: Vec<&str> = report.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(report.rules[0].pattern.as_str(), "3");
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn label_tables_keep_declaration_order() {
        let report = parse_str(
            r#"[{"name":"r","regex":"x","fields":[
                {"name":"e","format":"enum","enumMap":{"2":"TWO","1":"ONE"}}
            ]}]"#,
        );
        let table = &report.rules[0].fields[0].enum_table;
        assert_eq!(table[0], ("2".to_string(), "TWO".to_string()));
        assert_eq!(table[1], ("1".to_string(), "ONE".to_string()));
    }

    #[test]
    fn match_format_needs_regex_and_fields() {
        let ok = parse_str(
            r#"[{"name":"r","regex":"x","fields":[
                {"name":"m","format":"match","regex":"^(?<h>..)","fields":[]}
            ]}]"#,
        );
        assert!(ok.is_ok(), "{:?}", ok.errors);
        assert_eq!(
            ok.rules[0].fields[0].pattern.as_ref().map(Pattern::as_str),
            Some("^(?<h>..)")
        );

        let missing = parse_str(
            r#"[{"name":"r","regex":"x","fields":[{"name":"m","format":"match","fields":[]}]}]"#,
        );
        assert_eq!(
            missing.errors,
            vec!["Missing regex for preview r fields[0].".to_string()]
        );

        let invalid = parse_str(
            r#"[{"name":"r","regex":"x","fields":[{"name":"m","format":"match","regex":"(","fields":[]}]}]"#,
        );
        assert!(invalid.errors[0].starts_with("Invalid regex at preview r fields[0]:"));
        assert!(invalid.rules.is_empty());
    }
}
