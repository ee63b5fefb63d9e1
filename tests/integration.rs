//! Integration tests: registry + store + decoder end to end.

use logpreview::{ConfigStore, DecodeOutcome, PreviewRegistry, RegistryEvent};
use std::path::{Path, PathBuf};

const EHCP_LINE: &str = "SRING: 1,48,45484350303239303030303030303034313034313038303031303032353132103130353734365A23302143343044";

const RULES_V1: &str = r#"{"previews": [
  {"name": "EHCP", "regex": "^SRING: 1,48,(?<payload>[0-9A-F]+)$", "fields": [{
    "name": "ehcp", "source": "capture", "capture": "payload", "type": "hexString", "fields": [
      {"name": "header", "type": "string", "width": 4},
      {"name": "size", "type": "hexString", "format": "dig", "width": 3},
      {"name": "checksum", "type": "hexString", "format": "hex", "offset": "{ehcp.size}-6", "width": 4}
    ]}]},
  {"name": "any-sring", "regex": "^SRING", "enabled": false, "fields": [
    {"name": "text", "type": "string"}
  ]}
]}"#;

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).expect("write");
    path
}

fn names(registry: &PreviewRegistry) -> Vec<String> {
    registry.all().iter().map(|r| r.name.clone()).collect()
}

#[test]
fn test_import_persist_reload_decode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ConfigStore::in_dir(dir.path().join("config"));
    let registry = PreviewRegistry::new(store.clone());
    let events = registry.subscribe();

    let result = registry.import_from(write(dir.path(), "v1.json", RULES_V1));
    assert!(result.ok, "{:?}", result.errors);
    assert_eq!(events.try_recv(), Ok(RegistryEvent::RulesChanged));
    assert!(store.path().exists());

    let (reloaded, summary) = PreviewRegistry::open(store);
    assert!(summary.errors.is_empty());
    assert_eq!(summary.loaded, 2);
    assert_eq!(names(&reloaded), ["EHCP", "any-sring"]);
    assert!(reloaded.all().iter().all(|r| r.enabled_explicit));

    let (name, outcome) = reloaded.auto_decode(EHCP_LINE).expect("match");
    assert_eq!(name, "EHCP");
    assert_eq!(outcome.display_of("size"), Some("41"));
    assert_eq!(outcome.display_of("checksum"), Some("0xc40d"));
}

#[test]
fn test_import_merge_keeps_enabled_unless_stated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = PreviewRegistry::new(ConfigStore::in_dir(dir.path()));
    assert!(registry.import_from(write(dir.path(), "v1.json", RULES_V1)).ok);
    assert!(registry.set_enabled("EHCP", false).expect("known"));

    // EHCP: no enabled key, stays disabled; any-sring: explicit true wins;
    // extra: new, enabled by default
    let v2 = r#"[
        {"name": "EHCP", "regex": "^EHCP", "fields": []},
        {"name": "any-sring", "regex": "^SRING", "enabled": true, "fields": []},
        {"name": "extra", "regex": "^X", "fields": []}
    ]"#;
    let result = registry.import_from(write(dir.path(), "v2.json", v2));
    assert!(result.ok, "{:?}", result.errors);
    assert_eq!(names(&registry), ["EHCP", "any-sring", "extra"]);

    let ehcp = registry.find_by_name("EHCP").expect("EHCP");
    assert!(!ehcp.enabled);
    assert_eq!(ehcp.pattern.as_str(), "^EHCP");
    assert!(registry.find_by_name("any-sring").expect("rule").enabled);
    assert!(registry.find_by_name("extra").expect("rule").enabled);
}

#[test]
fn test_import_with_errors_changes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = PreviewRegistry::new(ConfigStore::in_dir(dir.path()));
    assert!(registry.import_from(write(dir.path(), "v1.json", RULES_V1)).ok);
    let events = registry.subscribe();

    let broken = r#"[{"name": "new", "regex": "ok", "fields": []}, {"name": "bad", "regex": "("}]"#;
    let result = registry.import_from(write(dir.path(), "broken.json", broken));
    assert!(!result.ok);
    assert!(!result.errors.is_empty());
    assert_eq!(names(&registry), ["EHCP", "any-sring"]);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_clear_then_reload_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ConfigStore::in_dir(dir.path());
    let registry = PreviewRegistry::new(store.clone());
    assert!(registry.import_from(write(dir.path(), "v1.json", RULES_V1)).ok);

    registry.clear_all().expect("clear");
    assert!(registry.is_empty());
    let summary = registry.load();
    assert!(summary.errors.is_empty());
    assert!(summary.warnings.is_empty());
    assert!(registry.is_empty());

    let fresh = tempfile::tempdir().expect("tempdir");
    let (empty, summary) = PreviewRegistry::open(ConfigStore::in_dir(fresh.path().join("none")));
    assert!(empty.is_empty());
    assert!(summary.errors.is_empty());
}

#[test]
fn test_remove_and_disabled_rules_are_not_auto_detected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = PreviewRegistry::new(ConfigStore::in_dir(dir.path()));
    assert!(registry.import_from(write(dir.path(), "v1.json", RULES_V1)).ok);

    assert_eq!(registry.first_matching_enabled(EHCP_LINE).as_deref(), Some("EHCP"));
    registry.set_enabled("EHCP", false).expect("known");
    assert_eq!(registry.first_matching_enabled(EHCP_LINE), None);
    registry.set_enabled("any-sring", true).expect("known");
    assert_eq!(
        registry.first_matching_enabled(EHCP_LINE).as_deref(),
        Some("any-sring")
    );

    registry.remove_by_name("any-sring").expect("remove");
    assert_eq!(names(&registry), ["EHCP"]);
    // decode by name ignores the enabled flag
    let outcome = registry.decode("EHCP", EHCP_LINE).expect("known rule");
    assert!(matches!(outcome, DecodeOutcome::Decoded(_)));

    let (reloaded, _) = PreviewRegistry::open(ConfigStore::in_dir(dir.path()));
    assert_eq!(names(&reloaded), ["EHCP"]);
    assert!(!reloaded.all()[0].enabled);
}

#[test]
fn test_registry_is_shareable_across_threads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = std::sync::Arc::new(PreviewRegistry::new(ConfigStore::in_dir(dir.path())));
    assert!(registry.import_from(write(dir.path(), "v1.json", RULES_V1)).ok);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    registry.set_enabled("any-sring", i % 2 == 0).expect("known");
                    let _ = registry.auto_decode(EHCP_LINE);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }
    assert_eq!(registry.len(), 2);
    assert!(ConfigStore::in_dir(dir.path()).load().is_ok());
}
