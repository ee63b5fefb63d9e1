//! Rule registry: the owned, lock-protected set of preview rules.
//!
//! Every mutation runs lookup, change, persist and notify under one lock, so
//! concurrent callers never see a half-applied change. Listeners subscribe
//! through [`PreviewRegistry::subscribe`] and receive [`RegistryEvent`]s.

use crate::ast::RuleDefinition;
use crate::decode::decode_line;
use crate::parser::parse_file;
use crate::store::{ConfigStore, StoreError};
use crate::value::DecodeOutcome;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const SAVE_FAILED: &str = "Failed to save previews configuration.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The rule list changed (load, import, remove, clear, toggle).
    RulesChanged,
    EnabledChanged { name: String, enabled: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no preview named '{0}'")]
    NotFound(String),
    #[error("failed to save previews configuration: {0}")]
    Persist(#[from] StoreError),
}

/// Diagnostics from [`PreviewRegistry::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub loaded: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Outcome of [`PreviewRegistry::import_from`].
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct PreviewRegistry {
    store: ConfigStore,
    rules: Mutex<Vec<RuleDefinition>>,
    listeners: Mutex<Vec<Sender<RegistryEvent>>>,
}

impl PreviewRegistry {
    /// An empty registry persisting to `store`. Call [`load`](Self::load) to read it.
    pub fn new(store: ConfigStore) -> Self {
        PreviewRegistry {
            store,
            rules: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// A registry already loaded from `store`.
    pub fn open(store: ConfigStore) -> (Self, LoadSummary) {
        let registry = PreviewRegistry::new(store);
        let summary = registry.load();
        (registry, summary)
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RuleDefinition>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: RegistryEvent) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        let (tx, rx) = channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Replace the in-memory set with the stored one. Problems are logged and
    /// returned, never raised.
    pub fn load(&self) -> LoadSummary {
        let report = self.store.load();
        for error in &report.errors {
            log::error!("preview config error: {}", error);
        }
        for warning in &report.warnings {
            log::warn!("preview config warning: {}", warning);
        }
        let mut rules = self.lock();
        *rules = report.rules;
        for rule in rules.iter_mut() {
            rule.enabled_explicit = true;
        }
        log::debug!("loaded {} previews from {}", rules.len(), self.store.path().display());
        self.notify(RegistryEvent::RulesChanged);
        LoadSummary {
            loaded: rules.len(),
            errors: report.errors,
            warnings: report.warnings,
        }
    }

    /// Merge the rules of a previews file into the registry and persist.
    ///
    /// Any parse error aborts with no change. Existing names are replaced in
    /// place, keeping their enabled state unless the file states one. A failed
    /// save is reported but the merged rules stay in memory.
    pub fn import_from(&self, path: impl AsRef<Path>) -> ImportResult {
        let path = path.as_ref();
        let parsed = parse_file(path);
        let mut result = ImportResult {
            ok: false,
            errors: parsed.errors,
            warnings: parsed.warnings,
        };
        if !result.errors.is_empty() {
            log::warn!(
                "import of {} aborted with {} errors",
                path.display(),
                result.errors.len()
            );
            return result;
        }

        let mut rules = self.lock();
        for mut incoming in parsed.rules {
            match rules.iter_mut().find(|r| r.name == incoming.name) {
                Some(existing) => {
                    if !incoming.enabled_explicit {
                        incoming.enabled = existing.enabled;
                    }
                    incoming.enabled_explicit = true;
                    log::debug!("import replaces preview '{}'", incoming.name);
                    *existing = incoming;
                }
                None => {
                    incoming.enabled_explicit = true;
                    log::debug!("import adds preview '{}'", incoming.name);
                    rules.push(incoming);
                }
            }
        }

        if let Err(e) = self.store.save(&rules) {
            log::error!("{} {}", SAVE_FAILED, e);
            result.errors.push(SAVE_FAILED.to_string());
            return result;
        }
        result.ok = true;
        self.notify(RegistryEvent::RulesChanged);
        result
    }

    /// Remove one rule; restored in place if it cannot be persisted.
    pub fn remove_by_name(&self, name: &str) -> Result<(), RegistryError> {
        let mut rules = self.lock();
        let index = rules
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let removed = rules.remove(index);
        if let Err(e) = self.store.save(&rules) {
            log::error!("cannot remove preview '{}': {}", name, e);
            rules.insert(index, removed);
            return Err(e.into());
        }
        log::debug!("removed preview '{}'", name);
        self.notify(RegistryEvent::RulesChanged);
        Ok(())
    }

    /// Remove every rule; restored if the empty set cannot be persisted.
    pub fn clear_all(&self) -> Result<(), RegistryError> {
        let mut rules = self.lock();
        let previous = std::mem::take(&mut *rules);
        if let Err(e) = self.store.save(&rules) {
            log::error!("cannot clear previews: {}", e);
            *rules = previous;
            return Err(e.into());
        }
        log::debug!("cleared {} previews", previous.len());
        self.notify(RegistryEvent::RulesChanged);
        Ok(())
    }

    /// Toggle one rule. Returns whether anything changed. The new state is
    /// saved best-effort: a failed save is logged and the change is kept.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, RegistryError> {
        let mut rules = self.lock();
        let rule = rules
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if rule.enabled == enabled {
            return Ok(false);
        }
        rule.enabled = enabled;
        rule.enabled_explicit = true;
        if let Err(e) = self.store.save(&rules) {
            log::error!("{} {}", SAVE_FAILED, e);
        }
        log::debug!("preview '{}' enabled = {}", name, enabled);
        self.notify(RegistryEvent::EnabledChanged {
            name: name.to_string(),
            enabled,
        });
        self.notify(RegistryEvent::RulesChanged);
        Ok(true)
    }

    /// Snapshot of every rule, in registry order.
    pub fn all(&self) -> Vec<RuleDefinition> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn enabled(&self) -> Vec<RuleDefinition> {
        self.lock().iter().filter(|r| r.enabled).cloned().collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<RuleDefinition> {
        self.lock().iter().find(|r| r.name == name).cloned()
    }

    /// Name of the first enabled rule, in registry order, whose pattern matches `line`.
    pub fn first_matching_enabled(&self, line: &str) -> Option<String> {
        self.lock()
            .iter()
            .find(|r| r.enabled && r.matches(line))
            .map(|r| r.name.clone())
    }

    /// Decode `line` with the named rule; `None` if there is no such rule.
    pub fn decode(&self, name: &str, line: &str) -> Option<DecodeOutcome> {
        let rules = self.lock();
        let rule = rules.iter().find(|r| r.name == name)?;
        Some(decode_line(rule, line))
    }

    /// Decode `line` with the first matching enabled rule.
    pub fn auto_decode(&self, line: &str) -> Option<(String, DecodeOutcome)> {
        let rules = self.lock();
        let rule = rules.iter().find(|r| r.enabled && r.matches(line))?;
        Some((rule.name.clone(), decode_line(rule, line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).expect("write");
        path
    }

    #[test]
    fn first_match_skips_disabled_rules() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = PreviewRegistry::new(ConfigStore::in_dir(dir.path()));
        let file = write(
            dir.path(),
            "in.json",
            r#"[{"name":"a","regex":"^X","enabled":false,"fields":[]},
                {"name":"b","regex":"^X","fields":[]},
                {"name":"c","regex":"^Y","fields":[]}]"#,
        );
        assert!(registry.import_from(&file).ok);
        assert_eq!(registry.first_matching_enabled("X1").as_deref(), Some("b"));
        assert_eq!(registry.first_matching_enabled("Y1").as_deref(), Some("c"));
        assert_eq!(registry.first_matching_enabled("Z"), None);
        let names: Vec<String> = registry.enabled().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[test]
    fn set_enabled_is_idempotent_and_notifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = PreviewRegistry::new(ConfigStore::in_dir(dir.path()));
        let file = write(dir.path(), "in.json", r#"[{"name":"a","regex":"x","fields":[]}]"#);
        assert!(registry.import_from(&file).ok);

        let events = registry.subscribe();
        assert!(!registry.set_enabled("a", true).expect("known"));
        assert!(events.try_recv().is_err());

        assert!(registry.set_enabled("a", false).expect("known"));
        assert_eq!(
            events.try_recv(),
            Ok(RegistryEvent::EnabledChanged {
                name: "a".to_string(),
                enabled: false
            })
        );
        assert_eq!(events.try_recv(), Ok(RegistryEvent::RulesChanged));
        assert!(matches!(
            registry.set_enabled("zzz", true),
            Err(RegistryError::NotFound(_))
        ));

        let (reloaded, _) = PreviewRegistry::open(ConfigStore::in_dir(dir.path()));
        assert!(!reloaded.all()[0].enabled);
    }

    #[test]
    fn remove_unknown_name_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = PreviewRegistry::new(ConfigStore::in_dir(dir.path()));
        assert!(matches!(
            registry.remove_by_name("nope"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn remove_rolls_back_when_save_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = ConfigStore::in_dir(dir.path().join("good"));
        good.save(
            &crate::parser::parse_str(
                r#"[{"name":"a","regex":"1","fields":[]},{"name":"b","regex":"2","fields":[]}]"#,
            )
            .rules,
        )
        .expect("seed");

        // parent of the store path is a regular file, so every save fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").expect("write");
        let registry = PreviewRegistry::new(ConfigStore::in_dir(&blocker));
        let file = good.path().to_path_buf();
        let result = registry.import_from(&file);
        assert!(!result.ok);
        assert_eq!(result.errors, vec![SAVE_FAILED.to_string()]);
        // import keeps the merge in memory
        assert_eq!(registry.len(), 2);

        assert!(matches!(
            registry.remove_by_name("a"),
            Err(RegistryError::Persist(_))
        ));
        let names: Vec<String> = registry.all().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, ["a", "b"]);

        assert!(registry.clear_all().is_err());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn set_enabled_keeps_change_when_save_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = ConfigStore::in_dir(dir.path().join("good"));
        good.save(&crate::parser::parse_str(r#"[{"name":"a","regex":"1","fields":[]}]"#).rules)
            .expect("seed");

        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").expect("write");
        let registry = PreviewRegistry::new(ConfigStore::in_dir(&blocker));
        assert!(!registry.import_from(good.path()).ok);

        let events = registry.subscribe();
        assert!(registry.set_enabled("a", false).expect("known"));
        assert!(!registry.find_by_name("a").expect("present").enabled);
        assert!(registry.enabled().is_empty());
        assert_eq!(
            events.try_recv(),
            Ok(RegistryEvent::EnabledChanged {
                name: "a".to_string(),
                enabled: false
            })
        );
    }

    #[test]
    fn all_is_a_snapshot_that_allows_mutation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = PreviewRegistry::new(ConfigStore::in_dir(dir.path()));
        let file = write(
            dir.path(),
            "in.json",
            r#"[{"name":"a","regex":"1","fields":[]},{"name":"b","regex":"2","fields":[]}]"#,
        );
        assert!(registry.import_from(&file).ok);
        for rule in registry.all().iter() {
            assert!(registry.set_enabled(&rule.name, false).expect("known"));
        }
        assert!(registry.enabled().is_empty());
    }

    #[test]
    fn decode_by_name_and_auto() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = PreviewRegistry::new(ConfigStore::in_dir(dir.path()));
        let file = write(
            dir.path(),
            "in.json",
            r#"[{"name":"kv","regex":"^K=(\\d+)$","fields":[
                {"name":"k","source":"capture","capture":1,"type":"string","format":"hex"}
            ]}]"#,
        );
        assert!(registry.import_from(&file).ok);
        assert!(registry.decode("missing", "K=1").is_none());
        assert_eq!(
            registry.decode("kv", "nope"),
            Some(DecodeOutcome::NoMatch)
        );
        let (name, outcome) = registry.auto_decode("K=255").expect("match");
        assert_eq!(name, "kv");
        assert_eq!(outcome.display_of("k"), Some("0xff"));
        assert!(registry.auto_decode("Q").is_none());
    }
}
