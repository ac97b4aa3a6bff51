//! Audit configuration: loading, merging, and atomic reload
//!
//! A config is materialized from a JSON document layered over a defaults
//! document (primary keys win, nested objects merge key by key). The live
//! config sits behind an `ArcSwap`: readers always see one whole snapshot,
//! and `reload` swaps the entire object or leaves the old one in place.

use crate::actor::{resolve_or_absent, ActorResolver, NoActor, SessionActorResolver, SessionSource};
use crate::error::{AuditError, Result};
use crate::stamp::{StampFieldOverride, StampSpecification};
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Section name a document may wrap its keys in
pub const SECTION: &str = "auditLog";

/// Built-in defaults document
pub fn default_document() -> serde_json::Value {
    serde_json::json!({
        "verbose": false,
        "transactional": false,
        "ignoredProperties": ["version", "lastUpdated", "lastUpdatedBy"],
        "mask": ["password"]
    })
}

/// Materialized audit configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// Record one event per property instead of one summary per entity
    #[serde(default)]
    pub verbose: bool,

    /// Buffer events until the host commits
    #[serde(default)]
    pub transactional: bool,

    /// Dotted path to the actor inside the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_key: Option<String>,

    /// Session attribute holding the actor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_attribute: Option<String>,

    /// Properties never recorded
    #[serde(default, alias = "ignore")]
    pub ignored_properties: BTreeSet<String>,

    /// Properties whose values are redacted
    #[serde(default)]
    pub mask: BTreeSet<String>,

    /// Maximum characters of a recorded value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_length: Option<usize>,

    /// Stamp role overrides applied on top of the standard roles
    #[serde(default)]
    pub stamp: IndexMap<String, StampFieldOverride>,

    /// Host's audit-record type name, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_domain_class_name: Option<String>,

    #[serde(skip, default = "no_actor")]
    actor_resolver: Arc<dyn ActorResolver>,
}

fn no_actor() -> Arc<dyn ActorResolver> {
    Arc::new(NoActor)
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            transactional: false,
            actor_key: None,
            session_attribute: None,
            ignored_properties: ["version", "lastUpdated", "lastUpdatedBy"]
                .into_iter()
                .map(String::from)
                .collect(),
            mask: ["password"].into_iter().map(String::from).collect(),
            truncate_length: None,
            stamp: IndexMap::new(),
            audit_domain_class_name: None,
            actor_resolver: no_actor(),
        }
    }
}

impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("verbose", &self.verbose)
            .field("transactional", &self.transactional)
            .field("actor_key", &self.actor_key)
            .field("session_attribute", &self.session_attribute)
            .field("ignored_properties", &self.ignored_properties)
            .field("mask", &self.mask)
            .field("truncate_length", &self.truncate_length)
            .field("stamp", &self.stamp)
            .field("audit_domain_class_name", &self.audit_domain_class_name)
            .finish_non_exhaustive()
    }
}

impl AuditConfig {
    /// Replace the actor resolver
    pub fn with_actor_resolver(mut self, resolver: impl ActorResolver + 'static) -> Self {
        self.actor_resolver = Arc::new(resolver);
        self
    }

    /// Builder-style verbosity toggle
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Builder-style ignored-property list
    pub fn ignoring<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_properties = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn actor_resolver(&self) -> &dyn ActorResolver {
        self.actor_resolver.as_ref()
    }

    /// Current actor; resolver failures yield `None`
    pub fn resolve_actor(&self) -> Option<String> {
        resolve_or_absent(self.actor_resolver.as_ref())
    }

    pub fn is_ignored(&self, property: &str) -> bool {
        self.ignored_properties.contains(property)
    }

    pub fn is_masked(&self, property: &str) -> bool {
        self.mask.contains(property)
    }

    /// Stamp specification from the standard roles plus `stamp` overrides
    pub fn stamp_specification(&self) -> Result<StampSpecification> {
        StampSpecification::with_overrides(&self.stamp)
    }
}

/// Where a config document comes from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Inline JSON text
    Json(String),
    /// JSON file on disk
    File(PathBuf),
    /// Already-parsed document
    Value(serde_json::Value),
}

impl ConfigSource {
    /// Read the effective document, unwrapping the `auditLog` section if present
    pub fn read(&self) -> Result<serde_json::Value> {
        let doc = match self {
            ConfigSource::Json(text) => serde_json::from_str(text).map_err(|e| {
                AuditError::Config(format!("Failed to parse audit config: {}", e))
            })?,
            ConfigSource::File(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    AuditError::Config(format!(
                        "Failed to read audit config {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    AuditError::Config(format!(
                        "Failed to parse audit config {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            ConfigSource::Value(value) => value.clone(),
        };

        let doc = match doc {
            serde_json::Value::Object(mut map) if map.contains_key(SECTION) => {
                map.remove(SECTION).unwrap_or(serde_json::Value::Null)
            }
            other => other,
        };

        match doc {
            serde_json::Value::Object(mut map) => {
                // legacy key; merged documents must agree on one spelling
                if let Some(ignore) = map.remove("ignore") {
                    map.entry("ignoredProperties").or_insert(ignore);
                }
                Ok(serde_json::Value::Object(map))
            }
            serde_json::Value::Null => Ok(serde_json::json!({})),
            other => Err(AuditError::Config(format!(
                "Audit config must be an object, got {}",
                other
            ))),
        }
    }
}

/// Structural merge: `primary` wins, `secondary` fills absent keys
///
/// Objects merge key by key at every depth; any other value in `primary`
/// replaces the secondary value whole.
pub fn merge_documents(
    secondary: &serde_json::Value,
    primary: &serde_json::Value,
) -> serde_json::Value {
    match (secondary, primary) {
        (serde_json::Value::Object(base), serde_json::Value::Object(over)) => {
            let mut merged = base.clone();
            for (key, value) in over {
                let next = match base.get(key) {
                    Some(existing) => merge_documents(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            serde_json::Value::Object(merged)
        }
        (_, primary) => primary.clone(),
    }
}

struct StoreState {
    defaults: serde_json::Value,
    primary: serde_json::Value,
    resolver: Option<Arc<dyn ActorResolver>>,
    session: Option<Arc<dyn SessionSource>>,
}

impl StoreState {
    fn materialize(&self, primary: &serde_json::Value) -> Result<AuditConfig> {
        let doc = merge_documents(&self.defaults, primary);
        let mut config: AuditConfig = serde_json::from_value(doc)
            .map_err(|e| AuditError::Config(format!("Invalid audit config: {}", e)))?;
        config.stamp_specification().map_err(|e| {
            AuditError::Config(format!("Invalid stamp overrides in audit config: {}", e))
        })?;

        config.actor_resolver = match (&self.resolver, &self.session) {
            (Some(resolver), _) => resolver.clone(),
            (None, Some(session))
                if config.session_attribute.is_some() || config.actor_key.is_some() =>
            {
                Arc::new(SessionActorResolver::new(
                    session.clone(),
                    config.session_attribute.clone(),
                    config.actor_key.clone(),
                ))
            }
            _ => no_actor(),
        };

        Ok(config)
    }
}

/// Holder of the live audit config
///
/// Reads are lock-free. Writers serialize on an internal mutex and publish
/// a fully built config with a single swap.
pub struct ConfigStore {
    live: ArcSwap<AuditConfig>,
    state: Mutex<StoreState>,
}

impl ConfigStore {
    /// Create a store over a custom defaults document
    pub fn with_defaults(defaults: ConfigSource) -> Result<Self> {
        let state = StoreState {
            defaults: defaults.read()?,
            primary: serde_json::json!({}),
            resolver: None,
            session: None,
        };
        let config = state.materialize(&state.primary)?;
        Ok(Self {
            live: ArcSwap::from_pointee(config),
            state: Mutex::new(state),
        })
    }

    /// Materialize a config from `source` over the defaults without installing it
    pub fn load(&self, source: &ConfigSource) -> Result<AuditConfig> {
        let primary = source.read()?;
        let state = self.lock()?;
        state.materialize(&primary)
    }

    /// Replace the live config with one built from `source`
    ///
    /// On failure the previous config stays in effect.
    pub fn reload(&self, source: &ConfigSource) -> Result<()> {
        let primary = source.read()?;
        let mut state = self.lock()?;
        let config = state.materialize(&primary)?;
        state.primary = primary;
        self.publish(config);
        Ok(())
    }

    /// Current config snapshot
    pub fn current(&self) -> Arc<AuditConfig> {
        self.live.load_full()
    }

    /// Layer additional defaults underneath the existing ones
    ///
    /// Keys already present in the defaults or the primary document keep
    /// their values; the secondary document only fills gaps.
    pub fn load_secondary(&self, secondary: &ConfigSource) -> Result<()> {
        let extra = secondary.read()?;
        let mut state = self.lock()?;
        let defaults = merge_documents(&extra, &state.defaults);
        let previous = std::mem::replace(&mut state.defaults, defaults);
        match state.materialize(&state.primary) {
            Ok(config) => {
                self.publish(config);
                Ok(())
            }
            Err(e) => {
                state.defaults = previous;
                Err(e)
            }
        }
    }

    /// Drop the primary document, leaving only the defaults
    pub fn reset(&self) -> Result<()> {
        let mut state = self.lock()?;
        let config = state.materialize(&serde_json::json!({}))?;
        state.primary = serde_json::json!({});
        self.publish(config);
        Ok(())
    }

    /// Register the resolver used by every config this store builds
    pub fn set_actor_resolver(&self, resolver: impl ActorResolver + 'static) -> Result<()> {
        let mut state = self.lock()?;
        state.resolver = Some(Arc::new(resolver));
        let config = state.materialize(&state.primary)?;
        self.publish(config);
        Ok(())
    }

    /// Register the session used for `sessionAttribute`/`actorKey` resolution
    pub fn set_session_source(&self, session: Arc<dyn SessionSource>) -> Result<()> {
        let mut state = self.lock()?;
        state.session = Some(session);
        let config = state.materialize(&state.primary)?;
        self.publish(config);
        Ok(())
    }

    fn publish(&self, config: AuditConfig) {
        tracing::info!(
            verbose = config.verbose,
            transactional = config.transactional,
            ignored = config.ignored_properties.len(),
            masked = config.mask.len(),
            "Audit config loaded"
        );
        self.live.store(Arc::new(config));
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|e| AuditError::Config(format!("Failed to acquire config lock: {}", e)))
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        let state = StoreState {
            defaults: default_document(),
            primary: serde_json::json!({}),
            resolver: None,
            session: None,
        };
        Self {
            live: ArcSwap::from_pointee(AuditConfig::default()),
            state: Mutex::new(state),
        }
    }
}

static GLOBAL: OnceLock<ConfigStore> = OnceLock::new();

/// Process-wide config store, initialized with the built-in defaults
pub fn global() -> &'static ConfigStore {
    GLOBAL.get_or_init(ConfigStore::default)
}

/// Materialize a config with the process-wide store, without installing it
pub fn load(source: &ConfigSource) -> Result<AuditConfig> {
    global().load(source)
}

/// Atomically replace the process-wide config
pub fn reload(source: &ConfigSource) -> Result<()> {
    global().reload(source)
}

/// Process-wide config snapshot
pub fn current() -> Arc<AuditConfig> {
    global().current()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::StaticActor;
    use serde_json::json;

    #[test]
    fn test_default_matches_default_document() {
        let store = ConfigStore::with_defaults(ConfigSource::Value(default_document())).unwrap();
        let built = store.current();
        let fallback = AuditConfig::default();

        assert_eq!(built.verbose, fallback.verbose);
        assert_eq!(built.transactional, fallback.transactional);
        assert_eq!(built.ignored_properties, fallback.ignored_properties);
        assert_eq!(built.mask, fallback.mask);
    }

    #[test]
    fn test_merge_primary_wins_nested() {
        let secondary = json!({
            "verbose": false,
            "stamp": {"createdBy": {"nullable": true, "sqlType": "varchar(32)"}},
            "mask": ["password"]
        });
        let primary = json!({
            "verbose": true,
            "stamp": {"createdBy": {"nullable": false}},
            "mask": []
        });

        let merged = merge_documents(&secondary, &primary);
        assert_eq!(merged["verbose"], true);
        assert_eq!(merged["stamp"]["createdBy"]["nullable"], false);
        assert_eq!(merged["stamp"]["createdBy"]["sqlType"], "varchar(32)");
        assert_eq!(merged["mask"], json!([]));
    }

    #[test]
    fn test_load_does_not_install() {
        let store = ConfigStore::default();
        let loaded = store
            .load(&ConfigSource::Json(r#"{"verbose": true}"#.to_string()))
            .unwrap();
        assert!(loaded.verbose);
        assert!(!store.current().verbose);
    }

    #[test]
    fn test_reload_installs_and_keeps_defaults() {
        let store = ConfigStore::default();
        store
            .reload(&ConfigSource::Value(json!({"verbose": true, "truncateLength": 12})))
            .unwrap();

        let config = store.current();
        assert!(config.verbose);
        assert_eq!(config.truncate_length, Some(12));
        assert!(config.is_ignored("version"));
        assert!(config.is_masked("password"));
    }

    #[test]
    fn test_section_is_unwrapped() {
        let store = ConfigStore::default();
        store
            .reload(&ConfigSource::Json(
                r#"{"auditLog": {"transactional": true, "ignore": ["status"]}}"#.to_string(),
            ))
            .unwrap();

        let config = store.current();
        assert!(config.transactional);
        assert!(config.is_ignored("status"));
        assert!(!config.is_ignored("version"));
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let store = ConfigStore::default();
        store
            .reload(&ConfigSource::Value(json!({"verbose": true})))
            .unwrap();

        let err = store.reload(&ConfigSource::Json("{not json".to_string()));
        assert!(matches!(err, Err(AuditError::Config(_))));

        let err = store.reload(&ConfigSource::Value(json!({"verbose": "loud"})));
        assert!(matches!(err, Err(AuditError::Config(_))));

        let err = store.reload(&ConfigSource::Value(json!([1, 2])));
        assert!(err.is_err());

        assert!(store.current().verbose);
    }

    #[test]
    fn test_reload_rejects_conflicting_stamp_overrides() {
        let store = ConfigStore::default();
        store
            .reload(&ConfigSource::Value(json!({"verbose": true})))
            .unwrap();

        let err = store.reload(&ConfigSource::Value(json!({
            "stamp": {"lastUpdated": {"name": "dateCreated"}}
        })));
        assert!(matches!(err, Err(AuditError::Config(_))));

        let err = store.load(&ConfigSource::Value(json!({
            "stamp": {"removed": {"nullable": true}}
        })));
        assert!(matches!(err, Err(AuditError::Config(_))));

        let err = store.load_secondary(&ConfigSource::Value(json!({
            "stamp": {"createdBy": {"name": "dateCreated"}}
        })));
        assert!(matches!(err, Err(AuditError::Config(_))));

        let config = store.current();
        assert!(config.verbose);
        assert!(config.stamp_specification().is_ok());
    }

    #[test]
    fn test_reload_is_idempotent() {
        let store = ConfigStore::default();
        let source = ConfigSource::Value(json!({"verbose": true, "mask": ["ssn"]}));
        store.reload(&source).unwrap();
        let first = store.current();
        store.reload(&source).unwrap();
        let second = store.current();

        assert_eq!(first.verbose, second.verbose);
        assert_eq!(first.mask, second.mask);
    }

    #[test]
    fn test_load_secondary_fills_gaps_only() {
        let store = ConfigStore::default();
        store
            .reload(&ConfigSource::Value(json!({"verbose": true})))
            .unwrap();
        store
            .load_secondary(&ConfigSource::Value(json!({
                "verbose": false,
                "truncateLength": 255,
                "mask": ["ssn"]
            })))
            .unwrap();

        let config = store.current();
        assert!(config.verbose);
        assert_eq!(config.truncate_length, Some(255));
        // existing defaults win over the secondary document
        assert!(config.is_masked("password"));
        assert!(!config.is_masked("ssn"));
    }

    #[test]
    fn test_reset_returns_to_defaults() {
        let store = ConfigStore::default();
        store
            .reload(&ConfigSource::Value(json!({"verbose": true})))
            .unwrap();
        store.reset().unwrap();
        assert!(!store.current().verbose);
    }

    #[test]
    fn test_registered_resolver_survives_reload() {
        let store = ConfigStore::default();
        store.set_actor_resolver(StaticActor::new("system")).unwrap();
        store
            .reload(&ConfigSource::Value(json!({"verbose": true})))
            .unwrap();
        assert_eq!(store.current().resolve_actor(), Some("system".to_string()));
    }

    #[test]
    fn test_session_resolver_selected_from_keys() {
        struct Session;
        impl SessionSource for Session {
            fn attribute(&self, name: &str) -> Result<Option<serde_json::Value>> {
                Ok((name == "user").then(|| json!("carol")))
            }
        }

        let store = ConfigStore::default();
        store.set_session_source(Arc::new(Session)).unwrap();
        assert_eq!(store.current().resolve_actor(), None);

        store
            .reload(&ConfigSource::Value(json!({"sessionAttribute": "user"})))
            .unwrap();
        assert_eq!(store.current().resolve_actor(), Some("carol".to_string()));
    }

    #[test]
    fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        std::fs::write(&path, r#"{"auditLog": {"verbose": true}}"#).unwrap();

        let config = ConfigStore::default()
            .load(&ConfigSource::File(path))
            .unwrap();
        assert!(config.verbose);

        let missing = ConfigStore::default()
            .load(&ConfigSource::File(dir.path().join("missing.json")));
        assert!(matches!(missing, Err(AuditError::Config(_))));
    }

    #[test]
    fn test_stamp_overrides_from_config() {
        let config = ConfigStore::default()
            .load(&ConfigSource::Value(json!({
                "stamp": {"lastUpdatedBy": {"exclude": true}}
            })))
            .unwrap();
        let spec = config.stamp_specification().unwrap();
        assert_eq!(spec.len(), 3);
        assert!(!spec.is_stamp_field("lastUpdatedBy"));
    }

    #[test]
    fn test_builder_helpers() {
        let config = AuditConfig::default()
            .verbose(true)
            .ignoring(["status"])
            .with_actor_resolver(StaticActor::new("alice"));
        assert!(config.verbose);
        assert!(config.is_ignored("status"));
        assert!(!config.is_ignored("version"));
        assert_eq!(config.resolve_actor(), Some("alice".to_string()));
    }
}
