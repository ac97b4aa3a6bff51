//! Audit recorder: turns lifecycle notifications into audit events
//!
//! The recorder is stateless apart from an optional value sealer. Each entry
//! point resolves the actor once, stamps every event of the transition with
//! the same instant, and emits events in the entity's property order.

use crate::config::AuditConfig;
use crate::crypto::ValueEncryptor;
use crate::entity::{Auditable, Snapshot};
use crate::types::{AuditEvent, AuditEventType};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Replacement text for masked values
pub const MASK: &str = "**********";

/// Builds audit events from entity state
#[derive(Clone, Default)]
pub struct AuditRecorder {
    encryptor: Option<Arc<dyn ValueEncryptor>>,
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seal masked values instead of redacting them
    pub fn with_encryptor(encryptor: Arc<dyn ValueEncryptor>) -> Self {
        Self {
            encryptor: Some(encryptor),
        }
    }

    /// Events for a freshly inserted entity
    pub fn on_insert<E: Auditable + ?Sized>(
        &self,
        entity: &E,
        config: &AuditConfig,
    ) -> Vec<AuditEvent> {
        self.whole_entity(entity, config, AuditEventType::Insert)
    }

    /// Events for an entity about to be deleted
    pub fn on_delete<E: Auditable + ?Sized>(
        &self,
        entity: &E,
        config: &AuditConfig,
    ) -> Vec<AuditEvent> {
        self.whole_entity(entity, config, AuditEventType::Delete)
    }

    /// Events for the properties that changed since `previous`
    ///
    /// Values compare by equality. Properties missing on one side count as
    /// null. Nothing is emitted when no recorded property changed.
    pub fn on_update<E: Auditable + ?Sized>(
        &self,
        entity: &E,
        previous: &Snapshot,
        config: &AuditConfig,
    ) -> Vec<AuditEvent> {
        let actor = config.resolve_actor();
        let now = Utc::now();
        let current = entity.properties();
        let null = serde_json::Value::Null;

        let mut changes: Vec<(&str, &serde_json::Value, &serde_json::Value)> = Vec::new();
        for (name, new) in &current {
            if config.is_ignored(name) {
                continue;
            }
            let old = previous.get(name).unwrap_or(&null);
            if old != new {
                changes.push((name.as_str(), old, new));
            }
        }
        for (name, old) in previous {
            if config.is_ignored(name) || current.contains_key(name) || old.is_null() {
                continue;
            }
            changes.push((name.as_str(), old, &null));
        }

        if changes.is_empty() {
            return Vec::new();
        }

        let events = if config.verbose {
            changes
                .into_iter()
                .map(|(name, old, new)| {
                    AuditEvent::property(
                        AuditEventType::Update,
                        entity.entity_type(),
                        entity.entity_id(),
                        name,
                        self.render(name, old, config),
                        self.render(name, new, config),
                        actor.clone(),
                        now,
                    )
                })
                .collect()
        } else {
            vec![AuditEvent::summary(
                AuditEventType::Update,
                entity.entity_type(),
                entity.entity_id(),
                actor,
                now,
            )]
        };

        log_recorded(entity, AuditEventType::Update, &events);
        events
    }

    fn whole_entity<E: Auditable + ?Sized>(
        &self,
        entity: &E,
        config: &AuditConfig,
        event_type: AuditEventType,
    ) -> Vec<AuditEvent> {
        let actor = config.resolve_actor();
        let now = Utc::now();

        let events = if config.verbose {
            self.per_property(entity, config, event_type, actor, now)
        } else {
            vec![AuditEvent::summary(
                event_type,
                entity.entity_type(),
                entity.entity_id(),
                actor,
                now,
            )]
        };

        log_recorded(entity, event_type, &events);
        events
    }

    fn per_property<E: Auditable + ?Sized>(
        &self,
        entity: &E,
        config: &AuditConfig,
        event_type: AuditEventType,
        actor: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<AuditEvent> {
        entity
            .properties()
            .iter()
            .filter(|(name, value)| !config.is_ignored(name) && !value.is_null())
            .map(|(name, value)| {
                let rendered = self.render(name, value, config);
                let (old, new) = match event_type {
                    AuditEventType::Delete => (rendered, None),
                    _ => (None, rendered),
                };
                AuditEvent::property(
                    event_type,
                    entity.entity_type(),
                    entity.entity_id(),
                    name.as_str(),
                    old,
                    new,
                    actor.clone(),
                    now,
                )
            })
            .collect()
    }

    /// String form of a value after masking and truncation
    fn render(&self, property: &str, value: &serde_json::Value, config: &AuditConfig) -> Option<String> {
        let text = match value {
            serde_json::Value::Null => return None,
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        if config.is_masked(property) {
            return Some(self.mask(property, &text));
        }

        match config.truncate_length {
            Some(limit) if text.chars().count() > limit => Some(text.chars().take(limit).collect()),
            _ => Some(text),
        }
    }

    fn mask(&self, property: &str, text: &str) -> String {
        let Some(encryptor) = &self.encryptor else {
            return MASK.to_string();
        };
        match encryptor.seal(property, text) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(property = %property, error = %e, "Failed to seal masked value, redacting");
                MASK.to_string()
            }
        }
    }
}

fn log_recorded<E: Auditable + ?Sized>(entity: &E, event_type: AuditEventType, events: &[AuditEvent]) {
    tracing::debug!(
        entity_type = %entity.entity_type(),
        entity_id = %entity.entity_id(),
        event_type = %event_type,
        count = events.len(),
        "Audit events recorded"
    );
}
