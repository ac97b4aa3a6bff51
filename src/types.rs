//! Core audit event types
//!
//! All types use camelCase JSON serialization for wire compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle transition an audit event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditEventType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditEventType::Insert => "INSERT",
            AuditEventType::Update => "UPDATE",
            AuditEventType::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A single audit record
///
/// Property-level when `property_name` is set, entity-level (summary)
/// otherwise. Immutable once built; fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unique event identifier (aud-<uuid>)
    id: String,

    entity_type: String,

    entity_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    property_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_value: Option<String>,

    event_type: AuditEventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    actor: Option<String>,

    timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Entity-level event with no property detail
    pub fn summary(
        event_type: AuditEventType,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        actor: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("aud-{}", uuid::Uuid::new_v4()),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            property_name: None,
            old_value: None,
            new_value: None,
            event_type,
            actor,
            timestamp,
        }
    }

    /// Property-level event
    #[allow(clippy::too_many_arguments)]
    pub fn property(
        event_type: AuditEventType,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        property_name: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
        actor: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            property_name: Some(property_name.into()),
            old_value,
            new_value,
            ..Self::summary(event_type, entity_type, entity_id, actor, timestamp)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn property_name(&self) -> Option<&str> {
        self.property_name.as_deref()
    }

    pub fn old_value(&self) -> Option<&str> {
        self.old_value.as_deref()
    }

    pub fn new_value(&self) -> Option<&str> {
        self.new_value.as_deref()
    }

    pub fn event_type(&self) -> AuditEventType {
        self.event_type
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether this event carries no property detail
    pub fn is_summary(&self) -> bool {
        self.property_name.is_none()
    }
}
