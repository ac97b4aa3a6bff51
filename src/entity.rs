//! Auditable entity capability
//!
//! The audit subsystem never owns entities. It reads their identity and
//! property values, and writes only the stamp fields a specification names.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Property name → value, in the entity's declared property order
pub type Snapshot = IndexMap<String, serde_json::Value>;

/// A value written into a stamp field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum StampValue {
    /// Point in time (dateCreated, lastUpdated)
    Timestamp(DateTime<Utc>),
    /// Actor identity (createdBy, lastUpdatedBy)
    Actor(String),
    /// Boolean marker (e.g. `removed`)
    Flag(bool),
    /// Host-defined value
    Custom(serde_json::Value),
}

impl StampValue {
    /// JSON form used when the stamp shows up as an ordinary property
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StampValue::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            StampValue::Actor(actor) => serde_json::Value::String(actor.clone()),
            StampValue::Flag(flag) => serde_json::Value::Bool(*flag),
            StampValue::Custom(value) => value.clone(),
        }
    }

    /// The timestamp, if this is a timestamp stamp
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            StampValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// The actor, if this is an actor stamp
    pub fn as_actor(&self) -> Option<&str> {
        match self {
            StampValue::Actor(actor) => Some(actor),
            _ => None,
        }
    }
}

/// Capability every stamped or audited entity exposes
///
/// Implemented by the host's domain types. `properties()` must return values
/// in a stable, declared order; the recorder emits events in that order.
pub trait Auditable {
    /// Entity type name (e.g. "Order")
    fn entity_type(&self) -> &str;

    /// Stable identifier of this instance
    fn entity_id(&self) -> String;

    /// Current property values in declared order
    fn properties(&self) -> Snapshot;

    /// Read a stamp field, `None` when unset
    fn stamp(&self, field: &str) -> Option<StampValue>;

    /// Write a stamp field
    fn set_stamp(&mut self, field: &str, value: StampValue);

    /// Capture the state used as `previousSnapshot` for a later update
    fn snapshot(&self) -> Snapshot {
        self.properties()
    }
}

/// Dynamic entity backed by ordered maps
///
/// Useful for hosts whose persistence layer hands out untyped rows, and for
/// tests. Stamp fields are listed after the ordinary properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub entity_type: String,
    pub id: String,
    #[serde(default)]
    pub properties: Snapshot,
    #[serde(default)]
    pub stamps: IndexMap<String, StampValue>,
}

impl Record {
    /// Create an empty record
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            properties: Snapshot::new(),
            stamps: IndexMap::new(),
        }
    }

    /// Add or replace a property, keeping its original position
    pub fn with(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set a property in place
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Read a property
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }
}

impl Auditable for Record {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn entity_id(&self) -> String {
        self.id.clone()
    }

    fn properties(&self) -> Snapshot {
        let mut all = self.properties.clone();
        for (field, value) in &self.stamps {
            all.insert(field.clone(), value.to_json());
        }
        all
    }

    fn stamp(&self, field: &str) -> Option<StampValue> {
        self.stamps.get(field).cloned()
    }

    fn set_stamp(&mut self, field: &str, value: StampValue) {
        self.stamps.insert(field.to_string(), value);
    }
}
