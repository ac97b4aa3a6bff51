//! Stamp specifications: which stamp fields an entity type carries
//!
//! A `StampSpecification` is built once per entity type by merging role
//! defaults with explicit overrides, then shared read-only by every instance.
//! It also derives the persistence metadata a stamped type needs: fields,
//! accessors, constraints and column mappings. Excluded roles derive nothing.

use crate::entity::Auditable;
use crate::error::{AuditError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical role a stamp field plays
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StampRole {
    DateCreated,
    LastUpdated,
    CreatedBy,
    LastUpdatedBy,
    /// Any host-defined role (e.g. "removed")
    Custom(String),
}

impl StampRole {
    /// Role name as written in documents and overrides
    pub fn as_str(&self) -> &str {
        match self {
            StampRole::DateCreated => "dateCreated",
            StampRole::LastUpdated => "lastUpdated",
            StampRole::CreatedBy => "createdBy",
            StampRole::LastUpdatedBy => "lastUpdatedBy",
            StampRole::Custom(name) => name,
        }
    }
}

impl From<&str> for StampRole {
    fn from(name: &str) -> Self {
        match name {
            "dateCreated" => StampRole::DateCreated,
            "lastUpdated" => StampRole::LastUpdated,
            "createdBy" => StampRole::CreatedBy,
            "lastUpdatedBy" => StampRole::LastUpdatedBy,
            other => StampRole::Custom(other.to_string()),
        }
    }
}

impl From<String> for StampRole {
    fn from(name: String) -> Self {
        StampRole::from(name.as_str())
    }
}

impl From<StampRole> for String {
    fn from(role: StampRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for StampRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value kind stored in a stamp field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StampFieldType {
    Timestamp,
    ActorId,
    Flag,
    Custom,
}

/// One stamp field, fully resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampFieldSpec {
    /// Materialized field name on the entity
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: StampFieldType,

    pub nullable: bool,

    #[serde(default)]
    pub excluded: bool,

    /// Column type for the persistence mapping, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
}

impl StampFieldSpec {
    /// Create a nullable, non-excluded field
    pub fn new(name: impl Into<String>, field_type: StampFieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            excluded: false,
            sql_type: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn excluded(mut self, excluded: bool) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }
}

/// Partial field spec; every present attribute replaces the default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampFieldOverride {
    /// Rename of the materialized field
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "fieldname")]
    pub name: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<StampFieldType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "exclude")]
    pub excluded: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
}

impl StampFieldOverride {
    /// Override that excludes the role
    pub fn exclude() -> Self {
        Self {
            excluded: Some(true),
            ..Default::default()
        }
    }

    /// Override that renames the field
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    fn apply(&self, mut base: StampFieldSpec) -> StampFieldSpec {
        if let Some(name) = &self.name {
            base.name = name.clone();
        }
        if let Some(field_type) = self.field_type {
            base.field_type = field_type;
        }
        if let Some(nullable) = self.nullable {
            base.nullable = nullable;
        }
        if let Some(excluded) = self.excluded {
            base.excluded = excluded;
        }
        if self.sql_type.is_some() {
            base.sql_type = self.sql_type.clone();
        }
        base
    }
}

/// Getter/setter pair a stamped type exposes for one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessor {
    pub field: String,
    /// `getX`, or `isX` for flag fields
    pub getter: String,
    pub setter: String,
}

/// Validation constraint for one stamp field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConstraint {
    pub field: String,
    pub nullable: bool,
    /// Blank values allowed; mirrors `nullable`
    pub blank: bool,
}

/// Column mapping for one stamp field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub field: String,
    pub sql_type: String,
}

/// Ordered role → field mapping for one entity type
///
/// Only holds non-excluded roles. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampSpecification {
    fields: IndexMap<StampRole, StampFieldSpec>,
}

impl StampSpecification {
    /// Standard role defaults
    ///
    /// Timestamps are required; actor fields are nullable so anonymous
    /// transitions can still be stamped.
    pub fn default_roles() -> IndexMap<StampRole, StampFieldSpec> {
        let mut roles = IndexMap::new();
        roles.insert(
            StampRole::DateCreated,
            StampFieldSpec::new("dateCreated", StampFieldType::Timestamp).nullable(false),
        );
        roles.insert(
            StampRole::LastUpdated,
            StampFieldSpec::new("lastUpdated", StampFieldType::Timestamp).nullable(false),
        );
        roles.insert(
            StampRole::CreatedBy,
            StampFieldSpec::new("createdBy", StampFieldType::ActorId),
        );
        roles.insert(
            StampRole::LastUpdatedBy,
            StampFieldSpec::new("lastUpdatedBy", StampFieldType::ActorId),
        );
        roles
    }

    /// Merge role defaults with overrides
    ///
    /// Overrides for roles absent from the defaults add a new role only when
    /// they carry a type. Fails with `Conflict` when two kept roles resolve
    /// to the same field name.
    pub fn build(
        role_defaults: IndexMap<StampRole, StampFieldSpec>,
        overrides: &IndexMap<StampRole, StampFieldOverride>,
    ) -> Result<Self> {
        let mut merged = role_defaults;

        for (role, over) in overrides {
            let resolved = match merged.get(role) {
                Some(base) => over.apply(base.clone()),
                None => {
                    let field_type = over
                        .field_type
                        .ok_or_else(|| AuditError::UnknownStampRole(role.to_string()))?;
                    let base = StampFieldSpec::new(role.as_str(), field_type);
                    over.apply(base)
                }
            };
            merged.insert(role.clone(), resolved);
        }

        let mut fields: IndexMap<StampRole, StampFieldSpec> = IndexMap::new();
        for (role, spec) in merged {
            if spec.excluded {
                continue;
            }
            if let Some((other, _)) = fields.iter().find(|(_, s)| s.name == spec.name) {
                return Err(AuditError::Conflict {
                    field: spec.name.clone(),
                    first: other.to_string(),
                    second: role.to_string(),
                });
            }
            fields.insert(role, spec);
        }

        tracing::debug!(
            roles = ?fields.keys().map(StampRole::as_str).collect::<Vec<_>>(),
            "Stamp specification built"
        );

        Ok(Self { fields })
    }

    /// Build from the standard roles with overrides keyed by role name
    pub fn with_overrides(overrides: &IndexMap<String, StampFieldOverride>) -> Result<Self> {
        let keyed: IndexMap<StampRole, StampFieldOverride> = overrides
            .iter()
            .map(|(role, over)| (StampRole::from(role.as_str()), over.clone()))
            .collect();
        Self::build(Self::default_roles(), &keyed)
    }

    /// Field spec for a role, `None` when the role is excluded or unknown
    pub fn field(&self, role: &StampRole) -> Option<&StampFieldSpec> {
        self.fields.get(role)
    }

    /// Materialized field name for a role
    pub fn field_name(&self, role: &StampRole) -> Option<&str> {
        self.fields.get(role).map(|spec| spec.name.as_str())
    }

    /// Iterate roles and fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&StampRole, &StampFieldSpec)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether a property name is one of the materialized stamp fields
    pub fn is_stamp_field(&self, name: &str) -> bool {
        self.fields.values().any(|spec| spec.name == name)
    }

    /// Materialized field names in declaration order
    pub fn materialized_fields(&self) -> Vec<&str> {
        self.fields.values().map(|spec| spec.name.as_str()).collect()
    }

    /// Accessors the stamped type exposes
    pub fn accessors(&self) -> Vec<Accessor> {
        self.fields
            .values()
            .map(|spec| {
                let cap = capitalize(&spec.name);
                let prefix = match spec.field_type {
                    StampFieldType::Flag => "is",
                    _ => "get",
                };
                Accessor {
                    field: spec.name.clone(),
                    getter: format!("{}{}", prefix, cap),
                    setter: format!("set{}", cap),
                }
            })
            .collect()
    }

    /// Constraint declarations, one per field
    pub fn constraints(&self) -> Vec<FieldConstraint> {
        self.fields
            .values()
            .map(|spec| FieldConstraint {
                field: spec.name.clone(),
                nullable: spec.nullable,
                blank: spec.nullable,
            })
            .collect()
    }

    /// Column mappings for fields with an explicit column type
    pub fn mapping(&self) -> Vec<MappingEntry> {
        self.fields
            .values()
            .filter_map(|spec| {
                spec.sql_type.as_ref().map(|sql_type| MappingEntry {
                    field: spec.name.clone(),
                    sql_type: sql_type.clone(),
                })
            })
            .collect()
    }

    /// Role name → field name markers
    pub fn property_markers(&self) -> IndexMap<String, String> {
        self.fields
            .iter()
            .map(|(role, spec)| (role.to_string(), spec.name.clone()))
            .collect()
    }

    /// Check that every non-nullable stamp field is set
    ///
    /// Returns the first missing field name.
    pub fn validate<E: Auditable + ?Sized>(&self, entity: &E) -> std::result::Result<(), String> {
        for spec in self.fields.values() {
            if !spec.nullable && entity.stamp(&spec.name).is_none() {
                return Err(spec.name.clone());
            }
        }
        Ok(())
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
