//! Entity stamper: writes stamp fields at lifecycle transitions

use crate::entity::{Auditable, StampValue};
use crate::error::{AuditError, Result};
use crate::stamp::{StampFieldType, StampRole, StampSpecification};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase a stamp is applied in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StampPhase {
    BeforeInsert,
    BeforeUpdate,
}

/// Apply a stamp specification at the current instant
pub fn stamp<E: Auditable + ?Sized>(
    entity: &mut E,
    spec: &StampSpecification,
    phase: StampPhase,
    actor: Option<&str>,
) -> Result<()> {
    stamp_at(entity, spec, phase, actor, Utc::now())
}

/// Apply a stamp specification at a given instant
///
/// Only the fields named by `spec` are written. Required actor fields are
/// checked before anything is written, so a `MissingActor` failure leaves
/// the entity untouched.
pub fn stamp_at<E: Auditable + ?Sized>(
    entity: &mut E,
    spec: &StampSpecification,
    phase: StampPhase,
    actor: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let actor_roles = match phase {
        StampPhase::BeforeInsert => vec![StampRole::CreatedBy, StampRole::LastUpdatedBy],
        StampPhase::BeforeUpdate => vec![StampRole::LastUpdatedBy],
    };

    if actor.is_none() {
        for role in &actor_roles {
            if let Some(field) = spec.field(role) {
                // an update keeps the existing lastUpdatedBy when no actor is known
                let already_set = phase == StampPhase::BeforeUpdate
                    && entity.stamp(&field.name).is_some();
                if !field.nullable && !already_set {
                    return Err(AuditError::MissingActor {
                        entity_type: entity.entity_type().to_string(),
                        field: field.name.clone(),
                    });
                }
            }
        }
    }

    match phase {
        StampPhase::BeforeInsert => {
            for role in [StampRole::DateCreated, StampRole::LastUpdated] {
                if let Some(name) = spec.field_name(&role) {
                    entity.set_stamp(name, StampValue::Timestamp(now));
                }
            }
            if let Some(actor) = actor {
                for role in &actor_roles {
                    if let Some(name) = spec.field_name(role) {
                        entity.set_stamp(name, StampValue::Actor(actor.to_string()));
                    }
                }
            }
            for (_, field) in spec.iter() {
                if field.field_type == StampFieldType::Flag && entity.stamp(&field.name).is_none() {
                    entity.set_stamp(&field.name, StampValue::Flag(false));
                }
            }
        }
        StampPhase::BeforeUpdate => {
            if let Some(name) = spec.field_name(&StampRole::LastUpdated) {
                entity.set_stamp(name, StampValue::Timestamp(now));
            }
            if let (Some(actor), Some(name)) = (actor, spec.field_name(&StampRole::LastUpdatedBy)) {
                entity.set_stamp(name, StampValue::Actor(actor.to_string()));
            }
        }
    }

    tracing::debug!(
        entity_type = %entity.entity_type(),
        entity_id = %entity.entity_id(),
        phase = ?phase,
        actor = actor.unwrap_or("-"),
        "Entity stamped"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use crate::stamp::{StampFieldOverride, StampFieldSpec};
    use chrono::{Duration, TimeZone};
    use indexmap::IndexMap;

    fn default_spec() -> StampSpecification {
        StampSpecification::with_overrides(&IndexMap::new()).unwrap()
    }

    fn strict_spec() -> StampSpecification {
        let mut named = IndexMap::new();
        named.insert(
            "createdBy".to_string(),
            StampFieldOverride {
                nullable: Some(false),
                ..Default::default()
            },
        );
        StampSpecification::with_overrides(&named).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_sets_all_four_fields() {
        let mut order = Record::new("Order", "1");
        stamp_at(&mut order, &default_spec(), StampPhase::BeforeInsert, Some("alice"), t0())
            .unwrap();

        assert_eq!(order.stamp("dateCreated"), Some(StampValue::Timestamp(t0())));
        assert_eq!(order.stamp("lastUpdated"), order.stamp("dateCreated"));
        assert_eq!(order.stamp("createdBy"), Some(StampValue::Actor("alice".into())));
        assert_eq!(order.stamp("lastUpdatedBy"), Some(StampValue::Actor("alice".into())));
    }

    #[test]
    fn test_insert_without_actor_leaves_nullable_fields_unset() {
        let mut order = Record::new("Order", "1");
        stamp(&mut order, &default_spec(), StampPhase::BeforeInsert, None).unwrap();

        assert!(order.stamp("dateCreated").is_some());
        assert!(order.stamp("createdBy").is_none());
        assert!(order.stamp("lastUpdatedBy").is_none());
    }

    #[test]
    fn test_update_keeps_creation_stamps() {
        let mut order = Record::new("Order", "1");
        stamp_at(&mut order, &default_spec(), StampPhase::BeforeInsert, Some("alice"), t0())
            .unwrap();

        let later = t0() + Duration::hours(2);
        stamp_at(&mut order, &default_spec(), StampPhase::BeforeUpdate, Some("bob"), later)
            .unwrap();

        assert_eq!(order.stamp("dateCreated"), Some(StampValue::Timestamp(t0())));
        assert_eq!(order.stamp("createdBy"), Some(StampValue::Actor("alice".into())));
        assert_eq!(order.stamp("lastUpdated"), Some(StampValue::Timestamp(later)));
        assert_eq!(order.stamp("lastUpdatedBy"), Some(StampValue::Actor("bob".into())));
    }

    #[test]
    fn test_update_without_actor_keeps_last_updated_by() {
        let mut order = Record::new("Order", "1");
        stamp_at(&mut order, &default_spec(), StampPhase::BeforeInsert, Some("alice"), t0())
            .unwrap();
        stamp(&mut order, &default_spec(), StampPhase::BeforeUpdate, None).unwrap();

        assert_eq!(order.stamp("lastUpdatedBy"), Some(StampValue::Actor("alice".into())));
    }

    #[test]
    fn test_missing_required_actor_fails_without_writes() {
        let mut order = Record::new("Order", "9");
        let err = stamp(&mut order, &strict_spec(), StampPhase::BeforeInsert, None).unwrap_err();

        match err {
            AuditError::MissingActor { entity_type, field } => {
                assert_eq!(entity_type, "Order");
                assert_eq!(field, "createdBy");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(order.stamps.is_empty());
    }

    #[test]
    fn test_required_creator_not_checked_on_update() {
        let mut order = Record::new("Order", "9");
        stamp(&mut order, &strict_spec(), StampPhase::BeforeUpdate, None).unwrap();
        assert!(order.stamp("lastUpdated").is_some());
    }

    #[test]
    fn test_update_without_actor_fails_when_required_updater_never_set() {
        let mut named = IndexMap::new();
        named.insert(
            "lastUpdatedBy".to_string(),
            StampFieldOverride {
                nullable: Some(false),
                ..Default::default()
            },
        );
        let spec = StampSpecification::with_overrides(&named).unwrap();

        let mut order = Record::new("Order", "5");
        let err = stamp(&mut order, &spec, StampPhase::BeforeUpdate, None).unwrap_err();
        assert!(
            matches!(err, AuditError::MissingActor { ref field, .. } if field == "lastUpdatedBy")
        );
        assert!(order.stamp("lastUpdated").is_none());

        order.set_stamp("lastUpdatedBy", StampValue::Actor("alice".into()));
        stamp(&mut order, &spec, StampPhase::BeforeUpdate, None).unwrap();
        assert!(order.stamp("lastUpdated").is_some());
        assert_eq!(order.stamp("lastUpdatedBy"), Some(StampValue::Actor("alice".into())));
    }

    #[test]
    fn test_excluded_and_renamed_fields() {
        let mut named = IndexMap::new();
        named.insert("lastUpdatedBy".to_string(), StampFieldOverride::exclude());
        named.insert("dateCreated".to_string(), StampFieldOverride::rename("createdAt"));
        let spec = StampSpecification::with_overrides(&named).unwrap();

        let mut order = Record::new("Order", "1").with("status", "NEW");
        stamp(&mut order, &spec, StampPhase::BeforeInsert, Some("alice")).unwrap();

        assert!(order.stamp("createdAt").is_some());
        assert!(order.stamp("dateCreated").is_none());
        assert!(order.stamp("lastUpdatedBy").is_none());
        assert_eq!(order.get("status"), Some(&serde_json::json!("NEW")));
    }

    #[test]
    fn test_flag_initialized_on_insert_only_when_unset() {
        let mut roles = StampSpecification::default_roles();
        roles.insert(
            StampRole::from("removed"),
            StampFieldSpec::new("removed", StampFieldType::Flag),
        );
        let spec = StampSpecification::build(roles, &IndexMap::new()).unwrap();

        let mut fresh = Record::new("Doc", "1");
        stamp(&mut fresh, &spec, StampPhase::BeforeInsert, None).unwrap();
        assert_eq!(fresh.stamp("removed"), Some(StampValue::Flag(false)));

        let mut preset = Record::new("Doc", "2");
        preset.set_stamp("removed", StampValue::Flag(true));
        stamp(&mut preset, &spec, StampPhase::BeforeInsert, None).unwrap();
        assert_eq!(preset.stamp("removed"), Some(StampValue::Flag(true)));
    }

    #[test]
    fn test_custom_fields_untouched() {
        let mut roles = StampSpecification::default_roles();
        roles.insert(
            StampRole::from("tenant"),
            StampFieldSpec::new("tenant", StampFieldType::Custom),
        );
        let spec = StampSpecification::build(roles, &IndexMap::new()).unwrap();

        let mut order = Record::new("Order", "1");
        stamp(&mut order, &spec, StampPhase::BeforeInsert, Some("alice")).unwrap();
        assert!(order.stamp("tenant").is_none());
    }
}
