//! Actor resolution: who is responsible for a lifecycle transition
//!
//! Hosts supply an `ActorResolver`. Resolution failures never abort an
//! audit; callers treat them as "no actor".

use crate::error::{AuditError, Result};
use std::sync::Arc;

/// Resolves the identity of the current actor
pub trait ActorResolver: Send + Sync {
    /// Current actor, `Ok(None)` when nobody is acting
    fn resolve(&self) -> Result<Option<String>>;
}

impl<F> ActorResolver for F
where
    F: Fn() -> Result<Option<String>> + Send + Sync,
{
    fn resolve(&self) -> Result<Option<String>> {
        self()
    }
}

/// Resolver that never yields an actor
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActor;

impl ActorResolver for NoActor {
    fn resolve(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Resolver that always yields the same actor
#[derive(Debug, Clone)]
pub struct StaticActor(pub String);

impl StaticActor {
    pub fn new(actor: impl Into<String>) -> Self {
        Self(actor.into())
    }
}

impl ActorResolver for StaticActor {
    fn resolve(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Access to the host's current session attributes
pub trait SessionSource: Send + Sync {
    /// Read an attribute of the current session
    ///
    /// Errors when there is no active session.
    fn attribute(&self, name: &str) -> Result<Option<serde_json::Value>>;
}

/// Resolves the actor from session attributes
///
/// With a session attribute configured, that attribute is the actor. Otherwise
/// the actor key is a dotted path (`userPrincipal.name`) whose first segment
/// names the attribute and whose remaining segments walk into its value.
pub struct SessionActorResolver {
    session: Arc<dyn SessionSource>,
    session_attribute: Option<String>,
    actor_key: Option<String>,
}

impl SessionActorResolver {
    pub fn new(
        session: Arc<dyn SessionSource>,
        session_attribute: Option<String>,
        actor_key: Option<String>,
    ) -> Self {
        Self {
            session,
            session_attribute: session_attribute.filter(|s| !s.is_empty()),
            actor_key: actor_key.filter(|s| !s.is_empty()),
        }
    }
}

impl ActorResolver for SessionActorResolver {
    fn resolve(&self) -> Result<Option<String>> {
        if let Some(attribute) = &self.session_attribute {
            return Ok(self.session.attribute(attribute)?.as_ref().and_then(value_to_actor));
        }

        let Some(key) = &self.actor_key else {
            return Ok(None);
        };

        let mut segments = key.split('.');
        let root = segments
            .next()
            .ok_or_else(|| AuditError::Actor(format!("Empty actor key '{}'", key)))?;
        let Some(mut value) = self.session.attribute(root)? else {
            return Ok(None);
        };
        for segment in segments {
            match value.get(segment) {
                Some(next) => value = next.clone(),
                None => return Ok(None),
            }
        }
        Ok(value_to_actor(&value))
    }
}

fn value_to_actor(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Resolve an actor, logging and discarding failures
pub fn resolve_or_absent(resolver: &dyn ActorResolver) -> Option<String> {
    match resolver.resolve() {
        Ok(actor) => actor,
        Err(e) => {
            tracing::warn!(error = %e, "Actor resolution failed, recording without actor");
            None
        }
    }
}
