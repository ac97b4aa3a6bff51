//! High-level audit trail built on a pluggable sink
//!
//! `AuditTrail` is what the host persistence layer calls at each lifecycle
//! transition. It stamps registered entity types, records audit events,
//! runs them through the frozen handler chain, and hands the survivors to
//! the sink.
//!
//! Work done inside a host transaction goes through an `AuditTransaction`
//! from [`AuditTrail::begin`]. With `transactional` enabled each transaction
//! buffers its own events until it commits; other transactions on the same
//! trail never see them.

use crate::config::{self, AuditConfig, ConfigStore};
use crate::crypto::ValueEncryptor;
use crate::entity::{Auditable, Snapshot};
use crate::error::{AuditError, Result};
use crate::handler::HandlerChain;
use crate::recorder::AuditRecorder;
use crate::sink::AuditSink;
use crate::stamp::StampSpecification;
use crate::stamper::{self, StampPhase};
use crate::types::AuditEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// How the trail treats one entity type
#[derive(Debug, Clone, Default)]
pub struct EntityOptions {
    stamp: Option<Arc<StampSpecification>>,
    audited: bool,
}

impl EntityOptions {
    /// Record audit events, no stamping
    pub fn audited() -> Self {
        Self {
            stamp: None,
            audited: true,
        }
    }

    /// Stamp with `spec`, no audit events
    pub fn stamped(spec: StampSpecification) -> Self {
        Self {
            stamp: Some(Arc::new(spec)),
            audited: false,
        }
    }

    /// Stamp and audit
    pub fn stamped_and_audited(spec: StampSpecification) -> Self {
        Self {
            stamp: Some(Arc::new(spec)),
            audited: true,
        }
    }

    pub fn stamp_specification(&self) -> Option<&StampSpecification> {
        self.stamp.as_deref()
    }

    pub fn is_audited(&self) -> bool {
        self.audited
    }
}

enum ConfigRef {
    Global,
    Store(Arc<ConfigStore>),
}

impl ConfigRef {
    fn current(&self) -> Arc<AuditConfig> {
        match self {
            ConfigRef::Global => config::current(),
            ConfigRef::Store(store) => store.current(),
        }
    }
}

#[derive(Clone, Copy)]
enum Transition<'a> {
    Insert,
    Update(&'a Snapshot),
    Delete,
}

/// Entity stamping and audit pipeline
pub struct AuditTrail {
    sink: Box<dyn AuditSink>,
    chain: HandlerChain,
    recorder: AuditRecorder,
    config: ConfigRef,

    /// entity_type → options
    registry: RwLock<HashMap<String, EntityOptions>>,
}

impl AuditTrail {
    /// Create a trail that reads the process-wide config
    pub fn new(sink: impl AuditSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            chain: HandlerChain::default(),
            recorder: AuditRecorder::new(),
            config: ConfigRef::Global,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Read config from a private store instead of the process-wide one
    pub fn with_config_store(mut self, store: Arc<ConfigStore>) -> Self {
        self.config = ConfigRef::Store(store);
        self
    }

    /// Install the frozen handler chain
    pub fn with_handlers(mut self, chain: HandlerChain) -> Self {
        self.chain = chain;
        self
    }

    /// Seal masked values instead of redacting them
    pub fn with_encryptor(mut self, encryptor: Arc<dyn ValueEncryptor>) -> Self {
        self.recorder = AuditRecorder::with_encryptor(encryptor);
        self
    }

    /// Register or replace the options for an entity type
    pub fn register(&self, entity_type: impl Into<String>, options: EntityOptions) -> Result<()> {
        let entity_type = entity_type.into();
        let mut registry = self.registry.write().map_err(|e| {
            AuditError::Config(format!("Failed to acquire registry lock: {}", e))
        })?;

        tracing::info!(
            entity_type = %entity_type,
            stamped = options.stamp.is_some(),
            audited = options.audited,
            "Entity type registered"
        );
        registry.insert(entity_type, options);
        Ok(())
    }

    /// Options registered for an entity type
    pub fn options(&self, entity_type: &str) -> Result<Option<EntityOptions>> {
        let registry = self.registry.read().map_err(|e| {
            AuditError::Config(format!("Failed to acquire registry lock: {}", e))
        })?;
        Ok(registry.get(entity_type).cloned())
    }

    /// Current config snapshot
    pub fn config(&self) -> Arc<AuditConfig> {
        self.config.current()
    }

    pub fn handlers(&self) -> &HandlerChain {
        &self.chain
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Open a unit of work with its own event buffer
    pub fn begin(&self) -> AuditTransaction<'_> {
        AuditTransaction {
            trail: self,
            pending: Vec::new(),
        }
    }

    /// Stamp creation fields before the entity is first persisted
    pub fn before_insert<E: Auditable + ?Sized>(&self, entity: &mut E) -> Result<()> {
        self.stamp(entity, StampPhase::BeforeInsert)
    }

    /// Stamp update fields before changes are persisted
    pub fn before_update<E: Auditable + ?Sized>(&self, entity: &mut E) -> Result<()> {
        self.stamp(entity, StampPhase::BeforeUpdate)
    }

    /// Record an insert and emit it at once; returns the number of events kept
    pub async fn after_insert<E: Auditable + ?Sized>(&self, entity: &E) -> Result<usize> {
        let (events, _) = self.record(entity, Transition::Insert)?;
        self.emit(events).await
    }

    /// Record an update against the state captured before it
    pub async fn after_update<E: Auditable + ?Sized>(
        &self,
        entity: &E,
        previous: &Snapshot,
    ) -> Result<usize> {
        let (events, _) = self.record(entity, Transition::Update(previous))?;
        self.emit(events).await
    }

    /// Record a delete while the entity state is still available
    pub async fn before_delete<E: Auditable + ?Sized>(&self, entity: &E) -> Result<usize> {
        let (events, _) = self.record(entity, Transition::Delete)?;
        self.emit(events).await
    }

    fn stamp<E: Auditable + ?Sized>(&self, entity: &mut E, phase: StampPhase) -> Result<()> {
        let spec = match self.options(entity.entity_type())?.and_then(|o| o.stamp) {
            Some(spec) => spec,
            None => {
                tracing::debug!(
                    entity_type = %entity.entity_type(),
                    "Entity type not stamped, skipping"
                );
                return Ok(());
            }
        };
        let actor = self.config.current().resolve_actor();
        stamper::stamp(entity, &spec, phase, actor.as_deref())
    }

    /// Events that survive the chain, and whether the live config buffers them
    fn record<E: Auditable + ?Sized>(
        &self,
        entity: &E,
        transition: Transition<'_>,
    ) -> Result<(Vec<AuditEvent>, bool)> {
        let audited = self
            .options(entity.entity_type())?
            .map(|o| o.audited)
            .unwrap_or(false);
        if !audited {
            tracing::debug!(
                entity_type = %entity.entity_type(),
                "Entity type not audited, skipping"
            );
            return Ok((Vec::new(), false));
        }

        let config = self.config.current();
        let events = match transition {
            Transition::Insert => self.recorder.on_insert(entity, &config),
            Transition::Update(previous) => self.recorder.on_update(entity, previous, &config),
            Transition::Delete => self.recorder.on_delete(entity, &config),
        };
        Ok((self.chain.filter(events), config.transactional))
    }

    async fn emit(&self, events: Vec<AuditEvent>) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        self.sink.emit(&events).await?;
        Ok(events.len())
    }
}

/// One unit of work against an [`AuditTrail`]
///
/// With `transactional` enabled, recorded events stay in this transaction
/// until [`commit`](Self::commit). Otherwise they are emitted as they are
/// recorded. Dropping a transaction with buffered events discards them.
pub struct AuditTransaction<'a> {
    trail: &'a AuditTrail,
    pending: Vec<AuditEvent>,
}

impl AuditTransaction<'_> {
    /// Stamp creation fields before the entity is first persisted
    pub fn before_insert<E: Auditable + ?Sized>(&self, entity: &mut E) -> Result<()> {
        self.trail.before_insert(entity)
    }

    /// Stamp update fields before changes are persisted
    pub fn before_update<E: Auditable + ?Sized>(&self, entity: &mut E) -> Result<()> {
        self.trail.before_update(entity)
    }

    /// Record an insert; returns the number of events kept
    pub async fn after_insert<E: Auditable + ?Sized>(&mut self, entity: &E) -> Result<usize> {
        let (events, buffered) = self.trail.record(entity, Transition::Insert)?;
        self.stage(events, buffered).await
    }

    /// Record an update against the state captured before it
    pub async fn after_update<E: Auditable + ?Sized>(
        &mut self,
        entity: &E,
        previous: &Snapshot,
    ) -> Result<usize> {
        let (events, buffered) = self.trail.record(entity, Transition::Update(previous))?;
        self.stage(events, buffered).await
    }

    /// Record a delete while the entity state is still available
    pub async fn before_delete<E: Auditable + ?Sized>(&mut self, entity: &E) -> Result<usize> {
        let (events, buffered) = self.trail.record(entity, Transition::Delete)?;
        self.stage(events, buffered).await
    }

    /// Number of buffered events
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Flush buffered events to the sink
    ///
    /// On sink failure the events stay buffered and commit can be retried.
    pub async fn commit(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        self.trail.sink.emit(&self.pending).await?;
        let count = self.pending.len();
        self.pending.clear();

        tracing::debug!(sink = %self.trail.sink.name(), count, "Audit transaction committed");
        Ok(count)
    }

    /// Discard buffered events; returns how many were dropped
    pub fn rollback(mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();

        if count > 0 {
            tracing::debug!(count, "Audit transaction rolled back");
        }
        count
    }

    async fn stage(&mut self, events: Vec<AuditEvent>, buffered: bool) -> Result<usize> {
        if !buffered {
            return self.trail.emit(events).await;
        }
        let count = events.len();
        self.pending.extend(events);
        Ok(count)
    }
}

impl Drop for AuditTransaction<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                count = self.pending.len(),
                "Audit transaction dropped without commit, discarding events"
            );
        }
    }
}
