//! # a3s-audit
//!
//! Declarative entity stamping and change auditing for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-audit` sits next to a persistence layer. Before an entity is written
//! it fills in creation and update stamps (timestamps and actor ids); after
//! the write it records who changed what as a stream of audit events, which
//! a chain of handlers may veto before they reach a sink.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_audit::{AuditTrail, EntityOptions, MemoryAuditSink, Record, StampSpecification};
//!
//! # async fn example() -> a3s_audit::Result<()> {
//! let trail = AuditTrail::new(MemoryAuditSink::default());
//! let spec = StampSpecification::with_overrides(&Default::default())?;
//! trail.register("Order", EntityOptions::stamped_and_audited(spec))?;
//!
//! let mut order = Record::new("Order", "42").with("status", "NEW");
//! trail.before_insert(&mut order)?;
//! let recorded = trail.after_insert(&order).await?;
//! assert_eq!(recorded, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **StampSpecification** - role → field mapping built from defaults and overrides
//! - **stamper** - fills stamp fields at insert and update
//! - **AuditRecorder** - turns insert/update/delete into `AuditEvent`s
//! - **HandlerChain** - frozen, fail-open veto chain
//! - **ConfigStore** - live config with atomic whole-snapshot reload
//! - **AuditSink** trait - where surviving events go (memory, file, tracing)
//! - **AuditTrail** - lifecycle facade tying the above together
//! - **AuditTransaction** - unit of work from `AuditTrail::begin` with its own event buffer

pub mod actor;
pub mod config;
pub mod crypto;
pub mod entity;
pub mod error;
pub mod handler;
pub mod recorder;
pub mod sink;
pub mod stamp;
pub mod stamper;
pub mod trail;
pub mod types;

// Re-export core types
pub use actor::{ActorResolver, NoActor, SessionActorResolver, SessionSource, StaticActor};
pub use config::{AuditConfig, ConfigSource, ConfigStore};
pub use crypto::{Aes256GcmEncryptor, SealedValue, ValueEncryptor};
pub use entity::{Auditable, Record, Snapshot, StampValue};
pub use error::{AuditError, Result};
pub use handler::{
    AuditEventHandler, Decision, EntityTypeFilter, FnHandler, HandlerChain, HandlerChainBuilder,
};
pub use recorder::{AuditRecorder, MASK};
pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink, TracingAuditSink};
pub use stamp::{StampFieldOverride, StampFieldSpec, StampFieldType, StampRole, StampSpecification};
pub use stamper::StampPhase;
pub use trail::{AuditTrail, AuditTransaction, EntityOptions};
pub use types::{AuditEvent, AuditEventType};
