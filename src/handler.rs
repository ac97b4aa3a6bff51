//! Handler chain: ordered observers that may veto audit events
//!
//! Handlers are appended to a `HandlerChainBuilder` during setup and frozen
//! into a `HandlerChain` before any event flows. A handler that errors or
//! panics is logged and counted, and the chain continues as if it returned
//! `Continue`. There is no circuit breaker: a failing handler keeps being
//! invoked for every event.

use crate::error::Result;
use crate::types::AuditEvent;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of one handler for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Pass the event to the next handler
    Continue,
    /// Drop the event; later handlers are not invoked
    Suppress,
}

/// Observer invoked for every audit event
pub trait AuditEventHandler: Send + Sync {
    /// Inspect an event and decide whether it survives
    fn handle(&self, event: &AuditEvent) -> Result<Decision>;

    /// Name used in logs and failure counters
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handler backed by a closure
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&AuditEvent) -> Result<Decision> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> AuditEventHandler for FnHandler<F>
where
    F: Fn(&AuditEvent) -> Result<Decision> + Send + Sync,
{
    fn handle(&self, event: &AuditEvent) -> Result<Decision> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Suppresses every event for the listed entity types
#[derive(Debug, Clone, Default)]
pub struct EntityTypeFilter {
    suppressed: HashSet<String>,
}

impl EntityTypeFilter {
    pub fn new<I, S>(entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suppressed: entity_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuditEventHandler for EntityTypeFilter {
    fn handle(&self, event: &AuditEvent) -> Result<Decision> {
        if self.suppressed.contains(event.entity_type()) {
            Ok(Decision::Suppress)
        } else {
            Ok(Decision::Continue)
        }
    }

    fn name(&self) -> &str {
        "entity-type-filter"
    }
}

struct Slot {
    handler: Arc<dyn AuditEventHandler>,
    failures: AtomicU64,
}

/// Append-only handler list used during setup
#[derive(Default)]
pub struct HandlerChainBuilder {
    handlers: Vec<Arc<dyn AuditEventHandler>>,
}

impl HandlerChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; it runs after every handler added before it
    pub fn with(mut self, handler: impl AuditEventHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Append a shared handler
    pub fn with_shared(mut self, handler: Arc<dyn AuditEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Freeze the chain
    pub fn build(self) -> HandlerChain {
        let slots = self
            .handlers
            .into_iter()
            .map(|handler| Slot {
                handler,
                failures: AtomicU64::new(0),
            })
            .collect::<Vec<_>>();
        HandlerChain {
            slots: Arc::from(slots),
        }
    }
}

/// Frozen, shareable handler chain
#[derive(Clone)]
pub struct HandlerChain {
    slots: Arc<[Slot]>,
}

impl Default for HandlerChain {
    fn default() -> Self {
        HandlerChainBuilder::new().build()
    }
}

impl HandlerChain {
    pub fn builder() -> HandlerChainBuilder {
        HandlerChainBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run one event through the chain in registration order
    ///
    /// The first `Suppress` stops the chain. Errors and panics count as
    /// `Continue`.
    pub fn process(&self, event: &AuditEvent) -> Decision {
        for (position, slot) in self.slots.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| slot.handler.handle(event)));
            let decision = match outcome {
                Ok(Ok(decision)) => decision,
                Ok(Err(e)) => {
                    slot.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        handler = %slot.handler.name(),
                        position,
                        event_id = %event.id(),
                        error = %e,
                        "Audit handler failed, continuing"
                    );
                    Decision::Continue
                }
                Err(panic) => {
                    slot.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        handler = %slot.handler.name(),
                        position,
                        event_id = %event.id(),
                        panic = %panic_message(panic.as_ref()),
                        "Audit handler panicked, continuing"
                    );
                    Decision::Continue
                }
            };

            if decision == Decision::Suppress {
                tracing::debug!(
                    handler = %slot.handler.name(),
                    position,
                    event_id = %event.id(),
                    "Audit event suppressed"
                );
                return Decision::Suppress;
            }
        }
        Decision::Continue
    }

    /// Keep only the events every handler lets through, preserving order
    pub fn filter(&self, events: Vec<AuditEvent>) -> Vec<AuditEvent> {
        events
            .into_iter()
            .filter(|event| self.process(event) == Decision::Continue)
            .collect()
    }

    /// Failure count per handler, in registration order
    pub fn failures(&self) -> Vec<(String, u64)> {
        self.slots
            .iter()
            .map(|slot| {
                (
                    slot.handler.name().to_string(),
                    slot.failures.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;
    use crate::types::AuditEventType;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        calls: Arc<AtomicUsize>,
        decision: Decision,
    }

    impl AuditEventHandler for Counting {
        fn handle(&self, _event: &AuditEvent) -> Result<Decision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.decision)
        }
    }

    fn counter(decision: Decision) -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Counting {
                calls: calls.clone(),
                decision,
            },
            calls,
        )
    }

    fn event(entity_type: &str) -> AuditEvent {
        AuditEvent::summary(AuditEventType::Insert, entity_type, "1", None, Utc::now())
    }

    #[test]
    fn test_empty_chain_continues() {
        let chain = HandlerChain::default();
        assert!(chain.is_empty());
        assert_eq!(chain.process(&event("Order")), Decision::Continue);
    }

    #[test]
    fn test_suppress_short_circuits() {
        let (first, first_calls) = counter(Decision::Continue);
        let (second, second_calls) = counter(Decision::Suppress);
        let (third, third_calls) = counter(Decision::Continue);
        let chain = HandlerChain::builder()
            .with(first)
            .with(second)
            .with(third)
            .build();

        assert_eq!(chain.process(&event("Order")), Decision::Suppress);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_is_fail_open() {
        let failing = FnHandler::new("broken", |_: &AuditEvent| -> Result<Decision> {
            Err(AuditError::Handler {
                handler: "broken".to_string(),
                reason: "db down".to_string(),
            })
        });
        let (after, after_calls) = counter(Decision::Continue);
        let chain = HandlerChain::builder().with(failing).with(after).build();

        assert_eq!(chain.process(&event("Order")), Decision::Continue);
        assert_eq!(chain.process(&event("Order")), Decision::Continue);
        assert_eq!(after_calls.load(Ordering::SeqCst), 2);
        assert_eq!(chain.failures()[0], ("broken".to_string(), 2));
        assert_eq!(chain.failures()[1].1, 0);
    }

    #[test]
    fn test_panic_is_fail_open() {
        let panicking = FnHandler::new("panicky", |_: &AuditEvent| -> Result<Decision> {
            panic!("handler bug")
        });
        let (after, after_calls) = counter(Decision::Continue);
        let chain = HandlerChain::builder().with(panicking).with(after).build();

        assert_eq!(chain.process(&event("Order")), Decision::Continue);
        assert_eq!(after_calls.load(Ordering::SeqCst), 1);
        assert_eq!(chain.failures()[0].1, 1);
    }

    #[test]
    fn test_filter_drops_only_suppressed() {
        let chain = HandlerChain::builder()
            .with(EntityTypeFilter::new(["Session"]))
            .build();
        let events = vec![event("Order"), event("Session"), event("Invoice")];

        let kept = chain.filter(events);
        let types: Vec<_> = kept.iter().map(|e| e.entity_type()).collect();
        assert_eq!(types, vec!["Order", "Invoice"]);
    }

    #[test]
    fn test_shared_handler_and_names() {
        let shared: Arc<dyn AuditEventHandler> = Arc::new(EntityTypeFilter::default());
        let builder = HandlerChain::builder().with_shared(shared);
        assert_eq!(builder.len(), 1);
        let chain = builder.build();
        assert_eq!(chain.failures()[0].0, "entity-type-filter");

        let (plain, _) = counter(Decision::Continue);
        assert!(plain.name().ends_with("Counting"));
    }
}
