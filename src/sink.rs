//! Audit sinks: where surviving audit events go
//!
//! The recorder and chain only produce events; persisting or forwarding them
//! is the sink's job. Sinks receive every non-suppressed event of one
//! transition (or one committed transaction) in a single call.

use crate::error::{AuditError, Result};
use crate::types::AuditEvent;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Trait for audit event consumers
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Accept a batch of events, in order
    async fn emit(&self, events: &[AuditEvent]) -> Result<()>;

    /// Sink name (e.g., "memory", "file", "tracing")
    fn name(&self) -> &str;
}

/// In-memory sink for development and testing
///
/// Keeps at most `max_events` events, dropping the oldest first.
pub struct MemoryAuditSink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Create a sink holding at most `max_events` (0 = unbounded)
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events,
        }
    }

    /// Number of events held
    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Most recent events first
    pub async fn list(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    /// All events in emission order
    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn emit(&self, batch: &[AuditEvent]) -> Result<()> {
        let mut events = self.events.write().await;
        events.extend_from_slice(batch);

        if self.max_events > 0 && events.len() > self.max_events {
            let drain_count = events.len() - self.max_events;
            events.drain(..drain_count);
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// JSON-lines file sink
///
/// Appends one event per line, creating parent directories on first write.
pub struct FileAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every event in the file
    pub async fn read_all(&self) -> Result<Vec<AuditEvent>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AuditError::Sink(format!(
                    "Failed to read audit file {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn emit(&self, events: &[AuditEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AuditError::Sink(format!(
                    "Failed to create audit directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                AuditError::Sink(format!(
                    "Failed to open audit file {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        file.write_all(&buf).await.map_err(|e| {
            AuditError::Sink(format!(
                "Failed to write audit file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        file.flush().await.map_err(|e| {
            AuditError::Sink(format!(
                "Failed to flush audit file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), count = events.len(), "Audit events written");
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Sink that logs each event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, events: &[AuditEvent]) -> Result<()> {
        for event in events {
            tracing::info!(
                event_id = %event.id(),
                event_type = %event.event_type(),
                entity_type = %event.entity_type(),
                entity_id = %event.entity_id(),
                property = event.property_name().unwrap_or("-"),
                old_value = event.old_value().unwrap_or("-"),
                new_value = event.new_value().unwrap_or("-"),
                actor = event.actor().unwrap_or("-"),
                "Audit event"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}
