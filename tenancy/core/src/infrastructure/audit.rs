// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Audit Pipeline
//!
//! Guards call [`AuditSink::append`] synchronously. The production sink only
//! enqueues; a background [`AuditDispatcher`] fans events out to writers.
//!
//! ```text
//! guard ──append──► ChannelAuditSink ──mpsc (bounded)──► AuditDispatcher
//!                        │                                   ├─► TracingAuditWriter   (target tenancy::audit)
//!                        └─ full/closed: counted             ├─► AuditEventBus        (SIEM stream)
//!                                                            └─► RepositoryAuditWriter (tenant_audit_events)
//! ```
//!
//! A failing writer is counted and logged; it never reaches the guarded operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::domain::repository::AuditEventRepository;
use crate::infrastructure::event_bus::AuditEventBus;

/// Target used for structured audit records.
pub const AUDIT_TARGET: &str = "tenancy::audit";

#[derive(Debug, thiserror::Error)]
pub enum AuditSinkError {
    #[error("audit queue is full")]
    QueueFull,

    #[error("audit queue is closed")]
    Closed,

    #[error("audit writer '{writer}' failed: {message}")]
    WriterFailed { writer: &'static str, message: String },
}

/// One destination of the dispatcher.
#[async_trait]
pub trait AuditWriter: Send + Sync {
    /// Label used in logs and the `writer` metric label.
    fn name(&self) -> &'static str;

    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

// ============================================================================
// Channel sink
// ============================================================================

/// Non-blocking production sink backed by a bounded queue.
pub struct ChannelAuditSink {
    sender: mpsc::Sender<AuditEvent>,
    dropped: AtomicU64,
}

impl ChannelAuditSink {
    /// Create the sink and the receiving half for an [`AuditDispatcher`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    pub fn try_append(&self, event: AuditEvent) -> Result<(), AuditSinkError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AuditSinkError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => AuditSinkError::Closed,
        })
    }
}

impl AuditSink for ChannelAuditSink {
    fn append(&self, event: AuditEvent) {
        let denied = event.is_denied();
        if let Err(e) = self.try_append(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::counter!("tenancy_audit_events_dropped_total").increment(1);
            error!(error = %e, denied, dropped_total = dropped, "audit event dropped");
        }
    }

    fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Background task draining the sink's queue into every writer.
pub struct AuditDispatcher {
    receiver: mpsc::Receiver<AuditEvent>,
    writers: Vec<Arc<dyn AuditWriter>>,
}

impl AuditDispatcher {
    pub fn new(receiver: mpsc::Receiver<AuditEvent>, writers: Vec<Arc<dyn AuditWriter>>) -> Self {
        Self { receiver, writers }
    }

    /// Runs until every sender is dropped, then drains what is left and exits.
    pub fn start(self) -> JoinHandle<()> {
        info!(writers = self.writers.len(), "Starting audit dispatcher background task");
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut events_processed = 0u64;
        let mut errors_encountered = 0u64;

        while let Some(event) = self.receiver.recv().await {
            events_processed += 1;
            for writer in &self.writers {
                if let Err(e) = writer.write(&event).await {
                    errors_encountered += 1;
                    metrics::counter!("tenancy_audit_writer_failures_total", "writer" => writer.name()).increment(1);
                    error!(writer = writer.name(), event_id = %event.event_id, error = %e, "audit writer failed");

                    if errors_encountered % 10 == 0 {
                        warn!("Audit writers have failed {} times", errors_encountered);
                    }
                }
            }

            if events_processed % 1000 == 0 {
                debug!(
                    "Audit dispatcher processed {} events ({} errors)",
                    events_processed, errors_encountered
                );
            }
        }

        info!(
            "Audit dispatcher shut down gracefully (processed {} events, {} errors)",
            events_processed, errors_encountered
        );
    }
}

// ============================================================================
// Writers
// ============================================================================

/// Structured key-value record per event on the `tenancy::audit` target.
pub struct TracingAuditWriter;

macro_rules! audit_record {
    ($level:expr, $event:ident) => {
        tracing::event!(
            target: AUDIT_TARGET,
            $level,
            event_id = %$event.event_id,
            operation = $event.operation.as_str(),
            resource_type = %$event.resource_type,
            resource_id = $event.resource_id.as_deref().unwrap_or(""),
            resource_tenant_id = %display_tenant($event.resource_tenant_id),
            acting_tenant_id = %display_tenant($event.acting_tenant_id),
            outcome = $event.outcome.as_str(),
            severity = ?$event.severity,
            reason = %$event.reason,
            "isolation decision"
        )
    };
}

fn display_tenant(tenant: Option<crate::domain::tenant::TenantId>) -> String {
    tenant.map(|t| t.to_string()).unwrap_or_default()
}

#[async_trait]
impl AuditWriter for TracingAuditWriter {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        match event.outcome {
            AuditOutcome::Allowed => audit_record!(tracing::Level::INFO, event),
            AuditOutcome::Denied => audit_record!(tracing::Level::WARN, event),
        }
        Ok(())
    }
}

#[async_trait]
impl AuditWriter for AuditEventBus {
    fn name(&self) -> &'static str {
        "event_bus"
    }

    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.publish(event.clone());
        Ok(())
    }
}

/// Durable writer over an [`AuditEventRepository`] (PostgreSQL in production).
pub struct RepositoryAuditWriter {
    repository: Arc<dyn AuditEventRepository>,
}

impl RepositoryAuditWriter {
    pub fn new(repository: Arc<dyn AuditEventRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl AuditWriter for RepositoryAuditWriter {
    fn name(&self) -> &'static str {
        "repository"
    }

    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.repository
            .append(event)
            .await
            .map_err(|e| AuditSinkError::WriterFailed {
                writer: "repository",
                message: e.to_string(),
            })
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Synchronous sink for tests and embedded use. Also usable as a writer.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn denied(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| e.is_denied()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl AuditWriter for InMemoryAuditSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.append(event.clone());
        Ok(())
    }
}
