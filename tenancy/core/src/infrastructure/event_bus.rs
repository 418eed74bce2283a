// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Audit Event Bus - Pub/Sub for Isolation Decisions
//
// Streams audit events to in-process observers (SIEM forwarders, the daemon's
// audit endpoint) using tokio broadcast channels.
//
// In-memory only: slow subscribers lag and lose events; the durable trail is the
// PostgreSQL writer.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::audit::{AuditEvent, AuditOutcome};
use crate::domain::tenant::TenantId;

/// Event bus for publishing and subscribing to audit events
#[derive(Clone)]
pub struct AuditEventBus {
    sender: Arc<broadcast::Sender<AuditEvent>>,
}

impl AuditEventBus {
    /// Capacity determines how many events can be buffered before the slowest
    /// subscriber starts lagging
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Publish an audit event to all subscribers
    pub fn publish(&self, event: AuditEvent) {
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to audit stream");
        }
    }

    /// Subscribe to every audit event
    pub fn subscribe(&self) -> AuditEventReceiver {
        AuditEventReceiver {
            receiver: self.sender.subscribe(),
            filter: StreamFilter::default(),
        }
    }

    /// Subscribe to denials only
    pub fn subscribe_denied(&self) -> AuditEventReceiver {
        AuditEventReceiver {
            receiver: self.sender.subscribe(),
            filter: StreamFilter {
                denied_only: true,
                tenant: None,
            },
        }
    }

    /// Subscribe to events where `tenant_id` is the acting or the resource tenant
    pub fn subscribe_tenant(&self, tenant_id: TenantId) -> AuditEventReceiver {
        AuditEventReceiver {
            receiver: self.sender.subscribe(),
            filter: StreamFilter {
                denied_only: false,
                tenant: Some(tenant_id),
            },
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for AuditEventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StreamFilter {
    denied_only: bool,
    tenant: Option<TenantId>,
}

impl StreamFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        if self.denied_only && event.outcome != AuditOutcome::Denied {
            return false;
        }
        match self.tenant {
            Some(tenant) => event.acting_tenant_id == Some(tenant) || event.resource_tenant_id == Some(tenant),
            None => true,
        }
    }
}

pub struct AuditEventReceiver {
    receiver: broadcast::Receiver<AuditEvent>,
    filter: StreamFilter,
}

impl AuditEventReceiver {
    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<AuditEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Audit receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Try to receive a matching event without blocking
    pub fn try_recv(&mut self) -> Result<AuditEvent, EventBusError> {
        loop {
            let event = self.receiver.try_recv().map_err(|e| match e {
                broadcast::error::TryRecvError::Empty => EventBusError::Empty,
                broadcast::error::TryRecvError::Closed => EventBusError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => {
                    warn!("Audit receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
