// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Isolation Audit Trail
//!
//! Every isolation decision taken by a guard produces exactly one [`AuditEvent`].
//! Events are append-only value objects; nothing mutates them after construction.
//!
//! [`AuditSink`] is the domain port. Implementations live in
//! [`crate::infrastructure::audit`] and must honour two rules:
//!
//! - `append` never blocks the guarded operation and never fails it;
//! - an event that cannot be recorded is **counted**, never silently lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::TenantId;
use super::tenant_context::TenantContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
    Read,
    Connect,
    Subscribe,
    /// A client SEND frame on the message channel
    Publish,
    /// Tenant resolution at the HTTP ingress
    Request,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Read => "READ",
            Self::Connect => "CONNECT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Publish => "PUBLISH",
            Self::Request => "REQUEST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Allowed,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "ALLOWED",
            Self::Denied => "DENIED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
    Info,
    /// Cross-tenant mismatches, forged system claims
    High,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::High => "HIGH",
        }
    }
}

/// One isolation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_tenant_id: Option<TenantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acting_tenant_id: Option<TenantId>,
    pub outcome: AuditOutcome,
    pub severity: AuditSeverity,
    pub reason: String,
}

impl AuditEvent {
    pub fn allowed(operation: AuditOperation, resource_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(operation, resource_type, AuditOutcome::Allowed, AuditSeverity::Info, reason)
    }

    /// Denials default to `Info`; use [`AuditEvent::high`] for cross-tenant attempts.
    pub fn denied(operation: AuditOperation, resource_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(operation, resource_type, AuditOutcome::Denied, AuditSeverity::Info, reason)
    }

    fn new(
        operation: AuditOperation,
        resource_type: impl Into<String>,
        outcome: AuditOutcome,
        severity: AuditSeverity,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            resource_type: resource_type.into(),
            resource_id: None,
            resource_tenant_id: None,
            acting_tenant_id: None,
            outcome,
            severity,
            reason: reason.into(),
        }
    }

    pub fn high(mut self) -> Self {
        self.severity = AuditSeverity::High;
        self
    }

    pub fn resource(mut self, resource_id: Option<String>, resource_tenant_id: Option<TenantId>) -> Self {
        self.resource_id = resource_id;
        self.resource_tenant_id = resource_tenant_id;
        self
    }

    pub fn acting(mut self, context: Option<&TenantContext>) -> Self {
        self.acting_tenant_id = context.map(|ctx| ctx.tenant_id);
        self
    }

    pub fn acting_tenant(mut self, tenant_id: Option<TenantId>) -> Self {
        self.acting_tenant_id = tenant_id;
        self
    }

    pub fn is_denied(&self) -> bool {
        self.outcome == AuditOutcome::Denied
    }
}

/// Append-only destination for [`AuditEvent`]s.
///
/// Called synchronously from inside guarded operations, so implementations must
/// return immediately and must not panic.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent);

    /// Events that could not be recorded since startup.
    fn dropped_events(&self) -> u64 {
        0
    }
}

/// Count every decision; shared by all guards.
pub(crate) fn record_decision(sink: &dyn AuditSink, event: AuditEvent) {
    metrics::counter!(
        "tenancy_decisions_total",
        "operation" => event.operation.as_str(),
        "outcome" => event.outcome.as_str()
    )
    .increment(1);
    sink.append(event);
}
