// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Message Channel Guard
//!
//! Transport-side analog of the entity guard for long-lived publish/subscribe
//! connections.
//!
//! ```text
//! on_connect(principal) ──► ConnectionBinding { tenant, subject }   (immutable)
//!        │
//!        ├─ frame ─► dispatch ─► TenantContext re-derived from binding
//!        │                  └─► authorize_destination
//!        │                  └─► on_message_complete (context cleared)
//!        ├─ frame ─► ...
//!        ▼
//! on_disconnect ──► binding removed
//! ```
//!
//! A rejected destination rejects that one message; the connection stays open.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::context_propagation::{ContextPropagationFilter, TenantRequirement};
use crate::domain::audit::{record_decision, AuditEvent, AuditOperation, AuditSink};
use crate::domain::errors::TenancyError;
use crate::domain::principal::Principal;
use crate::domain::tenancy_config::ChannelConfig;
use crate::domain::tenant::TenantId;
use crate::domain::tenant_context::{self, TenantContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed at connect time for the lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBinding {
    pub connection_id: ConnectionId,
    pub tenant_id: TenantId,
    pub subject: String,
    pub is_system: bool,
    pub bound_at: DateTime<Utc>,
}

impl ConnectionBinding {
    fn context(&self) -> TenantContext {
        if self.is_system {
            TenantContext::system(self.tenant_id)
        } else {
            TenantContext::tenant(self.tenant_id)
        }
    }
}

/// Shape of a destination string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationKind {
    Broadcast,
    UserPrivate { subject: String },
    TenantScoped { tenant_id: TenantId },
    Unknown,
}

/// A destination that passed [`MessageChannelGuard::authorize_destination`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedDestination {
    pub kind: DestinationKind,
    /// Topic to subscribe or publish on.
    pub routing_key: String,
}

pub struct MessageChannelGuard {
    resolver: Arc<ContextPropagationFilter>,
    audit: Arc<dyn AuditSink>,
    config: ChannelConfig,
    bindings: DashMap<ConnectionId, ConnectionBinding>,
}

impl MessageChannelGuard {
    pub fn new(resolver: Arc<ContextPropagationFilter>, audit: Arc<dyn AuditSink>, config: ChannelConfig) -> Self {
        Self {
            resolver,
            audit,
            config,
            bindings: DashMap::new(),
        }
    }

    /// Resolve the principal's tenant and bind it to `connection_id`.
    pub async fn on_connect(
        &self,
        connection_id: ConnectionId,
        principal: &Principal,
    ) -> Result<ConnectionBinding, TenancyError> {
        if self.bindings.contains_key(&connection_id) {
            return Err(self.rebind_denied(connection_id));
        }

        let decision = self
            .resolver
            .decide(Some(principal), TenantRequirement::Required, AuditOperation::Connect)
            .await;
        let context = match decision.result {
            Ok(Some(context)) => context,
            Ok(None) => {
                self.audit(decision.event);
                return Err(TenancyError::MissingTenantContext);
            }
            Err(e) => {
                self.audit(decision.event);
                return Err(e);
            }
        };

        let binding = ConnectionBinding {
            connection_id,
            tenant_id: context.tenant_id,
            subject: principal.subject.clone(),
            is_system: context.is_system_tenant,
            bound_at: Utc::now(),
        };

        match self.bindings.entry(connection_id) {
            Entry::Occupied(_) => Err(self.rebind_denied(connection_id)),
            Entry::Vacant(slot) => {
                slot.insert(binding.clone());
                self.audit(decision.event);
                info!(
                    connection_id = %connection_id,
                    tenant_id = %binding.tenant_id,
                    subject = %binding.subject,
                    "connection bound"
                );
                Ok(binding)
            }
        }
    }

    pub fn binding(&self, connection_id: ConnectionId) -> Option<ConnectionBinding> {
        self.bindings.get(&connection_id).map(|b| b.value().clone())
    }

    pub fn connection_count(&self) -> usize {
        self.bindings.len()
    }

    /// The per-message context for one inbound message, re-derived from the binding.
    pub fn on_inbound_message(&self, connection_id: ConnectionId) -> Result<TenantContext, TenancyError> {
        match self.bindings.get(&connection_id) {
            Some(binding) => Ok(binding.context()),
            None => {
                warn!(connection_id = %connection_id, "message on unbound connection");
                self.audit(AuditEvent::denied(AuditOperation::Publish, "connection", "unknown connection")
                    .resource(Some(connection_id.to_string()), None));
                Err(TenancyError::UnknownConnection)
            }
        }
    }

    /// Process one inbound message as its own unit of work.
    pub async fn dispatch<F>(&self, connection_id: ConnectionId, handler: F) -> Result<F::Output, TenancyError>
    where
        F: Future,
    {
        let context = self.on_inbound_message(connection_id)?;
        let output = tenant_context::scope(Some(context), async {
            let output = handler.await;
            self.on_message_complete(connection_id);
            output
        })
        .await;
        Ok(output)
    }

    /// Clear the per-message context. The binding persists.
    pub fn on_message_complete(&self, connection_id: ConnectionId) {
        tenant_context::clear();
        debug!(connection_id = %connection_id, "message processed; context cleared");
    }

    pub fn on_disconnect(&self, connection_id: ConnectionId) -> Option<ConnectionBinding> {
        let removed = self.bindings.remove(&connection_id).map(|(_, binding)| binding);
        if removed.is_some() {
            info!(connection_id = %connection_id, "connection unbound");
        }
        removed
    }

    /// Prefixes are matched most specific first, so a broad broadcast prefix can
    /// never swallow tenant or user destinations.
    pub fn classify(&self, destination: &str) -> DestinationKind {
        if destination.split('/').any(|segment| segment == ".." || segment == ".") {
            return DestinationKind::Unknown;
        }

        if let Some(rest) = destination.strip_prefix(&self.config.tenant_prefix) {
            let segment = rest.split('/').next().unwrap_or_default();
            return match TenantId::from_string(segment) {
                Ok(tenant_id) => DestinationKind::TenantScoped { tenant_id },
                Err(_) => DestinationKind::Unknown,
            };
        }

        if let Some(rest) = destination.strip_prefix(&self.config.user_prefix) {
            let subject = rest.split('/').next().unwrap_or_default();
            if !subject.is_empty() {
                return DestinationKind::UserPrivate {
                    subject: subject.to_string(),
                };
            }
            return DestinationKind::Unknown;
        }

        if destination.starts_with(&self.config.broadcast_prefix) {
            return DestinationKind::Broadcast;
        }

        DestinationKind::Unknown
    }

    /// Broker topic for an authorized destination.
    ///
    /// User-private destinations are namespaced by the bound tenant
    /// (`{user_prefix}{tenant}/{subject}/...`) so equal subjects in different
    /// tenants never share a topic. Everything else routes on the destination itself.
    fn routing_key(&self, binding: &ConnectionBinding, destination: &str, kind: &DestinationKind) -> String {
        match (kind, destination.strip_prefix(&self.config.user_prefix)) {
            (DestinationKind::UserPrivate { .. }, Some(rest)) => {
                format!("{}{}/{}", self.config.user_prefix, binding.tenant_id, rest)
            }
            _ => destination.to_string(),
        }
    }

    /// Validate a SUBSCRIBE or SEND target against the connection binding.
    pub fn authorize_destination(
        &self,
        connection_id: ConnectionId,
        destination: &str,
        operation: AuditOperation,
    ) -> Result<AuthorizedDestination, TenancyError> {
        let Some(binding) = self.binding(connection_id) else {
            self.audit(AuditEvent::denied(operation, "destination", "unknown connection")
                .resource(Some(destination.to_string()), None));
            return Err(TenancyError::UnknownConnection);
        };

        let kind = self.classify(destination);
        let (allowed, cross_tenant, resource_tenant) = match &kind {
            DestinationKind::Broadcast => (true, false, None),
            DestinationKind::UserPrivate { subject } => {
                let own = *subject == binding.subject;
                (own || binding.is_system, !own, None)
            }
            DestinationKind::TenantScoped { tenant_id } => {
                let own = *tenant_id == binding.tenant_id;
                (own || binding.is_system, !own, Some(*tenant_id))
            }
            DestinationKind::Unknown => (!self.config.strict_destinations, false, None),
        };

        if allowed {
            if kind == DestinationKind::Unknown {
                warn!(destination, "unrecognised destination allowed by non-strict mode");
            }
            self.audit(
                AuditEvent::allowed(operation, "destination", "destination within connection scope")
                    .resource(Some(destination.to_string()), resource_tenant)
                    .acting_tenant(Some(binding.tenant_id)),
            );
            let routing_key = self.routing_key(&binding, destination, &kind);
            return Ok(AuthorizedDestination { kind, routing_key });
        }

        metrics::counter!("tenancy_messages_rejected_total", "operation" => operation.as_str()).increment(1);
        warn!(
            connection_id = %connection_id,
            destination,
            operation = operation.as_str(),
            "destination rejected"
        );
        let mut event = AuditEvent::denied(operation, "destination", "destination outside connection scope")
            .resource(Some(destination.to_string()), resource_tenant)
            .acting_tenant(Some(binding.tenant_id));
        if cross_tenant {
            event = event.high();
        }
        self.audit(event);

        Err(TenancyError::DestinationAccessDenied {
            destination: destination.to_string(),
        })
    }

    fn rebind_denied(&self, connection_id: ConnectionId) -> TenancyError {
        warn!(connection_id = %connection_id, "connection is already bound");
        self.audit(
            AuditEvent::denied(AuditOperation::Connect, "connection", "connection is already bound")
                .high()
                .resource(Some(connection_id.to_string()), None),
        );
        TenancyError::TenantIdImmutable {
            resource_type: "connection".to_string(),
            resource_id: Some(connection_id.to_string()),
        }
    }

    fn audit(&self, event: AuditEvent) {
        record_decision(self.audit.as_ref(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tenant::TenantStatus;
    use crate::infrastructure::audit::InMemoryAuditSink;
    use crate::infrastructure::tenant_directory::InMemoryTenantDirectory;

    struct Fixture {
        guard: MessageChannelGuard,
        audit: Arc<InMemoryAuditSink>,
        a: TenantId,
        b: TenantId,
    }

    fn fixture(config: ChannelConfig) -> Fixture {
        let (a, b) = (TenantId::new(), TenantId::new());
        let directory = Arc::new(InMemoryTenantDirectory::new());
        directory.insert(a, "Lincoln High", TenantStatus::Active);
        directory.insert(b, "Oak Elementary", TenantStatus::Active);
        let audit = Arc::new(InMemoryAuditSink::new());
        let resolver = Arc::new(ContextPropagationFilter::new(directory, audit.clone(), TenantId::new()));
        Fixture {
            guard: MessageChannelGuard::new(resolver, audit.clone(), config),
            audit,
            a,
            b,
        }
    }

    #[test]
    fn test_classify_default_prefixes() {
        let f = fixture(ChannelConfig::default());
        let a = f.a;

        assert_eq!(f.guard.classify("/topic/broadcast/maintenance"), DestinationKind::Broadcast);
        assert_eq!(
            f.guard.classify("/user/alice/queue/notifications"),
            DestinationKind::UserPrivate { subject: "alice".to_string() }
        );
        assert_eq!(
            f.guard.classify(&format!("/topic/tenant/{a}/work-orders")),
            DestinationKind::TenantScoped { tenant_id: a }
        );
        assert_eq!(f.guard.classify("/topic/tenant/not-a-uuid/x"), DestinationKind::Unknown);
        assert_eq!(f.guard.classify("/user//queue"), DestinationKind::Unknown);
        assert_eq!(f.guard.classify("/queue/anything"), DestinationKind::Unknown);
        assert_eq!(
            f.guard.classify(&format!("/topic/broadcast/../tenant/{a}/x")),
            DestinationKind::Unknown
        );
    }

    #[tokio::test]
    async fn test_cross_tenant_message_is_rejected_and_connection_stays_open() {
        let f = fixture(ChannelConfig::default());
        let conn = ConnectionId::new();
        f.guard.on_connect(conn, &Principal::human("alice", f.a)).await.unwrap();

        let foreign = format!("/topic/tenant/{}/work-orders", f.b);
        let own = format!("/topic/tenant/{}/work-orders", f.a);

        let result = f.guard.authorize_destination(conn, &foreign, AuditOperation::Publish);
        assert!(matches!(result, Err(TenancyError::DestinationAccessDenied { .. })));

        assert!(f.guard.binding(conn).is_some());
        assert!(f.guard.authorize_destination(conn, &own, AuditOperation::Publish).is_ok());
        assert_eq!(f.audit.denied().len(), 1);
    }

    #[tokio::test]
    async fn test_user_private_destination_only_for_own_subject() {
        let f = fixture(ChannelConfig::default());
        let conn = ConnectionId::new();
        f.guard.on_connect(conn, &Principal::human("alice", f.a)).await.unwrap();

        assert!(f.guard.authorize_destination(conn, "/user/alice/queue/x", AuditOperation::Subscribe).is_ok());
        assert!(f.guard.authorize_destination(conn, "/user/bob/queue/x", AuditOperation::Subscribe).is_err());
    }

    #[tokio::test]
    async fn test_unknown_destination_depends_on_strict_mode() {
        let strict = fixture(ChannelConfig::default());
        let conn = ConnectionId::new();
        strict.guard.on_connect(conn, &Principal::human("alice", strict.a)).await.unwrap();
        assert!(strict.guard.authorize_destination(conn, "/queue/legacy", AuditOperation::Subscribe).is_err());

        let lenient = fixture(ChannelConfig {
            strict_destinations: false,
            ..ChannelConfig::default()
        });
        let conn = ConnectionId::new();
        lenient.guard.on_connect(conn, &Principal::human("alice", lenient.a)).await.unwrap();
        assert!(lenient.guard.authorize_destination(conn, "/queue/legacy", AuditOperation::Subscribe).is_ok());
    }

    #[tokio::test]
    async fn test_system_binding_reaches_any_tenant() {
        let f = fixture(ChannelConfig::default());
        let conn = ConnectionId::new();
        let binding = f.guard.on_connect(conn, &Principal::system("dispatcher")).await.unwrap();
        assert!(binding.is_system);

        let foreign = format!("/topic/tenant/{}/alerts", f.b);
        assert!(f.guard.authorize_destination(conn, &foreign, AuditOperation::Publish).is_ok());
    }

    #[tokio::test]
    async fn test_binding_is_immutable() {
        let f = fixture(ChannelConfig::default());
        let conn = ConnectionId::new();
        f.guard.on_connect(conn, &Principal::human("alice", f.a)).await.unwrap();

        let result = f.guard.on_connect(conn, &Principal::human("bob", f.b)).await;
        assert!(matches!(result, Err(TenancyError::TenantIdImmutable { .. })));
        assert_eq!(f.guard.binding(conn).unwrap().tenant_id, f.a);
    }

    #[tokio::test]
    async fn test_dispatch_reinstates_binding_per_message() {
        let f = fixture(ChannelConfig::default());
        let conn = ConnectionId::new();
        f.guard.on_connect(conn, &Principal::human("alice", f.a)).await.unwrap();

        for _ in 0..3 {
            let seen = f.guard.dispatch(conn, async { tenant_context::current_tenant() }).await.unwrap();
            assert_eq!(seen, Some(f.a));
            assert!(!tenant_context::has_context());
        }
    }

    #[tokio::test]
    async fn test_unknown_connection_and_disconnect() {
        let f = fixture(ChannelConfig::default());
        let conn = ConnectionId::new();

        let result = f.guard.dispatch(conn, async {}).await;
        assert_eq!(result, Err(TenancyError::UnknownConnection));

        f.guard.on_connect(conn, &Principal::human("alice", f.a)).await.unwrap();
        assert_eq!(f.guard.connection_count(), 1);
        assert!(f.guard.on_disconnect(conn).is_some());
        assert_eq!(f.guard.connection_count(), 0);
        assert!(f.guard.authorize_destination(conn, "/topic/broadcast/x", AuditOperation::Subscribe).is_err());
    }

    #[tokio::test]
    async fn test_same_subject_in_two_tenants_routes_to_distinct_user_topics() {
        let f = fixture(ChannelConfig::default());
        let (alice_a, alice_b) = (ConnectionId::new(), ConnectionId::new());
        f.guard.on_connect(alice_a, &Principal::human("alice", f.a)).await.unwrap();
        f.guard.on_connect(alice_b, &Principal::human("alice", f.b)).await.unwrap();

        let destination = "/user/alice/queue/notifications";
        let in_a = f.guard.authorize_destination(alice_a, destination, AuditOperation::Subscribe).unwrap();
        let in_b = f.guard.authorize_destination(alice_b, destination, AuditOperation::Subscribe).unwrap();

        assert_eq!(in_a.routing_key, format!("/user/{}/alice/queue/notifications", f.a));
        assert_eq!(in_b.routing_key, format!("/user/{}/alice/queue/notifications", f.b));
        assert_ne!(in_a.routing_key, in_b.routing_key);
    }

    #[tokio::test]
    async fn test_broad_broadcast_prefix_does_not_capture_tenant_destinations() {
        let f = fixture(ChannelConfig {
            broadcast_prefix: "/topic/".to_string(),
            ..ChannelConfig::default()
        });
        let foreign = format!("/topic/tenant/{}/work-orders", f.b);
        assert_eq!(f.guard.classify(&foreign), DestinationKind::TenantScoped { tenant_id: f.b });
        assert_eq!(
            f.guard.classify("/topic/user/alice"),
            DestinationKind::Broadcast
        );

        let conn = ConnectionId::new();
        f.guard.on_connect(conn, &Principal::human("alice", f.a)).await.unwrap();
        let result = f.guard.authorize_destination(conn, &foreign, AuditOperation::Subscribe);
        assert!(matches!(result, Err(TenancyError::DestinationAccessDenied { .. })));
    }

    #[tokio::test]
    async fn test_each_connect_decision_emits_one_event() {
        let f = fixture(ChannelConfig::default());
        let conn = ConnectionId::new();
        f.guard.on_connect(conn, &Principal::human("alice", f.a)).await.unwrap();
        assert_eq!(f.audit.len(), 1);

        let _ = f.guard.on_connect(conn, &Principal::human("alice", f.a)).await;
        let events = f.audit.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, crate::domain::audit::AuditOutcome::Allowed);
        assert_eq!(events[1].outcome, crate::domain::audit::AuditOutcome::Denied);
        assert!(events.iter().all(|e| e.operation == AuditOperation::Connect));
    }
}
