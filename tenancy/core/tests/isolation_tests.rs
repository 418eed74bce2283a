// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end isolation scenarios across the three access paths: persistence,
//! declarative service checks and the message channel.

use std::sync::Arc;
use std::time::Duration;

use caretaker_tenancy::application::access_validator::DeclarativeAccessValidator;
use caretaker_tenancy::application::context_propagation::{ContextPropagationFilter, TenantRequirement};
use caretaker_tenancy::application::entity_guard::EntityLifecycleGuard;
use caretaker_tenancy::application::message_channel_guard::{ConnectionId, MessageChannelGuard};
use caretaker_tenancy::domain::audit::{AuditOperation, AuditOutcome, AuditSeverity};
use caretaker_tenancy::domain::errors::TenancyError;
use caretaker_tenancy::domain::principal::Principal;
use caretaker_tenancy::domain::record::TenantScoped;
use caretaker_tenancy::domain::tenancy_config::{ChannelConfig, ValidatorConfig};
use caretaker_tenancy::domain::tenant::{TenantId, TenantStatus};
use caretaker_tenancy::domain::tenant_context::{self, TenantContext};
use caretaker_tenancy::domain::validation::{AccessRule, Invocation};
use caretaker_tenancy::infrastructure::audit::InMemoryAuditSink;
use caretaker_tenancy::infrastructure::ownership::InMemoryOwnershipLookup;
use caretaker_tenancy::infrastructure::store::{StoreError, TenantScopedStore};
use caretaker_tenancy::infrastructure::tenant_directory::InMemoryTenantDirectory;

#[derive(Debug, Clone, PartialEq)]
struct WorkOrder {
    id: String,
    tenant_id: Option<TenantId>,
    summary: String,
}

impl WorkOrder {
    fn new(id: &str, summary: &str) -> Self {
        Self {
            id: id.to_string(),
            tenant_id: None,
            summary: summary.to_string(),
        }
    }
}

impl TenantScoped for WorkOrder {
    fn resource_type(&self) -> &'static str {
        "work_order"
    }

    fn resource_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    fn set_tenant_id(&mut self, tenant_id: TenantId) {
        self.tenant_id = Some(tenant_id);
    }
}

struct Harness {
    tenant_a: TenantId,
    tenant_b: TenantId,
    system: TenantId,
    directory: Arc<InMemoryTenantDirectory>,
    ownership: Arc<InMemoryOwnershipLookup>,
    audit: Arc<InMemoryAuditSink>,
    filter: Arc<ContextPropagationFilter>,
    store: TenantScopedStore<WorkOrder>,
    validator: DeclarativeAccessValidator,
}

impl Harness {
    fn new() -> Self {
        let (tenant_a, tenant_b, system) = (TenantId::new(), TenantId::new(), TenantId::new());
        let directory = Arc::new(InMemoryTenantDirectory::new());
        directory.insert(tenant_a, "Lincoln High", TenantStatus::Active);
        directory.insert(tenant_b, "Oak Elementary", TenantStatus::Active);

        let ownership = Arc::new(InMemoryOwnershipLookup::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let filter = Arc::new(ContextPropagationFilter::new(directory.clone(), audit.clone(), system));
        let store = TenantScopedStore::new(Arc::new(EntityLifecycleGuard::new(audit.clone())))
            .with_ownership(ownership.clone());
        let validator = DeclarativeAccessValidator::new(
            directory.clone(),
            ownership.clone(),
            audit.clone(),
            ValidatorConfig::default(),
        );

        Self {
            tenant_a,
            tenant_b,
            system,
            directory,
            ownership,
            audit,
            filter,
            store,
            validator,
        }
    }

    fn as_tenant<R>(&self, tenant_id: TenantId, f: impl FnOnce() -> R) -> R {
        tenant_context::sync_scope(Some(TenantContext::tenant(tenant_id)), f)
    }

    fn seed(&self, tenant_id: TenantId, id: &str) -> WorkOrder {
        self.as_tenant(tenant_id, || self.store.insert(WorkOrder::new(id, "Broken boiler")))
            .unwrap()
    }

    fn denied_count(&self) -> usize {
        self.audit.denied().len()
    }
}

#[test]
fn test_create_without_tenant_inherits_context() {
    let h = Harness::new();
    let created = h.as_tenant(h.tenant_a, || h.store.insert(WorkOrder::new("wo-1", "Leaking roof"))).unwrap();

    assert_eq!(created.tenant_id, Some(h.tenant_a));
    let events = h.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, AuditOperation::Create);
    assert_eq!(events[0].outcome, AuditOutcome::Allowed);
}

#[test]
fn test_create_for_foreign_tenant_is_denied() {
    let h = Harness::new();
    let mut order = WorkOrder::new("wo-1", "Leaking roof");
    order.tenant_id = Some(h.tenant_b);

    let result = h.as_tenant(h.tenant_a, || h.store.insert(order));
    assert!(matches!(result, Err(StoreError::Tenancy(TenancyError::CrossTenantAccessDenied { .. }))));
    assert!(h.store.is_empty());
    assert_eq!(h.denied_count(), 1);
}

#[test]
fn test_create_without_context_fails_closed() {
    let h = Harness::new();
    let result = tenant_context::sync_scope(None, || h.store.insert(WorkOrder::new("wo-1", "Leaking roof")));
    assert!(matches!(result, Err(StoreError::Tenancy(TenancyError::MissingTenantContext))));
    assert!(h.store.is_empty());
}

#[test]
fn test_cross_tenant_update_leaves_record_unchanged() {
    let h = Harness::new();
    h.seed(h.tenant_b, "wo-b");
    h.audit.clear();

    let mut tampered = WorkOrder::new("wo-b", "Closed by attacker");
    tampered.tenant_id = Some(h.tenant_b);
    let result = h.as_tenant(h.tenant_a, || h.store.update(tampered));

    assert!(matches!(result, Err(StoreError::Tenancy(TenancyError::CrossTenantAccessDenied { .. }))));
    assert_eq!(h.denied_count(), 1);
    assert_eq!(h.audit.len(), 1);

    let stored = h.as_tenant(h.tenant_b, || h.store.get("wo-b")).unwrap();
    assert_eq!(stored.summary, "Broken boiler");
    assert_eq!(stored.tenant_id, Some(h.tenant_b));
}

#[test]
fn test_each_foreign_access_yields_exactly_one_denial() {
    let h = Harness::new();
    let record = h.seed(h.tenant_b, "wo-b");

    h.audit.clear();
    assert!(h.as_tenant(h.tenant_a, || h.store.get("wo-b")).is_none());
    assert_eq!(h.denied_count(), 1);

    h.audit.clear();
    assert!(h.as_tenant(h.tenant_a, || h.store.update(record.clone())).is_err());
    assert_eq!(h.denied_count(), 1);

    h.audit.clear();
    assert!(h.as_tenant(h.tenant_a, || h.store.delete("wo-b")).is_err());
    assert_eq!(h.denied_count(), 1);

    assert_eq!(h.store.len(), 1);
}

#[test]
fn test_post_load_mismatch_is_high_severity() {
    let h = Harness::new();
    h.seed(h.tenant_b, "wo-b");
    h.audit.clear();

    let _ = h.as_tenant(h.tenant_a, || h.store.get("wo-b"));
    let denied = h.audit.denied();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].operation, AuditOperation::Read);
    assert_eq!(denied[0].severity, AuditSeverity::High);
}

#[test]
fn test_tenant_id_is_immutable_even_for_system() {
    let h = Harness::new();
    let mut record = h.seed(h.tenant_a, "wo-a");
    record.tenant_id = Some(h.tenant_b);

    let result = tenant_context::sync_scope(Some(TenantContext::system(h.system)), || h.store.update(record));
    assert!(matches!(result, Err(StoreError::Tenancy(TenancyError::TenantIdImmutable { .. }))));

    let stored = h.as_tenant(h.tenant_a, || h.store.get("wo-a")).unwrap();
    assert_eq!(stored.tenant_id, Some(h.tenant_a));
}

#[tokio::test]
async fn test_system_principal_operates_across_tenants() {
    let h = Harness::new();
    h.seed(h.tenant_a, "wo-a");
    h.seed(h.tenant_b, "wo-b");

    let principal = Principal::system("nightly-scheduler");
    let visible = h
        .filter
        .run(Some(&principal), TenantRequirement::Required, async {
            let mut order = h.store.get("wo-b").unwrap();
            order.summary = "Inspected".to_string();
            h.store.update(order).unwrap();
            h.store.delete("wo-a").unwrap();
            h.store.list().len()
        })
        .await
        .unwrap();

    assert_eq!(visible, 1);
    let stored = h.as_tenant(h.tenant_b, || h.store.get("wo-b")).unwrap();
    assert_eq!(stored.summary, "Inspected");
}

#[tokio::test]
async fn test_system_tenant_unreachable_for_ordinary_principals() {
    let h = Harness::new();
    let forged = Principal::human("mallory", h.system);

    let result = h
        .filter
        .run(Some(&forged), TenantRequirement::Required, async { tenant_context::get() })
        .await;
    assert!(matches!(result, Err(TenancyError::CrossTenantAccessDenied { .. })));

    let denial = h.audit.denied().pop().unwrap();
    assert_eq!(denial.severity, AuditSeverity::High);
    assert_eq!(denial.operation, AuditOperation::Request);
}

#[tokio::test]
async fn test_context_absent_before_and_after_unit_of_work() {
    let h = Harness::new();
    let principal = Principal::human("alice", h.tenant_a);

    assert!(!tenant_context::has_context());
    let inside = h
        .filter
        .run(Some(&principal), TenantRequirement::Required, async { tenant_context::current_tenant() })
        .await
        .unwrap();
    assert_eq!(inside, Some(h.tenant_a));
    assert!(!tenant_context::has_context());

    // Cancelled unit of work: the future is dropped mid-flight.
    let slow = h.filter.run(Some(&principal), TenantRequirement::Required, async {
        tokio::time::sleep(Duration::from_secs(5)).await;
    });
    assert!(tokio::time::timeout(Duration::from_millis(20), slow).await.is_err());
    assert!(!tenant_context::has_context());
}

#[test]
fn test_clear_twice_is_a_no_op() {
    tenant_context::sync_scope(Some(TenantContext::tenant(TenantId::new())), || {
        tenant_context::clear();
        assert!(!tenant_context::has_context());
        tenant_context::clear();
        assert!(!tenant_context::has_context());
    });
}

#[test]
fn test_pooled_thread_does_not_leak_context_between_jobs() {
    let tenant = TenantId::new();
    let worker = std::thread::spawn(move || {
        tenant_context::sync_scope(Some(TenantContext::tenant(tenant)), || {
            assert_eq!(tenant_context::current_tenant(), Some(tenant));
        });
        let _ = std::panic::catch_unwind(|| {
            tenant_context::sync_scope(Some(TenantContext::tenant(tenant)), || panic!("job failed"));
        });
        tenant_context::sync_scope(None, tenant_context::current_tenant)
    });
    assert_eq!(worker.join().unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_units_of_work_are_isolated() {
    let tenants: Vec<TenantId> = (0..16).map(|_| TenantId::new()).collect();
    let handles: Vec<_> = tenants
        .iter()
        .copied()
        .map(|tenant| {
            tokio::spawn(tenant_context::scope(Some(TenantContext::tenant(tenant)), async move {
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                    assert_eq!(tenant_context::current_tenant(), Some(tenant));
                }
                tenant
            }))
        })
        .collect();

    for (handle, tenant) in handles.into_iter().zip(tenants) {
        assert_eq!(handle.await.unwrap(), tenant);
    }
}

#[tokio::test]
async fn test_explicit_tenant_id_succeeds_iff_equal() {
    let h = Harness::new();
    let rule = AccessRule::explicit_tenant_id("tenantId");

    let own = Invocation::new("list_schools").tenant_id("tenantId", Some(h.tenant_a));
    let other = Invocation::new("list_schools").tenant_id("tenantId", Some(h.tenant_b));
    let missing = Invocation::new("list_schools").tenant_id("tenantId", None);

    tenant_context::scope(Some(TenantContext::tenant(h.tenant_a)), async {
        assert!(h.validator.check(&rule, &own).await.is_ok());
        assert!(h.validator.check(&rule, &other).await.is_err());
        assert!(h.validator.check(&rule, &missing).await.is_err());
    })
    .await;
}

#[tokio::test]
async fn test_id_list_failure_identifies_foreign_id() {
    let h = Harness::new();
    h.ownership.insert("asset", "x", h.tenant_a);
    h.ownership.insert("asset", "y", h.tenant_b);
    h.ownership.insert("asset", "z", h.tenant_a);

    let ids = vec!["x".to_string(), "y".to_string(), "z".to_string()];
    let invocation = Invocation::new("bulk_close_assets").ids("assetIds", "asset", &ids);
    let rule = AccessRule::id_list_ownership("assetIds");

    let result = tenant_context::scope(Some(TenantContext::tenant(h.tenant_a)), h.validator.check(&rule, &invocation)).await;
    match result {
        Err(TenancyError::CrossTenantAccessDenied { resource_id, .. }) => assert_eq!(resource_id.as_deref(), Some("y")),
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_write_gate_denies_inactive_owner() {
    let h = Harness::new();
    let order = h.seed(h.tenant_a, "wo-a");
    h.directory.set_status(h.tenant_a, TenantStatus::Suspended).unwrap();

    let invocation = Invocation::new("close_work_order").entity("order", &order);
    let ran = std::sync::atomic::AtomicBool::new(false);
    let result = tenant_context::scope(
        Some(TenantContext::tenant(h.tenant_a)),
        h.validator.guard(&AccessRule::write_gate("order"), &invocation, async {
            ran.store(true, std::sync::atomic::Ordering::SeqCst);
        }),
    )
    .await;

    assert!(matches!(result, Err(TenancyError::InactiveTenantWriteDenied)));
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));

    // Reads stay available to a suspended tenant.
    let read = tenant_context::scope(
        Some(TenantContext::tenant(h.tenant_a)),
        h.validator.check(&AccessRule::entity_ownership("order"), &invocation),
    )
    .await;
    assert!(read.is_ok());
}

#[tokio::test]
async fn test_foreign_destination_rejected_connection_stays_open() {
    let h = Harness::new();
    let guard = MessageChannelGuard::new(h.filter.clone(), h.audit.clone(), ChannelConfig::default());
    let connection = ConnectionId::new();
    guard.on_connect(connection, &Principal::human("alice", h.tenant_a)).await.unwrap();

    let foreign = format!("/topic/tenant/{}/work-orders", h.tenant_b);
    let result = guard.authorize_destination(connection, &foreign, AuditOperation::Publish);
    assert!(matches!(result, Err(TenancyError::DestinationAccessDenied { .. })));

    assert!(guard.binding(connection).is_some());
    let own = format!("/topic/tenant/{}/work-orders", h.tenant_a);
    assert!(guard.authorize_destination(connection, &own, AuditOperation::Publish).is_ok());

    let per_message = guard
        .dispatch(connection, async { tenant_context::current_tenant() })
        .await
        .unwrap();
    assert_eq!(per_message, Some(h.tenant_a));
    assert!(!tenant_context::has_context());
}
