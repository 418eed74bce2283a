// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Declarative Access Validator
//!
//! Explicit decorator around service methods. A method is guarded by pairing an
//! [`AccessRule`] with the [`Invocation`] describing its arguments:
//!
//! ```ignore
//! let rule = AccessRule::id_list_ownership("asset_ids");
//! let call = Invocation::new("assets.bulk_retire").ids("asset_ids", "asset", &ids);
//! validator.guard(&rule, &call, assets.retire(&ids)).await??;
//! ```
//!
//! Each check emits exactly one audit event. Misconfigured rules (missing or
//! wrongly-shaped selector arguments) always fail, even in observe-only mode.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, warn};

use crate::domain::audit::{record_decision, AuditEvent, AuditOperation, AuditSink};
use crate::domain::directory::{OwnershipLookup, TenantDirectory};
use crate::domain::errors::TenancyError;
use crate::domain::tenancy_config::ValidatorConfig;
use crate::domain::tenant_context::{self, TenantContext};
use crate::domain::validation::{AccessRule, Argument, Invocation, ValidationMode};

type Denial = (TenancyError, AuditEvent);

pub struct DeclarativeAccessValidator {
    directory: Arc<dyn TenantDirectory>,
    ownership: Arc<dyn OwnershipLookup>,
    audit: Arc<dyn AuditSink>,
    config: ValidatorConfig,
}

impl DeclarativeAccessValidator {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        ownership: Arc<dyn OwnershipLookup>,
        audit: Arc<dyn AuditSink>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            directory,
            ownership,
            audit,
            config,
        }
    }

    /// Evaluate `rule` against `invocation` under the current tenant context.
    ///
    /// With `throw_on_failure` off (on the rule or globally), ownership failures
    /// are logged and `Ok(())` is returned.
    pub async fn check(&self, rule: &AccessRule, invocation: &Invocation<'_>) -> Result<(), TenancyError> {
        let operation = audit_operation(rule.mode);
        match self.evaluate(rule, invocation, operation).await {
            Ok(event) => {
                record_decision(self.audit.as_ref(), event);
                Ok(())
            }
            Err((err, event)) => {
                record_decision(self.audit.as_ref(), event);
                let enforce = rule.throw_on_failure && self.config.throw_on_failure;
                if enforce || matches!(err, TenancyError::InvalidAccessRule(_)) {
                    Err(err)
                } else {
                    warn!(
                        operation = invocation.operation,
                        mode = ?rule.mode,
                        error = err.kind(),
                        "access check failed; proceeding in observe-only mode"
                    );
                    Ok(())
                }
            }
        }
    }

    /// Run `operation` only if `rule` passes.
    pub async fn guard<F>(&self, rule: &AccessRule, invocation: &Invocation<'_>, operation: F) -> Result<F::Output, TenancyError>
    where
        F: Future,
    {
        self.check(rule, invocation).await?;
        Ok(operation.await)
    }

    async fn evaluate(
        &self,
        rule: &AccessRule,
        invocation: &Invocation<'_>,
        operation: AuditOperation,
    ) -> Result<AuditEvent, Denial> {
        let resource_type = invocation.operation;
        let ctx = tenant_context::get();

        if rule.mode == ValidationMode::RequireContext {
            return match ctx {
                Some(ctx) => Ok(AuditEvent::allowed(operation, resource_type, "tenant context present").acting(Some(&ctx))),
                None if invocation.system_operation && self.config.exempt_system_operations => {
                    Ok(AuditEvent::allowed(operation, resource_type, "system operation exempt"))
                }
                None => Err(missing_context(operation, resource_type)),
            };
        }

        let Some(ctx) = ctx else {
            return Err(missing_context(operation, resource_type));
        };

        let argument = self.select(rule, invocation, operation, &ctx)?;
        let mut allowed = self.check_ownership(argument, operation, resource_type, &ctx).await?;

        if rule.mode.requires_active_tenant() && !ctx.is_system_tenant {
            match self.directory.is_active(ctx.tenant_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err((
                        TenancyError::InactiveTenantWriteDenied,
                        AuditEvent::denied(operation, resource_type, "tenant is not active").acting(Some(&ctx)),
                    ))
                }
                Err(e) => {
                    error!(error = %e, "tenant status lookup failed");
                    return Err(unavailable(operation, resource_type, &ctx));
                }
            }
            allowed.reason = format!("{}; tenant active", allowed.reason);
        }

        Ok(allowed)
    }

    fn select<'a>(
        &self,
        rule: &AccessRule,
        invocation: &Invocation<'a>,
        operation: AuditOperation,
        ctx: &TenantContext,
    ) -> Result<Argument<'a>, Denial> {
        let misconfigured = |message: String| {
            error!(operation = invocation.operation, mode = ?rule.mode, "{}", message);
            (
                TenancyError::InvalidAccessRule(message),
                AuditEvent::denied(operation, invocation.operation, "access rule misconfigured").acting(Some(ctx)),
            )
        };

        let Some(selector) = rule.selector.as_deref() else {
            return Err(misconfigured(format!("{:?} requires a selector", rule.mode)));
        };
        let Some(argument) = invocation.argument(selector) else {
            return Err(misconfigured(format!("no argument named '{selector}'")));
        };

        let shape_ok = match (rule.mode, &argument) {
            (ValidationMode::EntityOwnership, Argument::Entity(_)) => true,
            (ValidationMode::ExplicitTenantId, Argument::TenantId(_)) => true,
            (ValidationMode::IdListOwnership, Argument::Ids { .. }) => true,
            (ValidationMode::WriteGate | ValidationMode::DeleteGate, _) => true,
            _ => false,
        };
        if !shape_ok {
            return Err(misconfigured(format!("argument '{selector}' has the wrong shape for {:?}", rule.mode)));
        }

        Ok(argument)
    }

    async fn check_ownership(
        &self,
        argument: Argument<'_>,
        operation: AuditOperation,
        resource_type: &str,
        ctx: &TenantContext,
    ) -> Result<AuditEvent, Denial> {
        match argument {
            Argument::Entity(entity) => {
                let owner = entity.tenant_id();
                match owner {
                    Some(owner) if ctx.permits(&owner) => Ok(AuditEvent::allowed(
                        operation,
                        entity.resource_type(),
                        "entity owned by current tenant",
                    )
                    .resource(entity.resource_id(), Some(owner))
                    .acting(Some(ctx))),
                    _ => Err((
                        TenancyError::cross_tenant(entity.resource_type(), entity.resource_id()),
                        AuditEvent::denied(operation, entity.resource_type(), "entity owned by another tenant")
                            .high()
                            .resource(entity.resource_id(), owner)
                            .acting(Some(ctx)),
                    )),
                }
            }
            Argument::TenantId(tenant_id) => match tenant_id {
                Some(tenant_id) if ctx.permits(&tenant_id) => Ok(AuditEvent::allowed(
                    operation,
                    resource_type,
                    "tenant argument matches context",
                )
                .resource(None, Some(tenant_id))
                .acting(Some(ctx))),
                _ => Err((
                    TenancyError::cross_tenant("tenant", None),
                    AuditEvent::denied(operation, resource_type, "tenant argument does not match context")
                        .high()
                        .resource(None, tenant_id)
                        .acting(Some(ctx)),
                )),
            },
            Argument::Ids { resource_type, ids } => {
                if ids.is_empty() {
                    return Err((
                        TenancyError::cross_tenant(resource_type, None),
                        AuditEvent::denied(operation, resource_type, "empty id list").acting(Some(ctx)),
                    ));
                }
                for id in ids {
                    let owner = if id.is_empty() {
                        None
                    } else {
                        match self.ownership.owner_of(resource_type, id).await {
                            Ok(owner) => owner,
                            Err(e) => {
                                error!(error = %e, resource_type, "ownership lookup failed");
                                return Err(unavailable(operation, resource_type, ctx));
                            }
                        }
                    };

                    let owned = owner.is_some_and(|owner| ctx.permits(&owner));
                    if !owned {
                        let reason = if owner.is_none() { "id does not exist" } else { "id owned by another tenant" };
                        return Err((
                            TenancyError::cross_tenant(resource_type, Some(id.clone())),
                            AuditEvent::denied(operation, resource_type, reason)
                                .high()
                                .resource(Some(id.clone()), owner)
                                .acting(Some(ctx)),
                        ));
                    }
                }
                Ok(AuditEvent::allowed(operation, resource_type, format!("{} ids owned by current tenant", ids.len()))
                    .acting(Some(ctx)))
            }
        }
    }
}

fn audit_operation(mode: ValidationMode) -> AuditOperation {
    match mode {
        ValidationMode::WriteGate => AuditOperation::Update,
        ValidationMode::DeleteGate => AuditOperation::Delete,
        _ => AuditOperation::Read,
    }
}

fn missing_context(operation: AuditOperation, resource_type: &str) -> Denial {
    (
        TenancyError::MissingTenantContext,
        AuditEvent::denied(operation, resource_type, "no tenant context"),
    )
}

fn unavailable(operation: AuditOperation, resource_type: &str, ctx: &TenantContext) -> Denial {
    (
        TenancyError::DirectoryUnavailable,
        AuditEvent::denied(operation, resource_type, "collaborator unavailable").acting(Some(ctx)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::TenantScoped;
    use crate::domain::tenant::{TenantId, TenantStatus};
    use crate::infrastructure::audit::InMemoryAuditSink;
    use crate::infrastructure::ownership::InMemoryOwnershipLookup;
    use crate::infrastructure::tenant_directory::InMemoryTenantDirectory;

    struct Asset {
        id: String,
        tenant_id: Option<TenantId>,
    }

    impl TenantScoped for Asset {
        fn resource_type(&self) -> &'static str {
            "asset"
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

    struct Fixture {
        validator: DeclarativeAccessValidator,
        audit: Arc<InMemoryAuditSink>,
        directory: Arc<InMemoryTenantDirectory>,
        ownership: Arc<InMemoryOwnershipLookup>,
        a: TenantId,
        b: TenantId,
    }

    fn fixture(config: ValidatorConfig) -> Fixture {
        let (a, b) = (TenantId::new(), TenantId::new());
        let directory = Arc::new(InMemoryTenantDirectory::new());
        directory.insert(a, "Lincoln High", TenantStatus::Active);
        directory.insert(b, "Oak Elementary", TenantStatus::Active);
        let ownership = Arc::new(InMemoryOwnershipLookup::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let validator = DeclarativeAccessValidator::new(directory.clone(), ownership.clone(), audit.clone(), config);
        Fixture {
            validator,
            audit,
            directory,
            ownership,
            a,
            b,
        }
    }

    fn as_tenant(tenant: TenantId) -> Option<TenantContext> {
        Some(TenantContext::tenant(tenant))
    }

    #[tokio::test]
    async fn test_require_context() {
        let f = fixture(ValidatorConfig::default());
        let rule = AccessRule::require_context();
        let call = Invocation::new("reports.list");

        let outside = tenant_context::scope(None, f.validator.check(&rule, &call)).await;
        assert_eq!(outside, Err(TenancyError::MissingTenantContext));

        let inside = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;
        assert!(inside.is_ok());
        assert_eq!(f.audit.events().len(), 2);
    }

    #[tokio::test]
    async fn test_system_operations_exempt_only_when_configured() {
        let rule = AccessRule::require_context();
        let call = Invocation::new("reports.nightly_rollup").as_system_operation();

        let strict = fixture(ValidatorConfig::default());
        assert!(strict.validator.check(&rule, &call).await.is_err());

        let exempt = fixture(ValidatorConfig {
            exempt_system_operations: true,
            ..ValidatorConfig::default()
        });
        assert!(exempt.validator.check(&rule, &call).await.is_ok());
    }

    #[tokio::test]
    async fn test_explicit_tenant_id_succeeds_iff_equal() {
        let f = fixture(ValidatorConfig::default());
        let rule = AccessRule::explicit_tenant_id("tenant_id");

        for (argument, expected_ok) in [(Some(f.a), true), (Some(f.b), false), (None, false)] {
            let call = Invocation::new("schools.list").tenant_id("tenant_id", argument);
            let result = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;
            assert_eq!(result.is_ok(), expected_ok, "argument {argument:?}");
        }
    }

    #[tokio::test]
    async fn test_entity_ownership() {
        let f = fixture(ValidatorConfig::default());
        let rule = AccessRule::entity_ownership("asset");
        let foreign = Asset { id: "boiler-2".to_string(), tenant_id: Some(f.b) };
        let call = Invocation::new("assets.update").entity("asset", &foreign);

        let result = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;
        assert!(matches!(result, Err(TenancyError::CrossTenantAccessDenied { .. })));

        let system = Some(TenantContext::system(TenantId::new()));
        assert!(tenant_context::scope(system, f.validator.check(&rule, &call)).await.is_ok());
    }

    #[tokio::test]
    async fn test_id_list_failure_identifies_the_foreign_id() {
        let f = fixture(ValidatorConfig::default());
        f.ownership.insert("asset", "x", f.a);
        f.ownership.insert("asset", "y", f.b);
        f.ownership.insert("asset", "z", f.a);
        let ids = vec!["x".to_string(), "y".to_string(), "z".to_string()];

        let rule = AccessRule::id_list_ownership("asset_ids");
        let call = Invocation::new("assets.bulk_retire").ids("asset_ids", "asset", &ids);
        let result = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;

        match result {
            Err(TenancyError::CrossTenantAccessDenied { resource_id, .. }) => {
                assert_eq!(resource_id.as_deref(), Some("y"));
            }
            other => panic!("expected cross-tenant denial, got {other:?}"),
        }
        let denied = f.audit.denied();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].resource_id.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_id_list_rejects_empty_and_missing_ids() {
        let f = fixture(ValidatorConfig::default());
        f.ownership.insert("asset", "x", f.a);
        let rule = AccessRule::id_list_ownership("ids");

        for ids in [vec!["x".to_string(), String::new()], vec!["ghost".to_string()]] {
            let call = Invocation::new("assets.bulk_retire").ids("ids", "asset", &ids);
            let result = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;
            assert!(result.is_err());
        }

        let system = Some(TenantContext::system(TenantId::new()));
        let ghost = vec!["ghost".to_string()];
        let call = Invocation::new("assets.bulk_retire").ids("ids", "asset", &ghost);
        assert!(tenant_context::scope(system, f.validator.check(&rule, &call)).await.is_err());
    }

    #[tokio::test]
    async fn test_id_list_rejects_an_empty_list() {
        let f = fixture(ValidatorConfig::default());
        let rule = AccessRule::id_list_ownership("ids");
        let call = Invocation::new("assets.bulk_retire").ids("ids", "asset", &[]);

        let result = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;
        assert!(matches!(result, Err(TenancyError::CrossTenantAccessDenied { .. })));

        let denied = f.audit.denied();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].reason, "empty id list");
    }

    #[tokio::test]
    async fn test_write_gate_denies_inactive_tenant_with_matching_ownership() {
        let f = fixture(ValidatorConfig::default());
        f.directory.set_status(f.a, TenantStatus::Inactive).unwrap();
        let own = Asset { id: "hvac-1".to_string(), tenant_id: Some(f.a) };

        let rule = AccessRule::write_gate("asset");
        let call = Invocation::new("assets.update").entity("asset", &own);
        let result = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;
        assert_eq!(result, Err(TenancyError::InactiveTenantWriteDenied));
        assert_eq!(f.audit.denied()[0].operation, AuditOperation::Update);
    }

    #[tokio::test]
    async fn test_delete_gate_passes_for_active_owner() {
        let f = fixture(ValidatorConfig::default());
        let rule = AccessRule::delete_gate("tenant_id");
        let call = Invocation::new("schools.archive").tenant_id("tenant_id", Some(f.a));

        let result = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;
        assert!(result.is_ok());
        assert_eq!(f.audit.events()[0].operation, AuditOperation::Delete);
    }

    #[tokio::test]
    async fn test_observe_only_logs_and_proceeds() {
        let f = fixture(ValidatorConfig::default());
        let rule = AccessRule::explicit_tenant_id("tenant_id").observe_only();
        let call = Invocation::new("schools.list").tenant_id("tenant_id", Some(f.b));

        let output = tenant_context::scope(as_tenant(f.a), f.validator.guard(&rule, &call, async { 42 })).await;
        assert_eq!(output, Ok(42));
        assert_eq!(f.audit.denied().len(), 1);
    }

    #[tokio::test]
    async fn test_misconfigured_rule_fails_closed_even_when_observing() {
        let f = fixture(ValidatorConfig::default());
        let call = Invocation::new("schools.list").tenant_id("tenant_id", Some(f.a));

        for rule in [
            AccessRule::explicit_tenant_id("school_id").observe_only(),
            AccessRule::id_list_ownership("tenant_id").observe_only(),
        ] {
            let result = tenant_context::scope(as_tenant(f.a), f.validator.check(&rule, &call)).await;
            assert!(matches!(result, Err(TenancyError::InvalidAccessRule(_))));
        }
    }

    #[tokio::test]
    async fn test_guard_does_not_run_operation_on_denial() {
        let f = fixture(ValidatorConfig::default());
        let rule = AccessRule::explicit_tenant_id("tenant_id");
        let call = Invocation::new("schools.list").tenant_id("tenant_id", Some(f.b));
        let mut ran = false;

        let result = tenant_context::scope(
            as_tenant(f.a),
            f.validator.guard(&rule, &call, async {
                ran = true;
            }),
        )
        .await;
        assert!(result.is_err());
        assert!(!ran);
    }
}
