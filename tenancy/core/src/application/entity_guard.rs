// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Entity Lifecycle Guard
//!
//! Persistence-side hooks enforcing tenant ownership. Repositories call these
//! synchronously inside the same transaction as the write they protect; an `Err`
//! aborts that transaction before anything is written.
//!
//! | Hook | Check |
//! |------|-------|
//! | `before_create` | assign tenant from context, or verify the preset one |
//! | `before_system_create` | background jobs without a context; tenant must be preset |
//! | `before_update` | ownership of the persisted row, then tenant-id immutability |
//! | `before_delete` | ownership |
//! | `after_load` | ownership; mismatches are audited and counted, never thrown |
//!
//! Every branch emits exactly one audit event.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::audit::{record_decision, AuditEvent, AuditOperation, AuditSink};
use crate::domain::errors::TenancyError;
use crate::domain::record::TenantScoped;
use crate::domain::tenant::TenantId;
use crate::domain::tenant_context::{self, TenantContext};

/// Result of the post-load check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadVerdict {
    /// Owned by the current tenant, or loaded by the system tenant.
    Consistent,
    /// No context was active; only storage-level filtering applied.
    Unscoped,
    /// Owned by another tenant. Callers must not hand the record out.
    Mismatch,
}

pub struct EntityLifecycleGuard {
    audit: Arc<dyn AuditSink>,
}

impl EntityLifecycleGuard {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }

    /// Assign the current tenant to a new record, or verify the one it carries.
    pub fn before_create<R>(&self, record: &mut R) -> Result<(), TenancyError>
    where
        R: TenantScoped + ?Sized,
    {
        let resource_type = record.resource_type();
        let ctx = self.require_context(AuditOperation::Create, &*record)?;

        match record.tenant_id() {
            None => {
                record.set_tenant_id(ctx.tenant_id);
                debug!(resource_type, tenant_id = %ctx.tenant_id, "tenant assigned from context");
                self.audit(
                    AuditEvent::allowed(AuditOperation::Create, resource_type, "tenant assigned from context")
                        .resource(record.resource_id(), Some(ctx.tenant_id))
                        .acting(Some(&ctx)),
                );
                Ok(())
            }
            Some(owner) if ctx.permits(&owner) => {
                self.audit(
                    AuditEvent::allowed(AuditOperation::Create, resource_type, "tenant matches context")
                        .resource(record.resource_id(), Some(owner))
                        .acting(Some(&ctx)),
                );
                Ok(())
            }
            Some(owner) => Err(self.cross_tenant(AuditOperation::Create, &*record, owner, &ctx)),
        }
    }

    /// Create on behalf of a background job.
    ///
    /// With a context installed this is [`Self::before_create`]. Without one, the
    /// record must already carry its tenant; nothing is inferred.
    pub fn before_system_create<R>(&self, record: &mut R) -> Result<(), TenancyError>
    where
        R: TenantScoped + ?Sized,
    {
        if tenant_context::has_context() {
            return self.before_create(record);
        }

        let resource_type = record.resource_type();
        match record.tenant_id() {
            Some(owner) => {
                self.audit(
                    AuditEvent::allowed(AuditOperation::Create, resource_type, "system operation with preset tenant")
                        .resource(record.resource_id(), Some(owner)),
                );
                Ok(())
            }
            None => {
                self.audit(
                    AuditEvent::denied(AuditOperation::Create, resource_type, "system operation without tenant")
                        .resource(record.resource_id(), None),
                );
                Err(TenancyError::MissingTenantContext)
            }
        }
    }

    /// `persisted_tenant` is the tenant column as currently stored, read inside
    /// the same transaction. `None` means the row has no owner and is denied.
    pub fn before_update<R>(&self, record: &R, persisted_tenant: Option<TenantId>) -> Result<(), TenancyError>
    where
        R: TenantScoped + ?Sized,
    {
        let resource_type = record.resource_type();
        let ctx = self.require_context(AuditOperation::Update, record)?;

        let Some(owner) = persisted_tenant else {
            return Err(self.unowned(AuditOperation::Update, record, &ctx));
        };

        if !ctx.permits(&owner) {
            return Err(self.cross_tenant(AuditOperation::Update, record, owner, &ctx));
        }

        if record.tenant_id() != Some(owner) {
            warn!(resource_type, resource_id = ?record.resource_id(), "attempt to change a persisted tenant id");
            self.audit(
                AuditEvent::denied(AuditOperation::Update, resource_type, "tenant id is immutable")
                    .high()
                    .resource(record.resource_id(), Some(owner))
                    .acting(Some(&ctx)),
            );
            return Err(TenancyError::TenantIdImmutable {
                resource_type: resource_type.to_string(),
                resource_id: record.resource_id(),
            });
        }

        self.audit(
            AuditEvent::allowed(AuditOperation::Update, resource_type, "owner matches context")
                .resource(record.resource_id(), Some(owner))
                .acting(Some(&ctx)),
        );
        Ok(())
    }

    pub fn before_delete<R>(&self, record: &R) -> Result<(), TenancyError>
    where
        R: TenantScoped + ?Sized,
    {
        let resource_type = record.resource_type();
        let ctx = self.require_context(AuditOperation::Delete, record)?;

        match record.tenant_id() {
            None => Err(self.unowned(AuditOperation::Delete, record, &ctx)),
            Some(owner) if ctx.permits(&owner) => {
                self.audit(
                    AuditEvent::allowed(AuditOperation::Delete, resource_type, "owner matches context")
                        .resource(record.resource_id(), Some(owner))
                        .acting(Some(&ctx)),
                );
                Ok(())
            }
            Some(owner) => Err(self.cross_tenant(AuditOperation::Delete, record, owner, &ctx)),
        }
    }

    /// Never fails. A mismatch is a storage-filtering defect: it is audited at high
    /// severity, counted, and reported through the verdict.
    pub fn after_load<R>(&self, record: &R) -> LoadVerdict
    where
        R: TenantScoped + ?Sized,
    {
        let resource_type = record.resource_type();
        let owner = record.tenant_id();

        let Some(ctx) = tenant_context::get() else {
            self.audit(
                AuditEvent::allowed(AuditOperation::Read, resource_type, "no tenant context; storage filtering only")
                    .resource(record.resource_id(), owner),
            );
            return LoadVerdict::Unscoped;
        };

        match owner {
            Some(owner) if ctx.permits(&owner) => {
                self.audit(
                    AuditEvent::allowed(AuditOperation::Read, resource_type, "owner matches context")
                        .resource(record.resource_id(), Some(owner))
                        .acting(Some(&ctx)),
                );
                LoadVerdict::Consistent
            }
            _ => {
                warn!(
                    resource_type,
                    resource_id = ?record.resource_id(),
                    "loaded a record outside the current tenant"
                );
                metrics::counter!("tenancy_post_load_mismatch_total", "resource_type" => resource_type).increment(1);
                self.audit(
                    AuditEvent::denied(AuditOperation::Read, resource_type, "post-load tenant mismatch")
                        .high()
                        .resource(record.resource_id(), owner)
                        .acting(Some(&ctx)),
                );
                LoadVerdict::Mismatch
            }
        }
    }

    fn require_context<R>(&self, operation: AuditOperation, record: &R) -> Result<TenantContext, TenancyError>
    where
        R: TenantScoped + ?Sized,
    {
        tenant_context::get().ok_or_else(|| {
            self.audit(
                AuditEvent::denied(operation, record.resource_type(), "no tenant context")
                    .resource(record.resource_id(), record.tenant_id()),
            );
            TenancyError::MissingTenantContext
        })
    }

    fn cross_tenant<R>(&self, operation: AuditOperation, record: &R, owner: TenantId, ctx: &TenantContext) -> TenancyError
    where
        R: TenantScoped + ?Sized,
    {
        warn!(
            operation = operation.as_str(),
            resource_type = record.resource_type(),
            resource_id = ?record.resource_id(),
            "cross-tenant access denied"
        );
        self.audit(
            AuditEvent::denied(operation, record.resource_type(), "owner does not match context")
                .high()
                .resource(record.resource_id(), Some(owner))
                .acting(Some(ctx)),
        );
        TenancyError::cross_tenant(record.resource_type(), record.resource_id())
    }

    fn unowned<R>(&self, operation: AuditOperation, record: &R, ctx: &TenantContext) -> TenancyError
    where
        R: TenantScoped + ?Sized,
    {
        self.audit(
            AuditEvent::denied(operation, record.resource_type(), "persisted record has no tenant")
                .high()
                .resource(record.resource_id(), None)
                .acting(Some(ctx)),
        );
        TenancyError::cross_tenant(record.resource_type(), record.resource_id())
    }

    fn audit(&self, event: AuditEvent) {
        record_decision(self.audit.as_ref(), event);
    }
}
