// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Context Propagation Filter
//!
//! Ingress component that turns an authenticated [`Principal`] into the
//! [`TenantContext`] of one unit of work and tears it down afterwards.
//!
//! Resolution order:
//!
//! 1. System or service principal: system-tenant marker.
//! 2. `tenant_id` claim on the principal.
//! 3. Tenant directory lookup keyed by `subject`.
//!
//! Client-supplied headers and parameters never take part. A non-privileged
//! principal claiming the system tenant is treated as a forgery attempt.
//! The resolved tenant must be active before anything runs on its behalf.
//!
//! Every resolution emits exactly one audit event.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::domain::audit::{record_decision, AuditEvent, AuditOperation, AuditSink};
use crate::domain::directory::TenantDirectory;
use crate::domain::errors::TenancyError;
use crate::domain::principal::Principal;
use crate::domain::tenant::{TenantId, TenantStatus};
use crate::domain::tenant_context::{self, TenantContext};

/// Whether an endpoint can run without a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantRequirement {
    Required,
    /// Runs without a context when none resolves (health checks, public pages).
    Optional,
}

/// Outcome of one resolution together with the audit event describing it.
pub(crate) struct Resolution {
    pub(crate) result: Result<Option<TenantContext>, TenancyError>,
    pub(crate) event: AuditEvent,
}

pub struct ContextPropagationFilter {
    directory: Arc<dyn TenantDirectory>,
    audit: Arc<dyn AuditSink>,
    system_tenant_id: TenantId,
}

impl ContextPropagationFilter {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        audit: Arc<dyn AuditSink>,
        system_tenant_id: TenantId,
    ) -> Self {
        Self {
            directory,
            audit,
            system_tenant_id,
        }
    }

    pub fn system_tenant_id(&self) -> TenantId {
        self.system_tenant_id
    }

    /// Resolve the context a request from `principal` runs under.
    ///
    /// `Ok(None)` only for [`TenantRequirement::Optional`] when nothing resolves.
    pub async fn resolve(
        &self,
        principal: Option<&Principal>,
        requirement: TenantRequirement,
    ) -> Result<Option<TenantContext>, TenancyError> {
        let decision = self.decide(principal, requirement, AuditOperation::Request).await;
        self.audit(decision.event);
        decision.result
    }

    /// Resolution without auditing. The caller records `event` exactly once.
    ///
    /// The message channel guard uses this to emit a single `CONNECT` event after
    /// it knows whether the binding can be stored.
    pub(crate) async fn decide(
        &self,
        principal: Option<&Principal>,
        requirement: TenantRequirement,
        operation: AuditOperation,
    ) -> Resolution {
        let Some(principal) = principal else {
            return Self::unresolved(operation, requirement, "unauthenticated");
        };

        if principal.is_privileged() {
            debug!(subject = %principal.subject, kind = ?principal.kind, "privileged principal; installing system tenant");
            return Resolution {
                result: Ok(Some(TenantContext::system(self.system_tenant_id))),
                event: AuditEvent::allowed(operation, "tenant", "privileged principal")
                    .acting_tenant(Some(self.system_tenant_id)),
            };
        }

        let tenant_id = match principal.tenant_id {
            Some(tenant_id) => Some(tenant_id),
            None => match self.directory.tenant_for_subject(&principal.subject).await {
                Ok(found) => found,
                Err(e) => {
                    error!(error = %e, subject = %principal.subject, "tenant directory lookup failed");
                    return Resolution {
                        result: Err(TenancyError::DirectoryUnavailable),
                        event: AuditEvent::denied(operation, "tenant", "tenant directory unavailable"),
                    };
                }
            },
        };

        let Some(tenant_id) = tenant_id else {
            return Self::unresolved(operation, requirement, "principal has no tenant affiliation");
        };

        if tenant_id == self.system_tenant_id {
            warn!(subject = %principal.subject, "non-privileged principal claimed the system tenant");
            return Resolution {
                result: Err(TenancyError::cross_tenant("tenant", None)),
                event: AuditEvent::denied(operation, "tenant", "forged system tenant claim")
                    .high()
                    .resource(None, Some(tenant_id)),
            };
        }

        match self.directory.status(tenant_id).await {
            Ok(Some(TenantStatus::Active)) => Resolution {
                result: Ok(Some(TenantContext::tenant(tenant_id))),
                event: AuditEvent::allowed(operation, "tenant", "tenant resolved from principal")
                    .acting_tenant(Some(tenant_id)),
            },
            Ok(status) => {
                debug!(tenant_id = %tenant_id, ?status, "tenant is not active");
                Resolution {
                    result: Err(TenancyError::InactiveTenant),
                    event: AuditEvent::denied(operation, "tenant", "tenant is not active")
                        .acting_tenant(Some(tenant_id)),
                }
            }
            Err(e) => {
                error!(error = %e, tenant_id = %tenant_id, "tenant status lookup failed");
                Resolution {
                    result: Err(TenancyError::DirectoryUnavailable),
                    event: AuditEvent::denied(operation, "tenant", "tenant directory unavailable")
                        .acting_tenant(Some(tenant_id)),
                }
            }
        }
    }

    /// Run `future` as one unit of work for `principal`.
    ///
    /// Nothing in `future` runs when resolution fails. The context is torn down
    /// when the future completes, fails or is dropped.
    pub async fn run<F>(
        &self,
        principal: Option<&Principal>,
        requirement: TenantRequirement,
        future: F,
    ) -> Result<F::Output, TenancyError>
    where
        F: Future,
    {
        let context = self.resolve(principal, requirement).await?;
        Ok(tenant_context::scope(context, future).await)
    }

    fn unresolved(operation: AuditOperation, requirement: TenantRequirement, reason: &'static str) -> Resolution {
        match requirement {
            TenantRequirement::Required => Resolution {
                result: Err(TenancyError::MissingTenantContext),
                event: AuditEvent::denied(operation, "tenant", reason),
            },
            TenantRequirement::Optional => Resolution {
                result: Ok(None),
                event: AuditEvent::allowed(operation, "tenant", reason),
            },
        }
    }

    fn audit(&self, event: AuditEvent) {
        record_decision(self.audit.as_ref(), event);
    }
}
