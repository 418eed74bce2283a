// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Read-only collaborators injected into the guards.
//!
//! The guards never reach back into entities or into a global service locator;
//! everything they need to know about tenants and ownership arrives through these
//! two traits at construction time.

use async_trait::async_trait;

use super::repository::RepositoryError;
use super::tenant::{TenantId, TenantStatus};

/// Tenant-directory collaborator.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Current status, or `None` for an unknown tenant.
    async fn status(&self, tenant_id: TenantId) -> Result<Option<TenantStatus>, RepositoryError>;

    /// Tenant affiliation of a principal that carried no tenant claim.
    async fn tenant_for_subject(&self, subject: &str) -> Result<Option<TenantId>, RepositoryError>;

    /// Unknown tenants are not active.
    async fn is_active(&self, tenant_id: TenantId) -> Result<bool, RepositoryError> {
        Ok(self.status(tenant_id).await?.is_some_and(|s| s.is_active()))
    }
}

/// Persistence collaborator answering "who owns this entity id".
#[async_trait]
pub trait OwnershipLookup: Send + Sync {
    /// Owning tenant of `id`, or `None` if no such record exists.
    async fn owner_of(&self, resource_type: &str, id: &str) -> Result<Option<TenantId>, RepositoryError>;

    /// Existence check within one tenant's scope.
    async fn exists_within_tenant(&self, resource_type: &str, id: &str, tenant_id: TenantId) -> Result<bool, RepositoryError> {
        Ok(self.owner_of(resource_type, id).await? == Some(tenant_id))
    }
}
