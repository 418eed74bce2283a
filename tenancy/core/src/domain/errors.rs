// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tenancy Error Taxonomy
//!
//! Every operation-blocking error aborts the guarded operation immediately; the
//! layer never auto-corrects a mismatched tenant.
//!
//! `Display` output is deliberately generic. Tenant identifiers and the detailed
//! reason for a denial are written to the audit trail only, so error strings can
//! be returned to clients without enabling tenant enumeration. Resource ids (never
//! tenant ids) are kept as fields for callers that need to know *which* argument
//! failed.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenancyError {
    /// No tenant context where one is required. Re-authenticate; not retryable as-is.
    #[error("access denied: no tenant context")]
    MissingTenantContext,

    /// Ownership mismatch between the acting tenant and the resource.
    #[error("access denied")]
    CrossTenantAccessDenied {
        resource_type: String,
        resource_id: Option<String>,
    },

    /// An update tried to change the tenant id of a persisted record.
    #[error("access denied")]
    TenantIdImmutable {
        resource_type: String,
        resource_id: Option<String>,
    },

    /// Write or delete against a tenant that is not currently active.
    #[error("access denied: tenant cannot write")]
    InactiveTenantWriteDenied,

    /// Context storage was touched outside any unit-of-work scope.
    #[error("access denied: no unit of work")]
    NoUnitOfWork,

    /// Ingress or connect for a tenant that is not currently active.
    #[error("access denied: tenant is not active")]
    InactiveTenant,

    /// A pub/sub message addressed a destination outside the connection's scope.
    /// Rejects the single message only.
    #[error("access denied: destination")]
    DestinationAccessDenied { destination: String },

    /// A message arrived for a connection that never completed `on_connect`.
    #[error("access denied: unknown connection")]
    UnknownConnection,

    /// An access rule selected an argument that is absent or of the wrong shape.
    #[error("access rule misconfigured: {0}")]
    InvalidAccessRule(String),

    /// A collaborator (directory, ownership lookup) could not answer. Fails closed.
    #[error("access denied: tenant directory unavailable")]
    DirectoryUnavailable,
}

impl TenancyError {
    /// Security violations are never retryable and never user-correctable.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Self::CrossTenantAccessDenied { .. }
                | Self::TenantIdImmutable { .. }
                | Self::DestinationAccessDenied { .. }
        )
    }

    /// The only text a client should ever see for this error.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::MissingTenantContext | Self::UnknownConnection => "authentication required",
            Self::NoUnitOfWork | Self::InvalidAccessRule(_) | Self::DirectoryUnavailable => {
                "service unavailable"
            }
            _ => "access denied",
        }
    }

    /// Stable machine-readable kind for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingTenantContext => "missing_tenant_context",
            Self::CrossTenantAccessDenied { .. } => "cross_tenant_access_denied",
            Self::TenantIdImmutable { .. } => "tenant_id_immutable",
            Self::InactiveTenantWriteDenied => "inactive_tenant_write_denied",
            Self::NoUnitOfWork => "no_unit_of_work",
            Self::InactiveTenant => "inactive_tenant",
            Self::DestinationAccessDenied { .. } => "destination_access_denied",
            Self::UnknownConnection => "unknown_connection",
            Self::InvalidAccessRule(_) => "invalid_access_rule",
            Self::DirectoryUnavailable => "directory_unavailable",
        }
    }

    pub(crate) fn cross_tenant(resource_type: &str, resource_id: Option<String>) -> Self {
        Self::CrossTenantAccessDenied {
            resource_type: resource_type.to_string(),
            resource_id,
        }
    }
}
