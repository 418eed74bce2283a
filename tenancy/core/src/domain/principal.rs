// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Authenticated Principal
//!
//! The identity collaborator hands this layer an **already verified** principal.
//! Nothing here checks signatures; the only trusted source of tenant affiliation is
//! the `tenant_id` claim carried by this value (or a directory lookup keyed by
//! `subject`). Client headers and query parameters never reach it.

use serde::{Deserialize, Serialize};

use super::tenant::TenantId;

/// What kind of account a principal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    /// An end user belonging to exactly one tenant.
    Human,
    /// A backend service account. Treated as privileged.
    Service,
    /// The platform itself (schedulers, migrations, administrators).
    System,
}

/// A verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable subject (username, service name)
    pub subject: String,

    /// Tenant claim, if the identity provider issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,

    pub kind: PrincipalKind,
}

impl Principal {
    pub fn human(subject: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            subject: subject.into(),
            tenant_id: Some(tenant_id),
            kind: PrincipalKind::Human,
        }
    }

    /// A human principal without a tenant claim; the tenant is resolved through
    /// the directory.
    pub fn unaffiliated(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            tenant_id: None,
            kind: PrincipalKind::Human,
        }
    }

    pub fn service(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            tenant_id: None,
            kind: PrincipalKind::Service,
        }
    }

    pub fn system(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            tenant_id: None,
            kind: PrincipalKind::System,
        }
    }

    /// Only principals explicitly flagged system or service may act as the system tenant.
    pub fn is_privileged(&self) -> bool {
        matches!(self.kind, PrincipalKind::System | PrincipalKind::Service)
    }
}
