// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use uuid::Uuid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Value Objects
// ============================================================================

/// Unique identifier for a tenant (one customer organization).
///
/// Opaque outside this crate: callers compare and display it, nothing more.
/// Which id is the privileged system tenant is configuration, see
/// [`crate::domain::tenancy_config::TenancyConfigSpec::system_tenant_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Create a new random tenant ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse tenant ID from string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

/// Lifecycle status of a tenant as reported by the tenant directory.
///
/// ```text
/// Active ⇄ Suspended
/// Active → Inactive   (terminal)
/// ```
///
/// The isolation layer only consumes [`TenantStatus::is_active`]; transitions are
/// owned by whoever administers the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Inactive,
}

impl TenantStatus {
    /// Reads are tolerated for any status; writes, deletes and new sessions
    /// require `Active`.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Validate a status transition against the tenant state machine.
    pub fn transition_to(self, next: TenantStatus) -> Result<TenantStatus, TenantStatusError> {
        match (self, next) {
            (Self::Active, Self::Suspended)
            | (Self::Suspended, Self::Active)
            | (Self::Active, Self::Inactive) => Ok(next),
            (from, to) => Err(TenantStatusError::InvalidTransition { from, to }),
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantStatusError {
    #[error("invalid tenant status transition: {from} -> {to}")]
    InvalidTransition { from: TenantStatus, to: TenantStatus },
}
