// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts consumed by the isolation layer. Interfaces live in the
//! domain layer; implementations in `crate::infrastructure::repositories`.
//!
//! | Trait | Purpose | Implementations |
//! |-------|---------|----------------|
//! | [`crate::domain::directory::TenantDirectory`] | tenant status, subject lookup | `InMemoryTenantDirectory`, `PostgresTenantDirectory` |
//! | [`crate::domain::directory::OwnershipLookup`] | owner of an entity id | `InMemoryOwnershipLookup`, `PostgresOwnershipLookup` |
//! | [`AuditEventRepository`] | durable audit trail | `PostgresAuditEventRepository` |
//!
//! The Postgres implementations are wired by the daemon when `spec.database` is
//! configured; otherwise the in-memory ones serve.

use async_trait::async_trait;

use crate::domain::audit::AuditEvent;
use crate::domain::tenant::TenantId;

/// Append-only persistence for isolation decisions.
#[async_trait]
pub trait AuditEventRepository: Send + Sync {
    /// Append an event. Existing rows are never updated.
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError>;

    /// Most recent denials, optionally restricted to one acting tenant.
    async fn find_denied(&self, acting_tenant: Option<TenantId>, limit: usize) -> Result<Vec<AuditEvent>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported resource type: {0}")]
    UnsupportedResource(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
