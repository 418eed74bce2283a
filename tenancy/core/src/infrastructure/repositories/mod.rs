// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! PostgreSQL adapters for the collaborator ports defined in the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Tenant status, ownership and audit persistence
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **PostgresTenantDirectory** - `tenants` and `tenant_subjects` tables
//! - **PostgresOwnershipLookup** - `tenant_id` column of allow-listed entity tables
//! - **PostgresAuditEventRepository** - append-only `tenant_audit_events` table
//! - **TenantTransaction** - transaction with `app.current_tenant` set for
//!   row-level security policies
//!
//! In-memory counterparts live in [`crate::infrastructure::tenant_directory`] and
//! [`crate::infrastructure::ownership`].
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo(database_url: &str) -> anyhow::Result<()> {
//! use caretaker_tenancy::infrastructure::db::Database;
//! use caretaker_tenancy::infrastructure::repositories::PostgresTenantDirectory;
//!
//! let db = Database::new(database_url, 5).await?;
//! let directory = PostgresTenantDirectory::new(db.get_pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod postgres_audit;
pub mod postgres_directory;
pub mod postgres_ownership;
pub mod tenant_transaction;

pub use postgres_audit::PostgresAuditEventRepository;
pub use postgres_directory::PostgresTenantDirectory;
pub use postgres_ownership::PostgresOwnershipLookup;
pub use tenant_transaction::TenantTransaction;

use serde::de::DeserializeOwned;

use crate::domain::repository::RepositoryError;

/// Decode a text column holding a serde-named enum variant.
pub(crate) fn decode_label<T: DeserializeOwned>(column: &str, value: String) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(value))
        .map_err(|e| RepositoryError::Serialization(format!("Invalid {}: {}", column, e)))
}
