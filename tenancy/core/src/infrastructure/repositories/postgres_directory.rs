// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of the tenant directory.
//!
//! ```sql
//! CREATE TABLE tenants (
//!     id     UUID PRIMARY KEY,
//!     name   TEXT NOT NULL,
//!     status TEXT NOT NULL -- active | suspended | inactive
//! );
//! CREATE TABLE tenant_subjects (
//!     subject   TEXT PRIMARY KEY,
//!     tenant_id UUID NOT NULL REFERENCES tenants(id)
//! );
//! ```

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::decode_label;
use crate::domain::directory::TenantDirectory;
use crate::domain::repository::RepositoryError;
use crate::domain::tenant::{TenantId, TenantStatus};

pub struct PostgresTenantDirectory {
    pool: PgPool,
}

impl PostgresTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PostgresTenantDirectory {
    async fn status(&self, tenant_id: TenantId) -> Result<Option<TenantStatus>, RepositoryError> {
        let row = sqlx::query("SELECT status FROM tenants WHERE id = $1")
            .bind(tenant_id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let status: String = row
                    .try_get("status")
                    .map_err(|e| RepositoryError::Database(format!("Missing status: {}", e)))?;
                decode_label("status", status).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn tenant_for_subject(&self, subject: &str) -> Result<Option<TenantId>, RepositoryError> {
        let row = sqlx::query("SELECT tenant_id FROM tenant_subjects WHERE subject = $1")
            .bind(subject)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            row.try_get::<Uuid, _>("tenant_id")
                .map(TenantId)
                .map_err(|e| RepositoryError::Database(format!("Missing tenant_id: {}", e)))
        })
        .transpose()
    }
}
