// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of AuditEventRepository
//!
//! Durable, append-only trail of isolation decisions. Fed by the audit
//! dispatcher through `RepositoryAuditWriter`, never from inside a guard.
//!
//! ```sql
//! CREATE TABLE tenant_audit_events (
//!     event_id           UUID PRIMARY KEY,
//!     occurred_at        TIMESTAMPTZ NOT NULL,
//!     operation          TEXT NOT NULL,
//!     resource_type      TEXT NOT NULL,
//!     resource_id        TEXT,
//!     resource_tenant_id UUID,
//!     acting_tenant_id   UUID,
//!     outcome            TEXT NOT NULL,
//!     severity           TEXT NOT NULL,
//!     reason             TEXT NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::decode_label;
use crate::domain::audit::AuditEvent;
use crate::domain::repository::{AuditEventRepository, RepositoryError};
use crate::domain::tenant::TenantId;

pub struct PostgresAuditEventRepository {
    pool: PgPool,
}

impl PostgresAuditEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn deserialize_row(row: &sqlx::postgres::PgRow) -> Result<AuditEvent, RepositoryError> {
        let column = |name: &str, e: sqlx::Error| RepositoryError::Database(format!("Missing {}: {}", name, e));

        let event_id: Uuid = row.try_get("event_id").map_err(|e| column("event_id", e))?;
        let timestamp: DateTime<Utc> = row.try_get("occurred_at").map_err(|e| column("occurred_at", e))?;
        let operation: String = row.try_get("operation").map_err(|e| column("operation", e))?;
        let resource_type: String = row.try_get("resource_type").map_err(|e| column("resource_type", e))?;
        let resource_id: Option<String> = row.try_get("resource_id").map_err(|e| column("resource_id", e))?;
        let resource_tenant_id: Option<Uuid> = row
            .try_get("resource_tenant_id")
            .map_err(|e| column("resource_tenant_id", e))?;
        let acting_tenant_id: Option<Uuid> = row
            .try_get("acting_tenant_id")
            .map_err(|e| column("acting_tenant_id", e))?;
        let outcome: String = row.try_get("outcome").map_err(|e| column("outcome", e))?;
        let severity: String = row.try_get("severity").map_err(|e| column("severity", e))?;
        let reason: String = row.try_get("reason").map_err(|e| column("reason", e))?;

        Ok(AuditEvent {
            event_id,
            timestamp,
            operation: decode_label("operation", operation)?,
            resource_type,
            resource_id,
            resource_tenant_id: resource_tenant_id.map(TenantId),
            acting_tenant_id: acting_tenant_id.map(TenantId),
            outcome: decode_label("outcome", outcome)?,
            severity: decode_label("severity", severity)?,
            reason,
        })
    }
}

#[async_trait]
impl AuditEventRepository for PostgresAuditEventRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO tenant_audit_events (
                event_id, occurred_at, operation, resource_type, resource_id,
                resource_tenant_id, acting_tenant_id, outcome, severity, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(event.timestamp)
        .bind(event.operation.as_str())
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(event.resource_tenant_id.map(|t| t.0))
        .bind(event.acting_tenant_id.map(|t| t.0))
        .bind(event.outcome.as_str())
        .bind(event.severity.as_str())
        .bind(&event.reason)
        .execute(&self.pool)
        .await?;

        debug!(event_id = %event.event_id, "Persisted audit event");
        Ok(())
    }

    async fn find_denied(&self, acting_tenant: Option<TenantId>, limit: usize) -> Result<Vec<AuditEvent>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT event_id, occurred_at, operation, resource_type, resource_id,
                   resource_tenant_id, acting_tenant_id, outcome, severity, reason
            FROM tenant_audit_events
            WHERE outcome = 'DENIED'
              AND ($1::uuid IS NULL OR acting_tenant_id = $1)
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(acting_tenant.map(|t| t.0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::deserialize_row).collect()
    }
}
