// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Database transaction bound to the acting tenant.
//!
//! `set_config(.., true)` is transaction-local, so the setting disappears on
//! commit or rollback and can never leak to the next user of a pooled
//! connection. Row-level security policies read it with
//! `current_setting('app.current_tenant')`.

use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::domain::repository::RepositoryError;
use crate::domain::tenant_context::{self, TenantContext};

pub const CURRENT_TENANT_SETTING: &str = "app.current_tenant";
pub const SYSTEM_TENANT_SETTING: &str = "app.is_system_tenant";

pub struct TenantTransaction {
    tx: Transaction<'static, Postgres>,
    context: TenantContext,
}

impl TenantTransaction {
    pub async fn begin(pool: &PgPool, context: &TenantContext) -> Result<Self, RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT set_config($1, $2, true), set_config($3, $4, true)")
            .bind(CURRENT_TENANT_SETTING)
            .bind(context.tenant_id.to_string())
            .bind(SYSTEM_TENANT_SETTING)
            .bind(if context.is_system_tenant { "true" } else { "false" })
            .execute(&mut *tx)
            .await?;

        Ok(Self {
            tx,
            context: context.clone(),
        })
    }

    /// Begin with the current unit of work's context.
    pub async fn begin_current(pool: &PgPool) -> Result<Self, RepositoryError> {
        let context = tenant_context::get()
            .ok_or_else(|| RepositoryError::Database("no tenant context for transaction".to_string()))?;
        Self::begin(pool, &context).await
    }

    pub fn context(&self) -> &TenantContext {
        &self.context
    }

    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), RepositoryError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
