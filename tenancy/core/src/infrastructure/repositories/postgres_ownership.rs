// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL ownership lookup.
//!
//! Resource types map to entity tables through an explicit allow-list fixed at
//! construction. Table names are interpolated into SQL, so only plain lowercase
//! identifiers are accepted; ids are always bound.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::directory::OwnershipLookup;
use crate::domain::repository::RepositoryError;
use crate::domain::tenant::TenantId;

pub struct PostgresOwnershipLookup {
    pool: PgPool,
    queries: HashMap<String, String>,
}

impl PostgresOwnershipLookup {
    /// `tables` maps a resource type (`"work_order"`) to its table (`"work_orders"`).
    pub fn new<'a>(pool: PgPool, tables: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, RepositoryError> {
        let mut queries = HashMap::new();
        for (resource_type, table) in tables {
            validate_table_name(table)?;
            queries.insert(
                resource_type.to_string(),
                format!("SELECT tenant_id FROM {} WHERE id::text = $1", table),
            );
        }
        Ok(Self { pool, queries })
    }

    pub fn supports(&self, resource_type: &str) -> bool {
        self.queries.contains_key(resource_type)
    }
}

fn validate_table_name(table: &str) -> Result<(), RepositoryError> {
    let mut chars = table.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::UnsupportedResource(format!("invalid table name '{}'", table)))
    }
}

#[async_trait]
impl OwnershipLookup for PostgresOwnershipLookup {
    async fn owner_of(&self, resource_type: &str, id: &str) -> Result<Option<TenantId>, RepositoryError> {
        let query = self
            .queries
            .get(resource_type)
            .ok_or_else(|| RepositoryError::UnsupportedResource(resource_type.to_string()))?;

        let row = sqlx::query(query).bind(id).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => {
                let owner: Option<Uuid> = row
                    .try_get("tenant_id")
                    .map_err(|e| RepositoryError::Database(format!("Missing tenant_id: {}", e)))?;
                Ok(owner.map(TenantId))
            }
            None => Ok(None),
        }
    }
}
