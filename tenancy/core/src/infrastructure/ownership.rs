// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory ownership index keyed by `(resource_type, id)`.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::directory::OwnershipLookup;
use crate::domain::repository::RepositoryError;
use crate::domain::tenant::TenantId;

#[derive(Default)]
pub struct InMemoryOwnershipLookup {
    owners: DashMap<(String, String), TenantId>,
}

impl InMemoryOwnershipLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource_type: &str, id: &str, tenant_id: TenantId) {
        self.owners.insert((resource_type.to_string(), id.to_string()), tenant_id);
    }

    pub fn remove(&self, resource_type: &str, id: &str) {
        self.owners.remove(&(resource_type.to_string(), id.to_string()));
    }
}

#[async_trait]
impl OwnershipLookup for InMemoryOwnershipLookup {
    async fn owner_of(&self, resource_type: &str, id: &str) -> Result<Option<TenantId>, RepositoryError> {
        Ok(self
            .owners
            .get(&(resource_type.to_string(), id.to_string()))
            .map(|owner| *owner))
    }
}
