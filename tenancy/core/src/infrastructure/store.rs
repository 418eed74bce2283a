// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory tenant-scoped persistence adapter.
//!
//! Each write takes the store's write lock, runs the lifecycle guard, and only
//! then mutates the map. A rejected check therefore leaves the store exactly as
//! it was, which is the in-memory analogue of aborting the transaction.
//!
//! Reads are by primary key with no storage-level filtering; the post-load check
//! hides anything that is not owned by the current tenant.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::entity_guard::{EntityLifecycleGuard, LoadVerdict};
use crate::domain::errors::TenancyError;
use crate::domain::record::TenantScoped;
use crate::domain::tenant_context;
use crate::infrastructure::ownership::InMemoryOwnershipLookup;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error("record has no id")]
    MissingId,

    #[error("record {0} already exists")]
    Duplicate(String),

    #[error("record {0} not found")]
    NotFound(String),
}

pub struct TenantScopedStore<T> {
    guard: Arc<EntityLifecycleGuard>,
    ownership: Option<Arc<InMemoryOwnershipLookup>>,
    records: RwLock<HashMap<String, T>>,
}

impl<T> TenantScopedStore<T>
where
    T: TenantScoped + Clone,
{
    pub fn new(guard: Arc<EntityLifecycleGuard>) -> Self {
        Self {
            guard,
            ownership: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Keep `ownership` in sync so id-list checks can see this store's records.
    pub fn with_ownership(mut self, ownership: Arc<InMemoryOwnershipLookup>) -> Self {
        self.ownership = Some(ownership);
        self
    }

    pub fn insert(&self, mut record: T) -> Result<T, StoreError> {
        let id = record.resource_id().ok_or(StoreError::MissingId)?;
        let mut records = self.records.write();
        if records.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }

        self.guard.before_create(&mut record)?;

        if let (Some(ownership), Some(owner)) = (&self.ownership, record.tenant_id()) {
            ownership.insert(record.resource_type(), &id, owner);
        }
        records.insert(id, record.clone());
        Ok(record)
    }

    /// Insert on behalf of a background job running without a context.
    pub fn insert_as_system(&self, mut record: T) -> Result<T, StoreError> {
        let id = record.resource_id().ok_or(StoreError::MissingId)?;
        let mut records = self.records.write();
        if records.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }

        self.guard.before_system_create(&mut record)?;

        if let (Some(ownership), Some(owner)) = (&self.ownership, record.tenant_id()) {
            ownership.insert(record.resource_type(), &id, owner);
        }
        records.insert(id, record.clone());
        Ok(record)
    }

    pub fn update(&self, record: T) -> Result<(), StoreError> {
        let id = record.resource_id().ok_or(StoreError::MissingId)?;
        let mut records = self.records.write();
        let persisted_tenant = records
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?
            .tenant_id();

        self.guard.before_update(&record, persisted_tenant)?;

        records.insert(id, record);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<T, StoreError> {
        let mut records = self.records.write();
        let record = records.get(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        self.guard.before_delete(record)?;

        if let Some(ownership) = &self.ownership {
            ownership.remove(record.resource_type(), id);
        }
        records.remove(id).ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// `None` when absent or when the post-load check does not confirm ownership.
    pub fn get(&self, id: &str) -> Option<T> {
        let records = self.records.read();
        let record = records.get(id)?;
        match self.guard.after_load(record) {
            LoadVerdict::Consistent => Some(record.clone()),
            LoadVerdict::Unscoped | LoadVerdict::Mismatch => None,
        }
    }

    /// Records visible to the current context. Empty without a context.
    pub fn list(&self) -> Vec<T> {
        let Some(ctx) = tenant_context::get() else {
            return Vec::new();
        };
        self.records
            .read()
            .values()
            .filter(|record| record.tenant_id().is_some_and(|owner| ctx.permits(&owner)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
