// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory tenant directory
//!
//! Seeded from `spec.tenants` in the configuration manifest, or populated by tests.
//! Status changes go through the tenant state machine.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::directory::TenantDirectory;
use crate::domain::repository::RepositoryError;
use crate::domain::tenancy_config::TenantSeed;
use crate::domain::tenant::{TenantId, TenantStatus, TenantStatusError};

#[derive(Debug, Clone)]
pub struct TenantEntry {
    pub name: String,
    pub status: TenantStatus,
}

#[derive(Default)]
pub struct InMemoryTenantDirectory {
    tenants: DashMap<TenantId, TenantEntry>,
    subjects: DashMap<String, TenantId>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[TenantSeed]) -> Self {
        let directory = Self::new();
        for seed in seeds {
            directory.insert(seed.id, &seed.name, seed.status);
            for subject in &seed.subjects {
                directory.affiliate(subject, seed.id);
            }
        }
        directory
    }

    pub fn insert(&self, tenant_id: TenantId, name: &str, status: TenantStatus) {
        self.tenants.insert(
            tenant_id,
            TenantEntry {
                name: name.to_string(),
                status,
            },
        );
    }

    /// Record that `subject` belongs to `tenant_id`.
    pub fn affiliate(&self, subject: &str, tenant_id: TenantId) {
        self.subjects.insert(subject.to_string(), tenant_id);
    }

    /// Apply a status transition. Unknown tenants are reported as `NotFound`.
    pub fn set_status(&self, tenant_id: TenantId, next: TenantStatus) -> Result<TenantStatus, DirectoryUpdateError> {
        let mut entry = self
            .tenants
            .get_mut(&tenant_id)
            .ok_or(DirectoryUpdateError::NotFound(tenant_id))?;
        entry.status = entry.status.transition_to(next)?;
        Ok(entry.status)
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryUpdateError {
    #[error("unknown tenant {0}")]
    NotFound(TenantId),

    #[error(transparent)]
    Transition(#[from] TenantStatusError),
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn status(&self, tenant_id: TenantId) -> Result<Option<TenantStatus>, RepositoryError> {
        Ok(self.tenants.get(&tenant_id).map(|entry| entry.status))
    }

    async fn tenant_for_subject(&self, subject: &str) -> Result<Option<TenantId>, RepositoryError> {
        Ok(self.subjects.get(subject).map(|tenant| *tenant))
    }
}
