// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tenant-scoped persisted records.
//!
//! Entities stay plain data holders: they expose their tenant column and nothing
//! else. They never call the tenant directory or any other tenancy service; the
//! guards in [`crate::application`] do that on their behalf.

use super::tenant::TenantId;

/// A persisted entity that carries a `tenant_id` column.
///
/// Once persisted, `tenant_id` is non-null and immutable.
pub trait TenantScoped {
    /// Logical resource type used in audit records (`"work_order"`, `"asset"`, ...).
    fn resource_type(&self) -> &'static str;

    /// Primary key rendered as a string, if the record has one yet.
    fn resource_id(&self) -> Option<String>;

    fn tenant_id(&self) -> Option<TenantId>;

    fn set_tenant_id(&mut self, tenant_id: TenantId);
}
