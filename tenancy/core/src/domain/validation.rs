// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Declarative Access Rules
//!
//! Value objects describing *what* the
//! [`crate::application::access_validator::DeclarativeAccessValidator`] checks
//! before a service method runs.
//!
//! A rule names a [`ValidationMode`] and a **selector**: the name of the argument in
//! the [`Invocation`] that carries the tenant id, entity or id list to check. Service
//! code builds the invocation explicitly; no reflection is involved.
//!
//! ```text
//! AccessRule::write_gate("order")
//!   └─ Invocation::new("work_orders.update").entity("order", &order)
//!         └─ validator.guard(&rule, &invocation, async { repo.save(order).await })
//! ```

use serde::{Deserialize, Serialize};

use super::record::TenantScoped;
use super::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationMode {
    /// A tenant context must be present.
    RequireContext,
    /// The selected entity must belong to the current tenant.
    EntityOwnership,
    /// The selected tenant id must equal the current tenant.
    ExplicitTenantId,
    /// Every id in the selected list must exist and belong to the current tenant.
    IdListOwnership,
    /// Ownership plus an active tenant.
    WriteGate,
    /// Ownership plus an active tenant.
    DeleteGate,
}

impl ValidationMode {
    pub fn needs_selector(&self) -> bool {
        !matches!(self, Self::RequireContext)
    }

    pub fn requires_active_tenant(&self) -> bool {
        matches!(self, Self::WriteGate | Self::DeleteGate)
    }
}

/// How one service method is guarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub mode: ValidationMode,
    /// Argument name inspected by the rule. Ignored by `RequireContext`.
    pub selector: Option<String>,
    /// `false` logs and proceeds. Only for soft-launch observation.
    pub throw_on_failure: bool,
}

impl AccessRule {
    pub fn new(mode: ValidationMode, selector: Option<&str>) -> Self {
        Self {
            mode,
            selector: selector.map(str::to_string),
            throw_on_failure: true,
        }
    }

    pub fn require_context() -> Self {
        Self::new(ValidationMode::RequireContext, None)
    }

    pub fn entity_ownership(selector: &str) -> Self {
        Self::new(ValidationMode::EntityOwnership, Some(selector))
    }

    pub fn explicit_tenant_id(selector: &str) -> Self {
        Self::new(ValidationMode::ExplicitTenantId, Some(selector))
    }

    pub fn id_list_ownership(selector: &str) -> Self {
        Self::new(ValidationMode::IdListOwnership, Some(selector))
    }

    pub fn write_gate(selector: &str) -> Self {
        Self::new(ValidationMode::WriteGate, Some(selector))
    }

    pub fn delete_gate(selector: &str) -> Self {
        Self::new(ValidationMode::DeleteGate, Some(selector))
    }

    /// Log failures instead of rejecting the call.
    pub fn observe_only(mut self) -> Self {
        self.throw_on_failure = false;
        self
    }
}

/// One argument made visible to the validator.
#[derive(Clone, Copy)]
pub enum Argument<'a> {
    Entity(&'a (dyn TenantScoped + Sync)),
    TenantId(Option<TenantId>),
    Ids {
        resource_type: &'a str,
        ids: &'a [String],
    },
}

impl std::fmt::Debug for Argument<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity(entity) => f
                .debug_struct("Entity")
                .field("resource_type", &entity.resource_type())
                .field("resource_id", &entity.resource_id())
                .finish(),
            Self::TenantId(id) => f.debug_tuple("TenantId").field(id).finish(),
            Self::Ids { resource_type, ids } => f
                .debug_struct("Ids")
                .field("resource_type", resource_type)
                .field("count", &ids.len())
                .finish(),
        }
    }
}

/// The named arguments of one service call.
#[derive(Debug, Clone, Default)]
pub struct Invocation<'a> {
    pub operation: &'a str,
    /// Background job running without a tenant context.
    pub system_operation: bool,
    arguments: Vec<(&'a str, Argument<'a>)>,
}

impl<'a> Invocation<'a> {
    pub fn new(operation: &'a str) -> Self {
        Self {
            operation,
            system_operation: false,
            arguments: Vec::new(),
        }
    }

    pub fn entity(mut self, name: &'a str, entity: &'a (dyn TenantScoped + Sync)) -> Self {
        self.arguments.push((name, Argument::Entity(entity)));
        self
    }

    pub fn tenant_id(mut self, name: &'a str, tenant_id: Option<TenantId>) -> Self {
        self.arguments.push((name, Argument::TenantId(tenant_id)));
        self
    }

    pub fn ids(mut self, name: &'a str, resource_type: &'a str, ids: &'a [String]) -> Self {
        self.arguments.push((name, Argument::Ids { resource_type, ids }));
        self
    }

    pub fn as_system_operation(mut self) -> Self {
        self.system_operation = true;
        self
    }

    pub fn argument(&self, name: &str) -> Option<Argument<'a>> {
        self.arguments
            .iter()
            .find(|(arg_name, _)| *arg_name == name)
            .map(|(_, arg)| *arg)
    }
}
