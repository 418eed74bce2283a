// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Ambient Tenant Context
//!
//! Holds the tenant of the **current unit of work** (one HTTP request, one
//! dispatched pub/sub message, one background job).
//!
//! ## Storage
//!
//! The slot is a `tokio::task_local!`. A unit of work owns one slot for exactly the
//! lifetime of its scope:
//!
//! | Entry point | Use |
//! |-------------|-----|
//! | [`scope`] | async work; dropping the future (cancel, timeout) ends the scope |
//! | [`sync_scope`] | sync work on pooled threads; restored on return and on unwind |
//!
//! There is no process-wide fallback slot. Outside a scope [`get`] returns `None`
//! and [`set`] fails with [`TenancyError::NoUnitOfWork`], so nothing written by
//! one unit of work can be observed by another one sharing the same worker thread.
//!
//! All operations are O(1) and never block.

use std::cell::RefCell;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TenancyError;
use super::tenant::TenantId;

tokio::task_local! {
    static UNIT_OF_WORK: RefCell<Option<TenantContext>>;
}

/// The acting tenant for one unit of work. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub is_system_tenant: bool,
    pub established_at: DateTime<Utc>,
}

impl TenantContext {
    /// Context for an ordinary tenant.
    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            is_system_tenant: false,
            established_at: Utc::now(),
        }
    }

    /// Context carrying the system-tenant marker. Only the ingress filter and
    /// channel guard construct this, and only for privileged principals.
    pub fn system(system_tenant_id: TenantId) -> Self {
        Self {
            tenant_id: system_tenant_id,
            is_system_tenant: true,
            established_at: Utc::now(),
        }
    }

    /// Whether this context may act on a resource owned by `owner`.
    pub fn permits(&self, owner: &TenantId) -> bool {
        self.is_system_tenant || self.tenant_id == *owner
    }
}

/// Run `future` as a unit of work with `initial` installed.
///
/// The slot is discarded when the future completes or is dropped.
pub async fn scope<F>(initial: Option<TenantContext>, future: F) -> F::Output
where
    F: Future,
{
    UNIT_OF_WORK.scope(RefCell::new(initial), future).await
}

/// Run `f` synchronously as a unit of work with `initial` installed.
pub fn sync_scope<F, R>(initial: Option<TenantContext>, f: F) -> R
where
    F: FnOnce() -> R,
{
    UNIT_OF_WORK.sync_scope(RefCell::new(initial), f)
}

/// Whether the caller is running inside a unit-of-work scope at all.
pub fn in_unit_of_work() -> bool {
    UNIT_OF_WORK.try_with(|_| ()).is_ok()
}

/// Overwrite the current context, returning the previous one so nested scopes can
/// restore it.
pub fn set(context: TenantContext) -> Result<Option<TenantContext>, TenancyError> {
    UNIT_OF_WORK
        .try_with(|slot| slot.borrow_mut().replace(context))
        .map_err(|_| TenancyError::NoUnitOfWork)
}

pub fn get() -> Option<TenantContext> {
    UNIT_OF_WORK
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Tenant id of the current context, if any.
pub fn current_tenant() -> Option<TenantId> {
    get().map(|ctx| ctx.tenant_id)
}

/// The current context, or `MissingTenantContext`.
pub fn require() -> Result<TenantContext, TenancyError> {
    get().ok_or(TenancyError::MissingTenantContext)
}

pub fn has_context() -> bool {
    UNIT_OF_WORK
        .try_with(|slot| slot.borrow().is_some())
        .unwrap_or(false)
}

/// Idempotent. A no-op outside a unit of work.
pub fn clear() {
    let _ = UNIT_OF_WORK.try_with(|slot| slot.borrow_mut().take());
}

/// Temporarily install `context`; the previous value comes back when the guard drops.
pub fn install(context: TenantContext) -> Result<ContextGuard, TenancyError> {
    let previous = set(context)?;
    Ok(ContextGuard { previous })
}

/// Restores the context that was current before [`install`].
#[must_use = "the context is restored as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<TenantContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = UNIT_OF_WORK.try_with(|slot| *slot.borrow_mut() = previous);
    }
}
