// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Caretaker Tenancy Core
//!
//! Tenant-isolation enforcement for the Caretaker facility-maintenance backend.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Guarantees that no record, message or query of one tenant is
//!   created, mutated, deleted, streamed or leaked to another tenant.
//!
//! | Layer | Contents |
//! |-------|----------|
//! | [`domain`] | `TenantId`, `TenantContext` storage, audit model, collaborator traits, errors |
//! | [`application`] | Ingress filter, entity guard, message channel guard, declarative validator |
//! | [`infrastructure`] | Audit sinks, tenant directory, ownership lookups, topic broker, JWT identity |
//! | [`presentation`] | Axum middleware and WebSocket endpoint |

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
