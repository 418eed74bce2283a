// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides the isolation guards.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Coordinates tenant context, collaborators and the audit sink at
//!   each access path (ingress, persistence, message channel, service methods)

pub mod context_propagation;
pub mod entity_guard;
pub mod message_channel_guard;
pub mod access_validator;
