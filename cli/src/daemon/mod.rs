// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Wiring collaborators from configuration
//! - HTTP ingress and WebSocket channel
//! - Audit dispatcher lifecycle
//! - Graceful shutdown

pub mod server;

pub use server::start_daemon;
