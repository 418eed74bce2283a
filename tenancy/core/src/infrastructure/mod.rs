// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides adapters for the tenancy domain ports.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Audit pipeline, collaborator implementations, in-process broker
//!   and identity adapter

pub mod audit;
pub mod event_bus;
pub mod tenant_directory;
pub mod ownership;
pub mod store;
pub mod broker;
pub mod identity;
pub mod db;
pub mod repositories;
