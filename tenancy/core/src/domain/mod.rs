// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides the tenancy domain model.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value objects, collaborator traits and the error taxonomy shared
//!   by every guard

pub mod tenant;
pub mod principal;
pub mod tenant_context;
pub mod audit;
pub mod record;
pub mod directory;
pub mod errors;
pub mod validation;
pub mod tenancy_config;
pub mod repository;
