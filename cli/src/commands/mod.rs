// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Caretaker CLI

pub mod config;
pub mod token;

pub use self::config::ConfigCommand;
pub use self::token::TokenCommand;
