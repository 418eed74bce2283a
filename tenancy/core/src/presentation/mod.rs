// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Presentation Layer
//!
//! Axum adapters that put the guards in front of HTTP handlers and the
//! WebSocket message channel.

pub mod middleware;
pub mod ws;

use axum::{middleware::from_fn_with_state, Router};

use middleware::{authenticate, with_tenant_isolation, IngressState};
use ws::{channel_router, ChannelState};

/// Compose the guarded HTTP `api` with the `/ws` channel.
///
/// The channel is authenticated but resolves its tenant at connect time, so it
/// skips the per-request propagation layer.
pub fn app(api: Router, ingress: IngressState, channel: ChannelState) -> Router {
    let channel = channel_router(channel).layer(from_fn_with_state(ingress.clone(), authenticate));
    with_tenant_isolation(api, ingress).merge(channel)
}
