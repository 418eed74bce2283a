// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP ingress middleware.
//!
//! Two layers, outermost first:
//!
//! 1. [`authenticate`] verifies the bearer token and stores the [`Principal`]
//!    in the request extensions;
//! 2. [`propagate_tenant`] strips client-supplied tenant headers and runs the
//!    rest of the stack inside one unit of work for the resolved tenant.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use tracing::{debug, warn};

use crate::application::context_propagation::{ContextPropagationFilter, TenantRequirement};
use crate::domain::errors::TenancyError;
use crate::domain::principal::Principal;
use crate::domain::tenancy_config::IngressConfig;
use crate::infrastructure::identity::{bearer_token, PrincipalTokenVerifier};

#[derive(Clone)]
pub struct IngressState {
    /// `None` rejects every presented token.
    pub verifier: Option<Arc<PrincipalTokenVerifier>>,
    pub filter: Arc<ContextPropagationFilter>,
    pub config: IngressConfig,
}

impl IngressState {
    fn requirement(&self) -> TenantRequirement {
        if self.config.require_tenant {
            TenantRequirement::Required
        } else {
            TenantRequirement::Optional
        }
    }
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        let status = match &self {
            TenancyError::MissingTenantContext | TenancyError::UnknownConnection => StatusCode::UNAUTHORIZED,
            TenancyError::NoUnitOfWork | TenancyError::InvalidAccessRule(_) | TenancyError::DirectoryUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::FORBIDDEN,
        };
        (status, Json(serde_json::json!({ "error": self.client_message() }))).into_response()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "authentication required" })),
    )
        .into_response()
}

/// Verify `Authorization: Bearer` and attach the principal. Requests without the
/// header pass through unauthenticated; a present but invalid token is rejected.
pub async fn authenticate(State(state): State<IngressState>, mut request: Request, next: Next) -> Response {
    if let Some(value) = request.headers().get(AUTHORIZATION) {
        let Some(verifier) = &state.verifier else {
            warn!("bearer token presented but no token verifier is configured");
            return unauthorized();
        };

        let Some(token) = value.to_str().ok().and_then(bearer_token) else {
            return unauthorized();
        };

        match verifier.verify(token) {
            Ok(principal) => {
                debug!(subject = %principal.subject, "principal authenticated");
                request.extensions_mut().insert(principal);
            }
            Err(e) => {
                warn!(error = %e, "rejected bearer token");
                return unauthorized();
            }
        }
    }
    next.run(request).await
}

/// Resolve the tenant and run the downstream stack as one unit of work.
pub async fn propagate_tenant(State(state): State<IngressState>, mut request: Request, next: Next) -> Response {
    strip_spoofable_headers(request.headers_mut(), &state.config.spoofable_headers);

    let principal = request.extensions().get::<Principal>().cloned();
    match state.filter.run(principal.as_ref(), state.requirement(), next.run(request)).await {
        Ok(response) => response,
        Err(e) => {
            debug!(kind = e.kind(), "request rejected at ingress");
            e.into_response()
        }
    }
}

/// Remove client-controlled tenant hints. Returns how many were present.
pub fn strip_spoofable_headers(headers: &mut HeaderMap, names: &[String]) -> usize {
    let mut stripped = 0;
    for name in names {
        if headers.remove(name.to_ascii_lowercase().as_str()).is_some() {
            warn!(header = %name, "ignoring client-supplied tenant header");
            stripped += 1;
        }
    }
    stripped
}

/// Wrap `router` with authentication and tenant propagation.
pub fn with_tenant_isolation(router: Router, state: IngressState) -> Router {
    router
        .layer(from_fn_with_state(state.clone(), propagate_tenant))
        .layer(from_fn_with_state(state, authenticate))
}
