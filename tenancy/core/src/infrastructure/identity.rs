// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bearer-token identity adapter.
//!
//! Verifies a signed JWT and turns its claims into a [`Principal`]. This is the
//! only place signatures are checked; the guards trust the principal it returns.

use anyhow::{Context, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::domain::principal::{Principal, PrincipalKind};
use crate::domain::tenancy_config::{IdentityConfig, TokenAlgorithm};
use crate::domain::tenant::TenantId;

/// Claims carried by principal tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalClaims {
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,

    #[serde(default = "default_kind")]
    pub kind: PrincipalKind,

    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

fn default_kind() -> PrincipalKind {
    PrincipalKind::Human
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

pub struct PrincipalTokenVerifier {
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: Option<String>,
    audience: Option<String>,
}

impl PrincipalTokenVerifier {
    pub fn hs256(secret: &[u8], issuer: Option<&str>, audience: Option<&str>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            issuer: issuer.map(str::to_string),
            audience: audience.map(str::to_string),
        }
    }

    pub fn rs256(pem: &str, issuer: Option<&str>, audience: Option<&str>) -> Result<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes()).context("invalid RSA public key")?;
        Ok(Self {
            decoding_key,
            algorithm: Algorithm::RS256,
            issuer: issuer.map(str::to_string),
            audience: audience.map(str::to_string),
        })
    }

    /// `None` when HS256 is selected without a secret (tokens not accepted).
    pub fn from_config(config: &IdentityConfig) -> Result<Option<Self>> {
        let issuer = config.issuer.as_deref();
        let audience = config.audience.as_deref();
        match config.algorithm {
            TokenAlgorithm::HS256 => Ok(config
                .resolved_secret()?
                .map(|secret| Self::hs256(secret.as_bytes(), issuer, audience))),
            TokenAlgorithm::RS256 => {
                let path = config
                    .public_key_path
                    .as_deref()
                    .context("identity.public_key_path is required for RS256")?;
                let pem = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read public key at {path}"))?;
                Self::rs256(&pem, issuer, audience).map(Some)
            }
        }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, IdentityError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        let claims = decode::<PrincipalClaims>(token, &self.decoding_key, &validation)?.claims;
        Ok(Principal {
            subject: claims.sub,
            tenant_id: claims.tenant_id,
            kind: claims.kind,
        })
    }
}

/// Token part of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}
