// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Development token helpers
//!
//! Mints HS256 tokens signed with `spec.identity.secret` so the daemon can be
//! exercised locally. RS256 deployments get their tokens from the identity
//! provider.

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::path::PathBuf;

use caretaker_tenancy::domain::principal::PrincipalKind;
use caretaker_tenancy::domain::tenancy_config::{IdentityConfig, TenancyConfigManifest, TokenAlgorithm};
use caretaker_tenancy::domain::tenant::TenantId;
use caretaker_tenancy::infrastructure::identity::PrincipalClaims;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Human,
    Service,
    System,
}

impl From<KindArg> for PrincipalKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Human => PrincipalKind::Human,
            KindArg::Service => PrincipalKind::Service,
            KindArg::System => PrincipalKind::System,
        }
    }
}

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Issue a signed token for a principal
    Issue {
        /// Principal subject
        #[arg(long)]
        subject: String,

        /// Tenant claim
        #[arg(long)]
        tenant: Option<TenantId>,

        #[arg(long, value_enum, default_value = "human")]
        kind: KindArg,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: i64,
    },
}

pub async fn handle_command(command: TokenCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        TokenCommand::Issue {
            subject,
            tenant,
            kind,
            ttl,
        } => {
            let config = TenancyConfigManifest::load_or_default(config_override)
                .context("Failed to load configuration")?;
            let token = issue(&config.spec.identity, &subject, tenant, kind.into(), ttl)?;
            println!("{}", token);
            Ok(())
        }
    }
}

pub fn issue(
    identity: &IdentityConfig,
    subject: &str,
    tenant_id: Option<TenantId>,
    kind: PrincipalKind,
    ttl_seconds: i64,
) -> Result<String> {
    if identity.algorithm != TokenAlgorithm::HS256 {
        anyhow::bail!("token issue only supports HS256; RS256 tokens come from the identity provider");
    }
    let secret = identity
        .resolved_secret()?
        .context("spec.identity.secret is not configured")?;

    let now = chrono::Utc::now().timestamp();
    let claims = PrincipalClaims {
        sub: subject.to_string(),
        tenant_id,
        kind,
        exp: now + ttl_seconds,
        iat: Some(now),
        iss: identity.issuer.clone(),
        aud: identity.audience.clone(),
    };

    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .context("Failed to sign token")
}
