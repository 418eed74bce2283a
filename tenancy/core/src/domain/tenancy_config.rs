// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Tenancy Configuration Types
//
// Defines the configuration schema for the tenant-isolation layer, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - System tenant identity
// - Ingress trust boundary (spoofable headers)
// - Message-channel destination policy
// - Declarative validator defaults
// - Audit pipeline sizing
// - Database, network and observability settings
// - Seed tenants for the in-memory directory

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::tenant::{TenantId, TenantStatus};

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "TenancyConfig";

/// Top-level Kubernetes-style tenancy configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "TenancyConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: TenancyConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfigSpec {
    /// Reserved tenant with universal access. Never derived from client input.
    pub system_tenant_id: TenantId,

    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    /// PostgreSQL backing store; in-memory collaborators are used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,

    /// Seed data for the in-memory tenant directory
    #[serde(default)]
    pub tenants: Vec<TenantSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Request headers removed before the handler runs. Lower-case names.
    #[serde(default = "default_spoofable_headers")]
    pub spoofable_headers: Vec<String>,

    /// Reject requests whose principal resolves to no tenant
    #[serde(default = "default_true")]
    pub require_tenant: bool,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            spoofable_headers: default_spoofable_headers(),
            require_tenant: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Deny destinations that match no known prefix
    #[serde(default = "default_true")]
    pub strict_destinations: bool,

    #[serde(default = "default_broadcast_prefix")]
    pub broadcast_prefix: String,

    /// Followed by `{subject}/`
    #[serde(default = "default_user_prefix")]
    pub user_prefix: String,

    /// Followed by `{tenant-id}/`
    #[serde(default = "default_tenant_prefix")]
    pub tenant_prefix: String,

    /// Per-topic broadcast buffer in the in-process broker
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            strict_destinations: true,
            broadcast_prefix: default_broadcast_prefix(),
            user_prefix: default_user_prefix(),
            tenant_prefix: default_tenant_prefix(),
            topic_capacity: default_topic_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Production default is true; false only while observing a new rule
    #[serde(default = "default_true")]
    pub throw_on_failure: bool,

    /// Let invocations flagged as system operations skip REQUIRE_CONTEXT
    #[serde(default)]
    pub exempt_system_operations: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            throw_on_failure: true,
            exempt_system_operations: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Bounded queue between guards and the dispatcher
    #[serde(default = "default_audit_queue_capacity")]
    pub queue_capacity: usize,

    /// Broadcast buffer for SIEM subscribers
    #[serde(default = "default_audit_stream_capacity")]
    pub stream_capacity: usize,

    /// Persist events to `tenant_audit_events` (requires `database`)
    #[serde(default)]
    pub persist: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_audit_queue_capacity(),
            stream_capacity: default_audit_stream_capacity(),
            persist: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenAlgorithm {
    HS256,
    RS256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_token_algorithm")]
    pub algorithm: TokenAlgorithm,

    /// HS256 secret (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// RS256 public key in PEM format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            algorithm: default_token_algorithm(),
            secret: None,
            public_key_path: None,
            issuer: None,
            audience: None,
        }
    }
}

impl IdentityConfig {
    /// Resolve `env:VAR_NAME` indirection in the HS256 secret.
    pub fn resolved_secret(&self) -> anyhow::Result<Option<String>> {
        match self.secret.as_deref() {
            None => Ok(None),
            Some(value) => match value.strip_prefix("env:") {
                Some(var) => std::env::var(var)
                    .map(Some)
                    .map_err(|_| anyhow::anyhow!("Environment variable '{}' referenced by identity.secret is not set", var)),
                None => Ok(Some(value.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSeed {
    pub id: TenantId,

    pub name: String,

    #[serde(default = "default_tenant_status")]
    pub status: TenantStatus,

    /// Principal subjects affiliated with this tenant
    #[serde(default)]
    pub subjects: Vec<String>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_spoofable_headers() -> Vec<String> {
    vec!["x-tenant-id".to_string()]
}

fn default_broadcast_prefix() -> String {
    "/topic/broadcast/".to_string()
}

fn default_user_prefix() -> String {
    "/user/".to_string()
}

fn default_tenant_prefix() -> String {
    "/topic/tenant/".to_string()
}

fn default_topic_capacity() -> usize {
    256
}

fn default_audit_queue_capacity() -> usize {
    4096
}

fn default_audit_stream_capacity() -> usize {
    1024
}

fn default_token_algorithm() -> TokenAlgorithm {
    TokenAlgorithm::HS256
}

fn default_max_connections() -> u32 {
    5
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_tenant_status() -> TenantStatus {
    TenantStatus::Active
}

impl Default for TenancyConfigSpec {
    fn default() -> Self {
        Self {
            system_tenant_id: TenantId::new(),
            ingress: IngressConfig::default(),
            channel: ChannelConfig::default(),
            validator: ValidatorConfig::default(),
            audit: AuditConfig::default(),
            identity: IdentityConfig::default(),
            database: None,
            network: None,
            observability: None,
            tenants: vec![],
        }
    }
}

impl Default for TenancyConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "caretaker".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: TenancyConfigSpec::default(),
        }
    }
}

impl TenancyConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CARETAKER_CONFIG_PATH environment variable
    /// 2. ./caretaker-config.yaml (working directory)
    /// 3. ~/.caretaker/config.yaml (user home)
    /// 4. /etc/caretaker/config.yaml (system, Unix) or C:\ProgramData\Caretaker\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CARETAKER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./caretaker-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".caretaker").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/caretaker/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Caretaker\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults with a generated system tenant id.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("CARETAKER_SYSTEM_TENANT_ID") {
            match TenantId::from_string(&val) {
                Ok(id) => {
                    tracing::info!("Environment override: CARETAKER_SYSTEM_TENANT_ID");
                    self.spec.system_tenant_id = id;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for CARETAKER_SYSTEM_TENANT_ID: '{}'. Expected a UUID. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(val) = lookup("CARETAKER_STRICT_DESTINATIONS") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: CARETAKER_STRICT_DESTINATIONS=true");
                    self.spec.channel.strict_destinations = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: CARETAKER_STRICT_DESTINATIONS=false");
                    self.spec.channel.strict_destinations = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for CARETAKER_STRICT_DESTINATIONS: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Some(url) = lookup("CARETAKER_DATABASE_URL") {
            tracing::info!("Environment override: CARETAKER_DATABASE_URL");
            match self.spec.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    self.spec.database = Some(DatabaseConfig {
                        url,
                        max_connections: default_max_connections(),
                    })
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.system_tenant_id.is_nil() {
            anyhow::bail!("spec.system_tenant_id cannot be the nil UUID");
        }

        let channel = &self.spec.channel;
        let prefixes = [
            ("broadcast_prefix", &channel.broadcast_prefix),
            ("user_prefix", &channel.user_prefix),
            ("tenant_prefix", &channel.tenant_prefix),
        ];
        for (field, prefix) in prefixes {
            if prefix.is_empty() {
                anyhow::bail!("spec.channel.{} cannot be empty", field);
            }
            if !prefix.ends_with('/') {
                anyhow::bail!("spec.channel.{} must end with '/': '{}'", field, prefix);
            }
        }
        // Destination classes must be disjoint.
        for (i, (field, prefix)) in prefixes.iter().enumerate() {
            for (other_field, other) in &prefixes[i + 1..] {
                if prefix.starts_with(other.as_str()) || other.starts_with(prefix.as_str()) {
                    anyhow::bail!(
                        "spec.channel.{} '{}' overlaps spec.channel.{} '{}'",
                        field,
                        prefix,
                        other_field,
                        other
                    );
                }
            }
        }

        if channel.topic_capacity == 0 {
            anyhow::bail!("spec.channel.topic_capacity must be greater than zero");
        }

        if self.spec.audit.queue_capacity == 0 {
            anyhow::bail!("spec.audit.queue_capacity must be greater than zero");
        }

        if self.spec.audit.stream_capacity == 0 {
            anyhow::bail!("spec.audit.stream_capacity must be greater than zero");
        }

        if self.spec.audit.persist && self.spec.database.is_none() {
            anyhow::bail!("spec.audit.persist requires spec.database");
        }

        match self.spec.identity.algorithm {
            TokenAlgorithm::HS256 if self.spec.identity.secret.is_none() => {
                tracing::debug!("identity.secret not set; token verification disabled");
            }
            TokenAlgorithm::RS256 if self.spec.identity.public_key_path.is_none() => {
                anyhow::bail!("spec.identity.public_key_path is required for RS256");
            }
            _ => {}
        }

        for tenant in &self.spec.tenants {
            if tenant.name.is_empty() {
                anyhow::bail!("Tenant name cannot be empty for: {}", tenant.id);
            }
            if tenant.id == self.spec.system_tenant_id {
                anyhow::bail!("Seed tenant '{}' reuses the system tenant id", tenant.name);
            }
        }

        Ok(())
    }
}
