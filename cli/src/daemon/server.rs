// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use caretaker_tenancy::{
    application::{context_propagation::ContextPropagationFilter, message_channel_guard::MessageChannelGuard},
    domain::{
        audit::AuditSink,
        directory::TenantDirectory,
        tenancy_config::TenancyConfigManifest,
        tenant_context,
    },
    infrastructure::{
        audit::{AuditDispatcher, AuditWriter, ChannelAuditSink, RepositoryAuditWriter, TracingAuditWriter},
        db::Database,
        event_bus::AuditEventBus,
        identity::PrincipalTokenVerifier,
        broker::TopicBroker,
        repositories::{PostgresAuditEventRepository, PostgresTenantDirectory},
        tenant_directory::InMemoryTenantDirectory,
    },
    presentation::{self, middleware::IngressState, ws::ChannelState},
};

/// Everything `serve` runs, assembled from one manifest.
pub struct DaemonRuntime {
    pub router: Router,
    pub audit_sink: Arc<ChannelAuditSink>,
    pub audit_bus: AuditEventBus,
    pub dispatcher: JoinHandle<()>,
}

pub async fn build_runtime(config: &TenancyConfigManifest) -> Result<DaemonRuntime> {
    let spec = &config.spec;

    let database = match &spec.database {
        Some(db) => Some(Database::from_config(db).await?),
        None => None,
    };

    // Audit pipeline
    let (sink, receiver) = ChannelAuditSink::channel(spec.audit.queue_capacity);
    let audit_sink = Arc::new(sink);
    let audit_bus = AuditEventBus::new(spec.audit.stream_capacity);
    let mut writers: Vec<Arc<dyn AuditWriter>> = vec![Arc::new(TracingAuditWriter), Arc::new(audit_bus.clone())];
    if spec.audit.persist {
        let db = database.as_ref().context("spec.audit.persist requires spec.database")?;
        writers.push(Arc::new(RepositoryAuditWriter::new(Arc::new(
            PostgresAuditEventRepository::new(db.get_pool().clone()),
        ))));
    }
    let dispatcher = AuditDispatcher::new(receiver, writers).start();
    let audit: Arc<dyn AuditSink> = audit_sink.clone();

    // Tenant directory
    let directory: Arc<dyn TenantDirectory> = match &database {
        Some(db) => {
            if !spec.tenants.is_empty() {
                warn!("spec.tenants is ignored when spec.database is configured");
            }
            Arc::new(PostgresTenantDirectory::new(db.get_pool().clone()))
        }
        None => {
            info!(tenants = spec.tenants.len(), "Using in-memory tenant directory");
            Arc::new(InMemoryTenantDirectory::from_seeds(&spec.tenants))
        }
    };

    let filter = Arc::new(ContextPropagationFilter::new(directory, audit.clone(), spec.system_tenant_id));
    let guard = Arc::new(MessageChannelGuard::new(filter.clone(), audit, spec.channel.clone()));

    let verifier = PrincipalTokenVerifier::from_config(&spec.identity)
        .context("Failed to initialize token verifier")?
        .map(Arc::new);
    if verifier.is_none() {
        warn!("No identity secret configured; every bearer token will be rejected");
    }

    let ingress = IngressState {
        verifier,
        filter,
        config: spec.ingress.clone(),
    };
    let channel = ChannelState {
        guard: guard.clone(),
        broker: Arc::new(TopicBroker::new(spec.channel.topic_capacity)),
    };

    let api = Router::new().route("/api/context", get(context_handler));
    let health = Router::new().route("/health", get(health_handler)).with_state(Arc::new(HealthState {
        guard,
        audit_sink: audit_sink.clone(),
        start_time: std::time::Instant::now(),
    }));

    Ok(DaemonRuntime {
        router: presentation::app(api, ingress, channel).merge(health),
        audit_sink,
        audit_bus,
        dispatcher,
    })
}

pub async fn start_daemon(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = TenancyConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    info!(
        name = %config.metadata.name,
        system_tenant_id = %config.spec.system_tenant_id,
        "Configuration loaded"
    );

    if let Some(metrics) = config.spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        if metrics.enabled {
            let addr = SocketAddr::from(([0, 0, 0, 0], metrics.port));
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("Failed to install Prometheus exporter")?;
            info!("Metrics exporter listening on {}", addr);
        }
    }

    let runtime = build_runtime(&config).await?;

    let network = config.spec.network.clone().unwrap_or_default();
    let addr = format!(
        "{}:{}",
        host.unwrap_or(network.bind_address),
        port.unwrap_or(network.port)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Caretaker daemon listening on {}", addr);

    let DaemonRuntime {
        router,
        audit_sink,
        audit_bus,
        dispatcher,
    } = runtime;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!(
        dropped_audit_events = audit_sink.dropped_events(),
        stream_subscribers = audit_bus.subscriber_count(),
        "Daemon shutting down"
    );

    // Dropping the last sender lets the dispatcher drain and exit.
    drop(audit_sink);
    if let Err(e) = dispatcher.await {
        error!(error = %e, "audit dispatcher task failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

struct HealthState {
    guard: Arc<MessageChannelGuard>,
    audit_sink: Arc<ChannelAuditSink>,
    start_time: std::time::Instant,
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "connections": state.guard.connection_count(),
        "dropped_audit_events": state.audit_sink.dropped_events(),
    }))
}

/// The tenant this request runs under, as resolved at ingress.
async fn context_handler() -> Json<serde_json::Value> {
    match tenant_context::get() {
        Some(ctx) => Json(serde_json::json!({
            "tenant_id": ctx.tenant_id,
            "is_system_tenant": ctx.is_system_tenant,
            "established_at": ctx.established_at,
        })),
        None => Json(serde_json::json!({ "tenant_id": null })),
    }
}
