// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wires the guardian from a manifest and runs it: repositories, platform
//! gateway, event bus, tick scheduler and the HTTP status/control API.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use profit_guardian_core::application::{GuardianQueryService, GuardianRuntime, GuardianService};
use profit_guardian_core::domain::config::{GuardianConfig, GuardianManifest, StorageConfig};
use profit_guardian_core::domain::platform::AdsPlatform;
use profit_guardian_core::domain::store::{EntityRegistry, StateStore};
use profit_guardian_core::infrastructure::ads::RestAdsGateway;
use profit_guardian_core::infrastructure::event_bus::EventBus;
use profit_guardian_core::infrastructure::notifier::WebhookNotifier;
use profit_guardian_core::infrastructure::repositories::postgres::ensure_schema;
use profit_guardian_core::infrastructure::repositories::{
    InMemoryEntityRegistry, InMemoryStateStore, PostgresEntityRegistry, PostgresStateStore,
};
use profit_guardian_core::presentation::api::{app, AppState};

struct Wired {
    runtime: Arc<GuardianRuntime>,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

async fn wire(manifest: &GuardianManifest) -> Result<Wired> {
    let config = &manifest.spec;

    let (registry, store): (Arc<dyn EntityRegistry>, Arc<dyn StateStore>) = match &config.storage {
        StorageConfig::Memory => {
            info!("using in-memory storage (state is lost on restart)");
            (
                Arc::new(InMemoryEntityRegistry::new()),
                Arc::new(InMemoryStateStore::new()),
            )
        }
        StorageConfig::Postgres { url } => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to postgres")?;
            ensure_schema(&pool)
                .await
                .context("failed to ensure guardian schema")?;
            info!("using postgres storage");
            (
                Arc::new(PostgresEntityRegistry::new(pool.clone())),
                Arc::new(PostgresStateStore::new(pool)),
            )
        }
    };

    let platform: Arc<dyn AdsPlatform> = Arc::new(RestAdsGateway::new(&config.platform));
    let events = EventBus::with_default_capacity();
    let cancel = CancellationToken::new();

    if let Some(url) = &config.webhook_url {
        WebhookNotifier::new(url.clone()).spawn(&events, cancel.clone());
    }

    let service = Arc::new(GuardianService::new(
        config.clone(),
        Arc::clone(&registry),
        Arc::clone(&store),
        platform,
        events,
    ));
    let runtime = GuardianRuntime::new(config, Arc::clone(&service));
    let queries = Arc::new(GuardianQueryService::new(
        Arc::clone(&registry),
        Arc::clone(&store),
    ));

    let state = Arc::new(AppState {
        runtime: Arc::clone(&runtime),
        queries,
        registry,
        store,
    });

    Ok(Wired {
        runtime,
        state,
        cancel,
    })
}

fn install_metrics_exporter(config: &GuardianConfig) -> Result<()> {
    let Some(port) = config.metrics_port else {
        return Ok(());
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to start prometheus exporter")?;
    info!(%addr, "prometheus exporter listening");
    Ok(())
}

pub async fn serve(
    config_path: &Path,
    host: Option<String>,
    port: Option<u16>,
    enable: bool,
) -> Result<()> {
    let manifest = GuardianManifest::from_yaml_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!(guardian = %manifest.metadata.name, "manifest loaded");

    install_metrics_exporter(&manifest.spec)?;

    let wired = wire(&manifest).await?;
    if enable {
        wired.runtime.enable();
    }
    wired.runtime.start().await?;

    let host = host.unwrap_or_else(|| manifest.spec.api.host.clone());
    let port = port.unwrap_or(manifest.spec.api.port);
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "guardian API listening");

    axum::serve(listener, app(Arc::clone(&wired.state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Flush the in-flight tick before dropping the process.
    wired.runtime.shutdown().await;
    wired.cancel.cancel();
    Ok(())
}

/// Run exactly one tick against the configured account and print the
/// outcome, without starting the scheduler or the API.
pub async fn tick_once(config_path: &Path) -> Result<()> {
    let manifest = GuardianManifest::from_yaml_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let wired = wire(&manifest).await?;
    wired.runtime.service().init().await?;
    let outcome = wired.runtime.run_now().await?;
    wired.cancel.cancel();

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("failed to render outcome")?
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C");
        },
        _ = terminate => {
            info!("received SIGTERM");
        },
    }
}
