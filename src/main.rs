use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use pointy_core::retry::RetryPolicy;
use pointy_core::{Clock, Pusher, SystemClock};
use pointy_engine::{ChangeNotifier, SessionService};
use pointy_server::{ClientRegistry, GatewayPusher, Ingress, ServerConfig, WsPusher};
use pointy_settings::PointySettings;
use pointy_store::{
    start_sweeper, Database, SqliteInterestRegistry, SqliteLockManager, SqliteSessionStore,
    Sweeper, Tables,
};
use pointy_telemetry::TelemetryConfig;

#[derive(Debug, Parser)]
#[command(name = "pointy", about = "Planning-poker session server")]
struct Cli {
    /// Settings file (defaults to $POINTY_SETTINGS or ~/.pointy/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path, or `:memory:`
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => pointy_settings::load_settings_from_path(path),
        None => pointy_settings::load_settings(),
    }
    .context("failed to load settings")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db) = cli.db {
        settings.store.db_path = db;
    }
    settings.validate().context("invalid settings")?;

    let telemetry = pointy_telemetry::init_telemetry(TelemetryConfig {
        json: settings.logging.json,
        ..TelemetryConfig::default().with_level_str(&settings.logging.level)?
    })?;

    tracing::info!(port = settings.server.port, db = %settings.store.db_path, "starting pointy");

    let tables = Tables::from_settings(&settings.store)?;
    let db = open_database(&settings.store.db_path, tables)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let coordination = &settings.coordination;

    let registry = Arc::new(ClientRegistry::new(settings.server.client_queue_size));
    let pusher = build_pusher(&settings, Arc::clone(&registry))?;

    let interest = Arc::new(SqliteInterestRegistry::new(
        db.clone(),
        Arc::clone(&clock),
        coordination.session_timeout(),
    ));
    let notifier = Arc::new(ChangeNotifier::new(
        interest.clone(),
        Arc::clone(&pusher),
        coordination.broadcast_concurrency,
        coordination.broadcast_deadline(),
    ));
    let sessions = Arc::new(SqliteSessionStore::new(
        db.clone(),
        Arc::clone(&clock),
        notifier,
        coordination.session_timeout(),
    ));
    let locks = Arc::new(SqliteLockManager::new(
        db,
        Arc::clone(&clock),
        RetryPolicy::new(coordination.lock_wait_time(), coordination.lock_timeout()),
        coordination.lock_expiration(),
    ));
    let service = Arc::new(SessionService::new(
        locks.clone(),
        sessions.clone(),
        interest.clone(),
        pusher,
        clock,
        coordination.session_timeout(),
    ));

    let cancel = CancellationToken::new();
    let sweeper = start_sweeper(
        Sweeper::new(sessions, locks, interest),
        Duration::from_secs(settings.store.sweep_interval_secs),
        cancel.clone(),
    );

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        heartbeat_interval: Duration::from_millis(settings.server.heartbeat_interval_ms),
        ingress: if settings.gateway.endpoint.is_some() {
            Ingress::Gateway
        } else {
            Ingress::Websocket
        },
    };
    let handle = pointy_server::start(config, service, registry, telemetry.prometheus().cloned())
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "pointy server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    cancel.cancel();
    handle.shutdown();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "sweeper task ended abnormally");
    }
    Ok(())
}

fn open_database(path: &str, tables: Tables) -> anyhow::Result<Database> {
    if path == ":memory:" {
        return Ok(Database::in_memory_with(tables)?);
    }
    Ok(Database::open(Path::new(path), tables)?)
}

/// Use the external gateway when one is configured, else the local websockets.
/// The server's ingress follows the same choice so connection ids always come
/// from whoever delivers the pushes.
fn build_pusher(
    settings: &PointySettings,
    registry: Arc<ClientRegistry>,
) -> anyhow::Result<Arc<dyn Pusher>> {
    let push_timeout = Duration::from_millis(settings.server.push_timeout_ms);
    match &settings.gateway.endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "pushing through connection gateway");
            let timeout = Duration::from_millis(settings.gateway.request_timeout_ms);
            Ok(Arc::new(GatewayPusher::new(endpoint.clone(), timeout)?))
        }
        None => Ok(Arc::new(WsPusher::new(registry, push_timeout))),
    }
}
