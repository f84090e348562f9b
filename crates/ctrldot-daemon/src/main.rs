//! ctrldotd - the ctrldot action-gating daemon.
//!
//! Hosts the HTTP decision API over a runtime store, a ledger sink, and the
//! autobundle manager. On SIGINT/SIGTERM the daemon writes the shutdown
//! autobundle (when enabled), drains the ledger sink (which turns buffered
//! sessions into signed bundles), and exits.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ctrldot_core::DAEMON_VERSION;
use ctrldot_core::config::Config;
use ctrldot_core::ledger::autobundle::AutobundleManager;
use ctrldot_core::ledger::bundle::BundleSink;
use ctrldot_core::ledger::{KernelHttpSink, LedgerSink, NoopSink};
use ctrldot_core::service::DecisionService;
use ctrldot_core::store::{RuntimeStore, SqliteStore};
use ctrldot_core::token::TokenKeeper;

use ctrldot_daemon::http::router;
use ctrldot_daemon::state::AppState;

/// ctrldotd - agent action-gating daemon
#[derive(Parser, Debug)]
#[command(name = "ctrldotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the config file (default: $CTRLDOT_CONFIG or
    /// ~/.ctrldot/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn config_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.config {
        return path.clone();
    }
    if let Ok(path) = std::env::var("CTRLDOT_CONFIG") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from("~/.ctrldot/config.yaml")
}

fn open_store(config: &Config) -> Result<Arc<dyn RuntimeStore>> {
    match config.runtime_store.kind.as_str() {
        "" | "sqlite" => {
            let path = if config.runtime_store.sqlite_path.is_empty() {
                "~/.ctrldot/ctrldot.sqlite".to_string()
            } else {
                config.runtime_store.sqlite_path.clone()
            };
            let store = SqliteStore::open(&path).context("failed to open SQLite runtime store")?;
            Ok(Arc::new(store))
        },
        "postgres" => {
            // The Postgres transport delegates to the kernel store, which
            // ships separately from this daemon.
            bail!("runtime_store.kind=postgres requires the kernel store; use sqlite")
        },
        other => bail!("unknown runtime_store.kind: {other}"),
    }
}

fn build_sink(config: &Config) -> Result<Arc<dyn LedgerSink>> {
    let runtime_kind = if config.runtime_store.kind.is_empty() {
        "sqlite"
    } else {
        config.runtime_store.kind.as_str()
    };
    match config.ledger_sink.kind.as_str() {
        "bundle" => {
            let sink = BundleSink::new(config, runtime_kind, DAEMON_VERSION)
                .context("failed to create bundle sink")?;
            Ok(Arc::new(sink))
        },
        "kernel_http" => Ok(Arc::new(KernelHttpSink::new(&config.ledger_sink.kernel_http))),
        _ => Ok(Arc::new(NoopSink)),
    }
}

fn token_keeper() -> TokenKeeper {
    let current = std::env::var("CTRLDOT_TOKEN_SECRET").unwrap_or_default();
    let previous = std::env::var("CTRLDOT_TOKEN_SECRET_PREVIOUS").unwrap_or_default();
    if previous.is_empty() {
        TokenKeeper::from_secret(&current)
    } else {
        TokenKeeper::with_rotation(&current, &previous)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    let path = config_path(&args);
    let mut config = Config::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    // Panic requested at startup: persist it into the store below once the
    // store is open, mirroring the panic/on endpoint.
    let startup_panic = config.panic.enabled;
    config.panic.enabled = false;
    let config = Arc::new(config);

    let store = open_store(&config)?;
    let ledger_sink = build_sink(&config)?;
    let autobundle = Arc::new(AutobundleManager::new(
        config.clone(),
        Some(store.clone()),
        DAEMON_VERSION,
    ));

    let service = Arc::new(DecisionService::new(
        store.clone(),
        config.clone(),
        ledger_sink.clone(),
        Some(autobundle.clone()),
        token_keeper(),
    ));

    if startup_panic {
        match service.enable_panic(config.panic.ttl_seconds, "enabled at startup") {
            Ok(state) => info!(expires_at = ?state.expires_at, "panic mode enabled at startup"),
            Err(err) => warn!(error = %err, "failed to enable panic at startup"),
        }
    }

    let state = AppState::new(service, Some(autobundle.clone()), config.clone());
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        addr = %addr,
        runtime_store = %config.runtime_store.kind,
        ledger_sink = %config.ledger_sink.kind,
        "ctrldot daemon started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");

    match autobundle.maybe_bundle_on_shutdown() {
        Ok(Some(bundle_path)) => info!(path = %bundle_path, "shutdown bundle written"),
        Ok(None) => {},
        Err(err) => error!(error = %err, "shutdown bundle failed"),
    }
    if let Err(err) = ledger_sink.close().await {
        error!(error = %err, "ledger sink close failed");
    }

    info!("daemon shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            error!(error = %err, "failed to register SIGTERM handler");
            return std::future::pending::<()>().await;
        },
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(sig) => sig,
        Err(err) => {
            error!(error = %err, "failed to register SIGINT handler");
            return std::future::pending::<()>().await;
        },
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}
