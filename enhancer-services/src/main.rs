//! Enhancer services: the feedback router and the codex apply bridge.

mod routes;
mod state;

use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use enhancer::io::config::{DEFAULT_CONFIG_PATH, load_config};
use enhancer::logging::{self, LogFormat};

use crate::state::{BridgeState, RouterState};

#[derive(Parser)]
#[command(name = "enhancer-services")]
#[command(about = "HTTP services for the frontend enhancement loop")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    service: Service,
}

#[derive(Subcommand)]
enum Service {
    /// Fan feedback batches out to the apply bridge.
    Router {
        /// Address to bind (overrides `router.bind`).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Apply feedback to the target repository with `codex exec`.
    Bridge {
        /// Address to bind (overrides `bridge.bind`).
        #[arg(long)]
        bind: Option<String>,
        /// Repository the agent edits (overrides `bridge.target_repo`).
        #[arg(long)]
        target_repo: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(
        cli.log_format,
        "enhancer_services=info,enhancer=info,tower_http=info,warn",
    );
    let config = load_config(&cli.config)?;
    let shutdown = CancellationToken::new();

    let (app, bind) = match cli.service {
        Service::Router { bind } => {
            let state = RouterState::from_config(&config.router)?;
            info!(bridge = %state.bridge_url, max_concurrency = state.max_concurrency, "starting router");
            (
                routes::router_app(state),
                bind.unwrap_or_else(|| config.router.bind.clone()),
            )
        }
        Service::Bridge { bind, target_repo } => {
            let mut bridge = config.bridge.clone();
            if let Some(repo) = target_repo {
                bridge.target_repo = repo;
            }
            let state = BridgeState::from_config(&bridge, shutdown.clone())?;
            info!(repo = %bridge.target_repo.display(), "starting apply bridge");
            (
                routes::bridge_app(state),
                bind.unwrap_or_else(|| bridge.bind.clone()),
            )
        }
    };

    serve(app, &bind, shutdown).await
}

/// Serve until SIGINT; the shutdown token is cancelled first so in-flight
/// agent runs are terminated before the listener drains.
async fn serve(app: Router, bind: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(addr = %listener.local_addr().context("local addr")?, "listening");

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            trigger.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("serve")?;
    info!("stopped");
    Ok(())
}
