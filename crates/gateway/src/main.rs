//! `tetherd` — the Tether daemon binary.
//!
//! Loads the TOML config, opens the store, wires the provider kit and
//! both executors, and serves the HTTP + SSE API.

mod api;
mod config;
mod error;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tether_engine::{RunExecutor, SessionExecutor};
use tether_providers::mock::ScriptedProvider;
use tether_providers::ProviderKit;
use tether_store::Store;

use crate::config::Config;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "tetherd", about = "Local coding-agent harness daemon")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<String>,

    /// Override the configured bind address (host:port).
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let data_dir = config.data_dir();
    let store = Arc::new(Store::open(&data_dir)?);

    let mut kit = ProviderKit::new();
    if config.providers.mock {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let record = provider.record();
        kit.register(provider, vec![record]);
    }
    if kit.list_model_records().is_empty() {
        tracing::warn!(
            "no providers configured; runs and turns will fail model resolution \
             (set [providers] mock = true for a smoke setup)"
        );
    }
    let kit = Arc::new(kit);

    let runs = RunExecutor::new(store.clone(), kit.clone(), config.model_policy.clone());
    let sessions = SessionExecutor::new(
        store.clone(),
        kit,
        config.model_policy.clone(),
        config.verify.clone(),
        config.approval.clone(),
    );

    let bind = args.bind.unwrap_or_else(|| config.bind_addr());
    let state = AppState {
        config: Arc::new(config),
        store,
        runs,
        sessions,
    };

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(%bind, data_dir = %data_dir.display(), "tetherd listening");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
