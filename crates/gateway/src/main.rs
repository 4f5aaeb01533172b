use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use dp_domain::config::Config;
use dp_gateway::api;
use dp_gateway::cli::{Cli, Command};
use dp_gateway::state::AppState;
use dp_platform::HttpPlatformFactory;
use dp_providers::AnthropicProvider;
use dp_store::{KvStore, RedisStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(cli.config.as_deref())?;
            config.validate()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::ConfigValidate) => {
            let config = Config::load(cli.config.as_deref())?;
            match config.validate() {
                Ok(()) => {
                    println!("configuration ok");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("configuration invalid: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Version) => {
            println!("docpilot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dp_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("docpilot starting");

    // ── Persistence ──────────────────────────────────────────────────
    let kv: Arc<dyn KvStore> = Arc::new(
        RedisStore::connect(&config.redis_url())
            .await
            .with_context(|| format!("connecting to redis at {}", config.redis_url()))?,
    );

    // ── LLM provider ─────────────────────────────────────────────────
    let llm = Arc::new(AnthropicProvider::from_config(&config.llm)?);

    // ── Downstream platform ──────────────────────────────────────────
    let platform = Arc::new(HttpPlatformFactory::new());
    if config.platform.token.is_empty() {
        tracing::warn!(
            "no default platform credential (API_TOKEN); requests must carry X-API-Token"
        );
    }

    let state = AppState::build(config.clone(), llm, kv, platform);

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router(&state)
        .layer(CorsLayer::permissive())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, mode = config.platform.mode.as_str(), "docpilot listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
