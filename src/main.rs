use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratelimiter::config::LimiterConfig;
use ratelimiter::grpc::GrpcServer;
use ratelimiter::ratelimit::{
    spawn_sweeper, InMemoryRuleStore, LimitsService, RateLimitEngine, RuleStore, RulesFile,
};

/// In-memory rate limiting service.
#[derive(Parser, Debug)]
#[command(name = "ratelimiter", version, about)]
struct Cli {
    /// Configuration file (YAML, JSON or TOML).
    #[arg(long, short, env = "RATELIMITER_CONFIG")]
    config: Option<PathBuf>,

    /// gRPC bind address, overrides the configuration file.
    #[arg(long, env = "RATELIMITER_GRPC_ADDR")]
    grpc_addr: Option<SocketAddr>,

    /// Rules file seeded at startup, overrides the configuration file.
    #[arg(long, env = "RATELIMITER_RULES")]
    rules: Option<PathBuf>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RATELIMITER_LOG_LEVEL")]
    log_level: String,

    /// Log format: "pretty" or "json".
    #[arg(long, default_value = "pretty", env = "RATELIMITER_LOG_FORMAT")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Ratelimiter Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = LimiterConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.grpc_addr {
        config.server.grpc_addr = addr;
    }
    if let Some(rules) = cli.rules {
        config.rate_limiting.rules_path = Some(rules.display().to_string());
    }
    info!(grpc_addr = %config.server.grpc_addr, "Configuration loaded");

    // Build the store, engine and service once and share them
    let store: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new());
    let engine = Arc::new(RateLimitEngine::with_config(
        config.rate_limiting.engine_config(),
    ));
    let service = Arc::new(LimitsService::new(store, Arc::clone(&engine)));

    if let Some(ref path) = config.rate_limiting.rules_path {
        let seeded = RulesFile::from_file(path)?.seed(service.as_ref())?;
        info!(path = %path, rules = seeded, "Seeded rate limit rules");
    }

    let sweeper = config
        .rate_limiting
        .sweep_interval()
        .map(|interval| spawn_sweeper(Arc::clone(&engine), interval));

    let grpc_server = GrpcServer::new(config.server.grpc_addr, service);

    info!("Starting gRPC server on {}", config.server.grpc_addr);

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("Ratelimiter Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
