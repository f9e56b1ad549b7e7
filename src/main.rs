//! Provider Gateway
//!
//! Serves the gateway REST API over the providers listed in a YAML
//! configuration file.

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use provider_gateway::{ApiServer, ApiServerConfig, GatewayConfig, Orchestrator};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Provider Gateway - pooled, cached fan-out over upstream HTTP providers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway configuration file (YAML)
    #[arg(long, env = "GATEWAY_CONFIG")]
    config: Option<String>,

    /// REST API bind address (overrides the config file)
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting Provider Gateway");
    info!("  Version: {}", provider_gateway::VERSION);

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => {
            info!("  No configuration file given, starting without providers");
            GatewayConfig::default()
        }
    };

    if let Some(addr) = &args.api_addr {
        config.api = ApiServerConfig::with_addr(addr).context("parsing --api-addr")?;
    }

    info!("  REST API: {}", config.api.rest_addr);
    info!("  Providers: {}", config.orchestrator.providers.len());

    // Create orchestrator
    let orchestrator =
        Orchestrator::new(config.orchestrator).context("initializing orchestrator")?;

    // Serve until Ctrl-C
    let api_server = ApiServer::new(config.api, orchestrator.clone());
    let served = api_server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C");
            }
        })
        .await;

    orchestrator.destroy();
    served.context("running REST API")?;

    info!("Gateway shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("tower_http=info".parse()?)
        .add_directive("axum=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
