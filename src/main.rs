//! Pair-cost arbitrage engine entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pair_arb::api::{create_router, AppState};
use pair_arb::config::Config;
use pair_arb::engine::{Engine, EngineContext};
use pair_arb::exchange::ClobClient;
use pair_arb::market::MarketFeed;
use pair_arb::utils::shutdown_signal;
use pair_arb::{metrics, storage};

/// Pair-cost arbitrage engine for binary UP/DOWN prediction markets.
#[derive(Parser, Debug)]
#[command(name = "pair-arb")]
#[command(about = "Automated pair-cost arbitrage on binary prediction markets")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine with the control surface (default).
    Run {
        /// Run in dry-run mode (no real orders).
        #[arg(long)]
        dry_run: Option<bool>,

        /// Control-surface port, overriding the environment.
        #[arg(short, long)]
        port: Option<u16>,

        /// Start trading immediately instead of waiting for /bot/start.
        #[arg(long)]
        auto_start: bool,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Discover currently eligible markets and exit.
    Discover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("pair_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::Discover) => cmd_discover().await,
        Some(Command::Run {
            dry_run,
            port,
            auto_start,
        }) => cmd_run(dry_run, port, auto_start).await,
        None => cmd_run(None, None, false).await,
    }
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("PAIR-ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {e}");
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {e}");
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Symbols: {}", config.symbols);
    println!("  Target Pair Cost: ${}", config.target_pair_cost);
    println!("  Order Size: {} shares", config.order_size);
    println!("  Min Liquidity: {}", config.min_liquidity);
    println!("  Dry Run: {}", config.dry_run);
    println!("  Auto Merge: {}", config.auto_merge);
    println!("  Bargain Strategy: {}", config.bargain_enabled);
    println!("  Scan Interval: {}s", config.scan_interval_seconds);
    println!("  State File: {}", config.state_file);
    println!("  API Credentials: {}", if config.exchange_api_key.is_some() {
        "present"
    } else {
        "absent"
    });
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Discover currently eligible markets and exit.
async fn cmd_discover() -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let feed = MarketFeed::new(http, config.gamma_url.clone(), config.symbol_list());

    println!("Searching for eligible markets...");
    let markets = feed
        .discover(config.min_time_remaining_seconds)
        .await
        .map_err(|e| anyhow::anyhow!("discovery failed: {e}"))?;

    if markets.is_empty() {
        println!("No eligible markets found. Markets open on 15-minute boundaries.");
        return Ok(());
    }

    println!("----------------------------------------------------------------------");
    for market in markets {
        println!("  {} [{}]", market.slug, market.time_remaining_str());
        println!("    condition: {}", market.condition_id);
        println!("    UP token:   {}", market.up_token_id);
        println!("    DOWN token: {}", market.down_token_id);
    }
    println!("----------------------------------------------------------------------");

    Ok(())
}

/// Run the engine and the control surface.
async fn cmd_run(
    dry_run_override: Option<bool>,
    port_override: Option<u16>,
    auto_start: bool,
) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {e}"));
    }

    info!("Configuration loaded");
    info!(
        "Mode: {}",
        if config.dry_run { "SIMULATION" } else { "LIVE TRADING" }
    );
    info!("Target pair cost: ${}", config.target_pair_cost);
    info!("Order size: {} shares", config.order_size);
    info!("Symbols: {}", config.symbols);

    // Metrics: descriptions plus the Prometheus exporter (default listener).
    metrics::init_metrics();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        warn!(error = %e, "Prometheus exporter not installed, continuing without it");
    }

    // Restore persisted histories.
    let persisted = match storage::load_state(&config.state_file) {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "Could not load persisted state, starting fresh");
            None
        }
    };

    // Exchange client and market feed share the pooled HTTP client.
    let client = Arc::new(ClobClient::new(&config));
    let feed = MarketFeed::new(
        client.http().clone(),
        config.gamma_url.clone(),
        config.symbol_list(),
    );

    let ctx = EngineContext::new(&config, client, persisted);

    // Control surface.
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Control surface listening on {}", addr);

    let router = create_router(AppState::new(ctx.clone()));
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    // Scan loop.
    let engine = Engine::new(ctx.clone(), feed);
    let engine_handle = tokio::spawn(engine.run());

    if auto_start {
        ctx.start().await;
        info!("Auto-started trading");
    } else {
        info!("Waiting for POST /api/v1/bot/start");
    }

    // Run until a shutdown signal lands, then stop cleanly and persist.
    shutdown_signal().await;
    ctx.stop().await;
    ctx.persist().await;
    engine_handle.abort();
    let _ = server.await;

    info!("Engine shut down");
    Ok(())
}
