use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn, Level};

use botgate::config::{self, RedisConfig, DEFAULT_ADJUSTER_ADDR};
use botgate::grpc::{shutdown_signal, AdjusterServer};
use botgate::store::RedisStore;
use botgate::usage::{AdjusterService, CorrelationTable};

/// Upper bound on how long a correlation entry may outlive its request.
const CORRELATION_MAX_AGE: Duration = Duration::from_secs(60);

/// Botgate Usage Adjuster - ext_proc usage reconciliation for Envoy
#[derive(Parser, Debug)]
#[command(name = "botgate-adjuster")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// gRPC server address (overrides GRPC_PORT)
    #[arg(short = 'a', long = "addr")]
    addr: Option<String>,

    /// Store address (overrides REDIS_ADDR)
    #[arg(long = "redis-addr")]
    redis_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Botgate Usage Adjuster");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration with CLI overrides
    let mut redis_config = RedisConfig::from_env()?;
    if let Some(redis_addr) = args.redis_addr {
        redis_config.addr = redis_addr;
    }
    let addr = config::resolve_listen_addr(args.addr.as_deref(), DEFAULT_ADJUSTER_ADDR)?;

    info!(grpc_addr = %addr, redis_addr = %redis_config.addr, "Configuration loaded");

    // An unreachable store at startup is fatal.
    let store = RedisStore::connect(&redis_config).await?;
    info!("Connected to store");

    let correlations = Arc::new(CorrelationTable::new());

    // Response-headers normally evicts every entry; the sweeper bounds memory
    // when the proxy abandons streams mid-request.
    let sweeper = correlations.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CORRELATION_MAX_AGE);
        loop {
            ticker.tick().await;
            let evicted = sweeper.evict_expired(CORRELATION_MAX_AGE);
            if evicted > 0 {
                warn!(evicted, "Evicted stale correlation entries");
            }
        }
    });

    let service = AdjusterService::new(Arc::new(store), correlations);
    let server = AdjusterServer::new(addr, service);

    info!("Starting gRPC server on {}", addr);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Botgate Usage Adjuster stopped");
    Ok(())
}
