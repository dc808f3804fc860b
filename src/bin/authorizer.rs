use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};

use botgate::auth::AuthorizerService;
use botgate::config::{self, RedisConfig, DEFAULT_AUTHORIZER_ADDR};
use botgate::grpc::{shutdown_signal, AuthorizerServer};
use botgate::store::RedisStore;

/// Botgate Authorizer - ext_authz rate limit decisions for Envoy
#[derive(Parser, Debug)]
#[command(name = "botgate-authorizer")]
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

    info!("Starting Botgate Authorizer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration with CLI overrides
    let mut redis_config = RedisConfig::from_env()?;
    if let Some(redis_addr) = args.redis_addr {
        redis_config.addr = redis_addr;
    }
    let addr = config::resolve_listen_addr(args.addr.as_deref(), DEFAULT_AUTHORIZER_ADDR)?;

    info!(grpc_addr = %addr, redis_addr = %redis_config.addr, "Configuration loaded");

    // An unreachable store at startup is fatal; serve nothing rather than
    // denying everything silently.
    let store = RedisStore::connect(&redis_config).await?;
    info!("Connected to store");

    let service = AuthorizerService::new(Arc::new(store));
    let server = AuthorizerServer::new(addr, service);

    info!("Starting gRPC server on {}", addr);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Botgate Authorizer stopped");
    Ok(())
}
