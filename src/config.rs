//! Configuration management for the Botgate services.
//!
//! Everything comes from the environment, with CLI overrides applied by the
//! binaries. Precedence: CLI flag, then environment variable, then default.

use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::{BotgateError, Result};

/// Default listen address for the authorizer.
pub const DEFAULT_AUTHORIZER_ADDR: &str = ":9001";

/// Default listen address for the usage adjuster.
pub const DEFAULT_ADJUSTER_ADDR: &str = ":9002";

const DEFAULT_REDIS_ADDR: &str = "localhost:6379";

/// Store deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisMode {
    Standalone,
    Cluster,
}

impl FromStr for RedisMode {
    type Err = BotgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standalone" => Ok(RedisMode::Standalone),
            "cluster" => Ok(RedisMode::Cluster),
            other => Err(BotgateError::Config(format!(
                "unknown REDIS_MODE: {other} (expected standalone or cluster)"
            ))),
        }
    }
}

/// Connection settings for the key-value store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Deployment mode (`REDIS_MODE`)
    pub mode: RedisMode,
    /// Single-node address (`REDIS_ADDR`)
    pub addr: String,
    /// Cluster node addresses (`REDIS_CLUSTER_ADDRS`), consulted only in
    /// cluster mode
    pub cluster_addrs: Vec<String>,
    /// Optional secret (`REDIS_PASSWORD`)
    pub password: Option<String>,
}

impl RedisConfig {
    /// Read the store configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let mode = match std::env::var("REDIS_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => RedisMode::Standalone,
        };

        let config = Self {
            mode,
            addr: env_or("REDIS_ADDR", DEFAULT_REDIS_ADDR),
            cluster_addrs: std::env::var("REDIS_CLUSTER_ADDRS")
                .map(|raw| split_addrs(&raw))
                .unwrap_or_default(),
            password: std::env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
        };

        if config.mode == RedisMode::Cluster && config.cluster_addrs.is_empty() {
            return Err(BotgateError::Config(
                "REDIS_MODE=cluster requires REDIS_CLUSTER_ADDRS".to_string(),
            ));
        }

        Ok(config)
    }

    /// Connection URL for standalone mode.
    pub fn standalone_url(&self) -> String {
        redis_url(&self.addr, self.password.as_deref())
    }

    /// Connection URLs for cluster mode. The password travels out of band via
    /// the cluster client builder.
    pub fn cluster_urls(&self) -> Vec<String> {
        self.cluster_addrs.iter().map(|addr| redis_url(addr, None)).collect()
    }
}

/// Resolve the gRPC listen address: CLI override, then `GRPC_PORT`, then the
/// service default.
pub fn resolve_listen_addr(cli_override: Option<&str>, default: &str) -> Result<SocketAddr> {
    let raw = match cli_override {
        Some(addr) => addr.to_string(),
        None => env_or("GRPC_PORT", default),
    };
    parse_listen_addr(&raw)
}

/// Parse a listen address, accepting the `:port` shorthand for all interfaces.
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr> {
    let candidate = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };

    candidate
        .parse()
        .map_err(|_| BotgateError::Config(format!("invalid listen address: {raw}")))
}

fn redis_url(addr: &str, password: Option<&str>) -> String {
    match password {
        Some(password) => format!("redis://:{password}@{addr}"),
        None => format!("redis://{addr}"),
    }
}

fn split_addrs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .collect()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}
