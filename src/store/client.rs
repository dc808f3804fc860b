//! Redis-backed store client.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::{FromRedisValue, ScriptInvocation};
use tracing::debug;

use crate::config::{RedisConfig, RedisMode};
use crate::error::{BotgateError, Result};

use super::{keys, scripts, AuthorizeOutcome, DecisionReason, LimitStore, RefundOutcome};

/// Shared connection handle; clones are cheap and safe to use concurrently.
#[derive(Clone)]
enum Connection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

/// Store client executing the limit scripts against Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: Connection,
}

impl RedisStore {
    /// Connect per configuration and verify liveness with a PING.
    ///
    /// An unreachable store at startup is fatal; callers are expected to exit.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let conn = match config.mode {
            RedisMode::Standalone => {
                let client = redis::Client::open(config.standalone_url())?;
                Connection::Standalone(ConnectionManager::new(client).await?)
            }
            RedisMode::Cluster => {
                let mut builder = ClusterClientBuilder::new(config.cluster_urls());
                if let Some(password) = &config.password {
                    builder = builder.password(password.clone());
                }
                let client = builder.build()?;
                Connection::Cluster(client.get_async_connection().await?)
            }
        };

        let store = Self { conn };
        store.ping().await?;
        Ok(store)
    }

    async fn ping(&self) -> Result<()> {
        let cmd = redis::cmd("PING");
        match self.conn.clone() {
            Connection::Standalone(mut conn) => cmd.query_async::<()>(&mut conn).await?,
            Connection::Cluster(mut conn) => cmd.query_async::<()>(&mut conn).await?,
        }
        Ok(())
    }

    async fn eval<T: FromRedisValue>(&self, invocation: &ScriptInvocation<'_>) -> Result<T> {
        let reply = match self.conn.clone() {
            Connection::Standalone(mut conn) => invocation.invoke_async(&mut conn).await?,
            Connection::Cluster(mut conn) => invocation.invoke_async(&mut conn).await?,
        };
        Ok(reply)
    }
}

#[async_trait]
impl LimitStore for RedisStore {
    async fn authorize(&self, tenant: u64, second: u64, cost: i64) -> Result<AuthorizeOutcome> {
        let mut invocation = scripts::AUTHORIZE.prepare_invoke();
        invocation
            .key(keys::rate_limit(tenant))
            .key(keys::counter(tenant, second))
            .key(keys::usage(tenant))
            .key(keys::quota(tenant))
            .arg(cost);

        let (allowed, reason, usage, quota, counter, rate_limit): (i64, String, i64, i64, i64, i64) =
            self.eval(&invocation).await?;

        let reason = DecisionReason::from_wire(&reason)
            .ok_or_else(|| BotgateError::ScriptReply(reason))?;

        debug!(
            tenant,
            allowed,
            reason = reason.as_str(),
            usage,
            counter,
            "Authorization script settled"
        );

        Ok(AuthorizeOutcome {
            allowed: allowed == 1,
            reason,
            usage,
            quota,
            counter,
            rate_limit,
        })
    }

    async fn refund(&self, tenant: u64, cost: i64) -> Result<RefundOutcome> {
        let mut invocation = scripts::REFUND.prepare_invoke();
        invocation.key(keys::usage(tenant)).arg(cost);

        let (refunded, usage): (i64, i64) = self.eval(&invocation).await?;

        debug!(tenant, refunded, usage, "Refund script settled");

        Ok(RefundOutcome {
            refunded: refunded == 1,
            usage,
        })
    }
}
