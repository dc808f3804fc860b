//! In-memory mirror of the store scripts for exercising the services in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{BotgateError, Result};

use super::{AuthorizeOutcome, DecisionReason, LimitStore, RefundOutcome};

/// In-process `LimitStore` with the same settled semantics as the Lua scripts.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    rate_limits: HashMap<u64, i64>,
    quotas: HashMap<u64, i64>,
    usage: HashMap<u64, i64>,
    counters: HashMap<(u64, u64), i64>,
    authorize_calls: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rate_limit(&self, tenant: u64, limit: i64) {
        self.state.lock().unwrap().rate_limits.insert(tenant, limit);
    }

    pub fn set_quota(&self, tenant: u64, quota: i64) {
        self.state.lock().unwrap().quotas.insert(tenant, quota);
    }

    pub fn set_usage(&self, tenant: u64, usage: i64) {
        self.state.lock().unwrap().usage.insert(tenant, usage);
    }

    pub fn usage(&self, tenant: u64) -> i64 {
        self.state.lock().unwrap().usage.get(&tenant).copied().unwrap_or(0)
    }

    pub fn counter(&self, tenant: u64, second: u64) -> i64 {
        self.state
            .lock()
            .unwrap()
            .counters
            .get(&(tenant, second))
            .copied()
            .unwrap_or(0)
    }

    pub fn authorize_calls(&self) -> u64 {
        self.state.lock().unwrap().authorize_calls
    }
}

fn deny(
    reason: DecisionReason,
    usage: i64,
    quota: i64,
    counter: i64,
    rate_limit: i64,
) -> AuthorizeOutcome {
    AuthorizeOutcome {
        allowed: false,
        reason,
        usage,
        quota,
        counter,
        rate_limit,
    }
}

#[async_trait]
impl LimitStore for MemoryStore {
    async fn authorize(&self, tenant: u64, second: u64, cost: i64) -> Result<AuthorizeOutcome> {
        let mut state = self.state.lock().unwrap();
        state.authorize_calls += 1;

        let Some(&rate_limit) = state.rate_limits.get(&tenant) else {
            return Ok(deny(DecisionReason::RateExceeded, 0, 0, 0, 0));
        };
        let Some(&quota) = state.quotas.get(&tenant) else {
            return Ok(deny(DecisionReason::QuotaExceeded, 0, 0, 0, rate_limit));
        };

        let counter = state.counters.get(&(tenant, second)).copied().unwrap_or(0);
        let usage = state.usage.get(&tenant).copied().unwrap_or(0);

        if counter + cost > rate_limit {
            return Ok(deny(DecisionReason::RateExceeded, usage, quota, counter, rate_limit));
        }

        let counter = counter + cost;
        state.counters.insert((tenant, second), counter);

        if usage + cost > quota {
            return Ok(deny(DecisionReason::QuotaExceeded, usage, quota, counter, rate_limit));
        }

        let usage = usage + cost;
        state.usage.insert(tenant, usage);

        Ok(AuthorizeOutcome {
            allowed: true,
            reason: DecisionReason::Success,
            usage,
            quota,
            counter,
            rate_limit,
        })
    }

    async fn refund(&self, tenant: u64, cost: i64) -> Result<RefundOutcome> {
        let mut state = self.state.lock().unwrap();

        match state.usage.get_mut(&tenant) {
            None => Ok(RefundOutcome {
                refunded: false,
                usage: 0,
            }),
            Some(usage) => {
                *usage = (*usage - cost).max(0);
                Ok(RefundOutcome {
                    refunded: true,
                    usage: *usage,
                })
            }
        }
    }
}

/// `LimitStore` whose every operation fails, for exercising degraded mode.
pub(crate) struct FailingStore;

#[async_trait]
impl LimitStore for FailingStore {
    async fn authorize(&self, _tenant: u64, _second: u64, _cost: i64) -> Result<AuthorizeOutcome> {
        Err(BotgateError::ScriptReply("injected store failure".to_string()))
    }

    async fn refund(&self, _tenant: u64, _cost: i64) -> Result<RefundOutcome> {
        Err(BotgateError::ScriptReply("injected store failure".to_string()))
    }
}
