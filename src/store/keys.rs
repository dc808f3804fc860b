//! Key layout for per-tenant limit state.
//!
//! Four key families per tenant. The limit keys are operator-provisioned and
//! persistent; `counter` carries a 1 s TTL so stale windows expire without a
//! reaper, and `usage` lives for the subscription period.

/// Maximum units per 1-second window. Operator-provisioned.
pub fn rate_limit(tenant: u64) -> String {
    format!("rate_limit:{tenant}")
}

/// Units consumed in the given unix second. TTL = 1 s.
pub fn counter(tenant: u64, second: u64) -> String {
    format!("counter:{tenant}:{second}")
}

/// Units consumed this subscription period. No implicit TTL.
pub fn usage(tenant: u64) -> String {
    format!("usage:{tenant}")
}

/// Maximum units per subscription period. Operator-provisioned.
pub fn quota(tenant: u64) -> String {
    format!("quota:{tenant}")
}
