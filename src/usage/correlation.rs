//! Correlation of request and response stream events.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Limit headers captured from the authorized request, mirrored onto the
/// response so clients observe them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitHeaders {
    pub quota_remaining: String,
    pub quota_limit: String,
    pub rate_limit: String,
}

/// State captured at request-headers time, consumed at response-headers time.
#[derive(Debug, Clone)]
pub struct CorrelationEntry {
    pub tenant: u64,
    pub headers: LimitHeaders,
    inserted_at: Instant,
}

/// Concurrency-safe mapping from correlation id (`x-request-id`) to captured
/// request state.
///
/// Entries live for one proxy processing window: inserted on request-headers,
/// removed on response-headers. Multiple streams insert and take in parallel.
#[derive(Default)]
pub struct CorrelationTable {
    entries: DashMap<String, CorrelationEntry>,
}

impl CorrelationTable {
    /// Create an empty correlation table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tenant and limit headers for an in-flight request.
    pub fn insert(&self, request_id: String, tenant: u64, headers: LimitHeaders) {
        self.entries.insert(
            request_id,
            CorrelationEntry {
                tenant,
                headers,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Look up and remove the entry for a correlation id.
    ///
    /// A miss is not an error: the request may predate this process, or the
    /// proxy may have sent a duplicate response-headers message.
    pub fn take(&self, request_id: &str) -> Option<CorrelationEntry> {
        self.entries.remove(request_id).map(|(_, entry)| entry)
    }

    /// Drop entries older than `max_age`; returns how many were evicted.
    ///
    /// Response-headers normally evicts every entry; this bounds memory when
    /// the proxy abandons a stream mid-request.
    pub fn evict_expired(&self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < max_age);
        before - self.entries.len()
    }

    /// Number of in-flight correlations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
