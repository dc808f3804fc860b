//! Response-phase usage adjustment engine for the ext_proc integration.

mod correlation;
mod service;

pub use correlation::{CorrelationEntry, CorrelationTable, LimitHeaders};
pub use service::AdjusterService;
