//! Store-side scripts.
//!
//! Scripts are loaded once per process; the client library invokes them by
//! digest and re-registers transparently if the store has not seen them yet.

use once_cell::sync::Lazy;
use redis::Script;

/// Checks both limits and reserves one unit of rate and quota when allowing.
pub static AUTHORIZE: Lazy<Script> = Lazy::new(|| Script::new(include_str!("authorize.lua")));

/// Returns one unit of reserved quota, bounded at zero.
pub static REFUND: Lazy<Script> = Lazy::new(|| Script::new(include_str!("refund.lua")));
