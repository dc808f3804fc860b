//! Botgate - Dual-Level Request Limiting for Bot API Traffic
//!
//! This crate implements the two sidecar services that enforce per-second
//! rate limits and subscription-period quotas for bot-style API traffic
//! routed through Envoy: an ext_authz authorizer that makes atomic
//! allow/deny decisions, and an ext_proc usage adjuster that refunds quota
//! for non-billable responses. All durable state lives in a shared Redis
//! store; atomicity is delegated to server-side scripts.

pub mod auth;
pub mod config;
pub mod error;
pub mod grpc;
pub mod store;
pub mod usage;
