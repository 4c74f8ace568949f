//! chain_relay
//!
//! - One multiplexed JSON-RPC WebSocket connection with request correlation,
//!   deduplicated subscriptions and transparent reconnect (`rpc`)
//! - Swap routing across liquidity providers with failure-driven retry and
//!   fallback (`swap`, `adapters`)

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod rpc;
pub mod swap;

pub use error::AppError;
