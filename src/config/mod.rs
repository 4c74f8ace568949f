//! Configuration module
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `RpcConfig`, `SubscriptionConfig`, `SwapConfig`)
//! - YAML loading functionality (`load_config`)
//! - Defaults with environment variable overrides (`constants`)

pub mod constants;
mod loader;
mod types;

// Re-export types
pub use types::{
    AppConfig, ProviderConfig, ProviderKind, RpcConfig, SubscriptionConfig, SwapConfig,
};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};
