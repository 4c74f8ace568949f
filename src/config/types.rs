//! Configuration types loaded from YAML
//!
//! Unset fields fall back to `config::constants`, so a minimal file only needs
//! the node URL and the provider list.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::constants;
use crate::error::AppError;
use crate::rpc::ReconnectConfig;
use crate::swap::RetryPolicy;

// ============================================================================
// RPC
// ============================================================================

/// Connection to the remote RPC node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// WebSocket endpoint (ws:// or wss://)
    pub ws_url: String,
    /// Commitment level for subscriptions and status queries
    #[serde(default = "constants::rpc_commitment")]
    pub commitment: String,
    #[serde(default = "constants::rpc_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "constants::rpc_max_retries")]
    pub max_retries: u32,
    #[serde(default = "constants::health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "constants::health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    /// Consecutive failed probes before a forced reconnect
    #[serde(default = "constants::health_failure_threshold")]
    pub health_failure_threshold: u32,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl RpcConfig {
    /// Config for `ws_url` with every other field at its default
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            commitment: constants::rpc_commitment(),
            request_timeout_ms: constants::rpc_request_timeout_ms(),
            max_retries: constants::rpc_max_retries(),
            health_check_interval_secs: constants::health_check_interval_secs(),
            health_check_timeout_ms: constants::health_check_timeout_ms(),
            health_failure_threshold: constants::health_failure_threshold(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "rpc.ws_url must start with ws:// or wss:// (got '{}')",
                self.ws_url
            )));
        }

        if self.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "rpc.request_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.health_check_interval_secs == 0 {
            return Err(AppError::Config(
                "rpc.health_check_interval_secs must be > 0".to_string(),
            ));
        }

        if self.health_failure_threshold == 0 {
            return Err(AppError::Config(
                "rpc.health_failure_threshold must be >= 1".to_string(),
            ));
        }

        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(AppError::Config(format!(
                "rpc.reconnect: base_delay_ms ({}) must be <= max_delay_ms ({})",
                self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Subscription registry limits and timers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default = "constants::max_subscriptions")]
    pub max_subscriptions: usize,
    #[serde(default = "constants::subscription_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "constants::subscription_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "constants::subscription_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: constants::max_subscriptions(),
            idle_ttl_secs: constants::subscription_idle_ttl_secs(),
            cleanup_interval_secs: constants::subscription_cleanup_interval_secs(),
            confirm_timeout_ms: constants::subscription_confirm_timeout_ms(),
        }
    }
}

impl SubscriptionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

// ============================================================================
// Swap providers
// ============================================================================

/// Supported liquidity provider APIs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Route aggregator (quote + unsigned swap transaction)
    Aggregator,
    /// Direct AMM pool API
    Pool,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Aggregator => write!(f, "aggregator"),
            ProviderKind::Pool => write!(f, "pool"),
        }
    }
}

/// One liquidity provider, listed in priority order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique name used in logs and attempt records
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Falls back to the `<NAME>_API_KEY` environment variable
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    /// API key from the file, else from `<NAME>_API_KEY`
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            let var = format!("{}_API_KEY", self.name.to_uppercase().replace('-', "_"));
            std::env::var(var).ok().filter(|k| !k.is_empty())
        })
    }
}

/// Swap routing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    #[serde(default)]
    pub policy: RetryPolicy,
    #[serde(default = "constants::swap_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Providers in priority order
    pub providers: Vec<ProviderConfig>,
}

impl SwapConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.policy.validate()?;

        if self.providers.is_empty() {
            return Err(AppError::Config(
                "swap.providers must contain at least one provider".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(AppError::Config("Provider name cannot be empty".to_string()));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate provider name '{}'",
                    provider.name
                )));
            }
            if !(provider.base_url.starts_with("http://")
                || provider.base_url.starts_with("https://"))
            {
                return Err(AppError::Config(format!(
                    "Provider '{}': base_url must be http(s) (got '{}')",
                    provider.name, provider.base_url
                )));
            }
        }

        if self.confirmation_timeout_secs == 0 {
            return Err(AppError::Config(
                "swap.confirmation_timeout_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
    pub swap: SwapConfig,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        self.rpc.validate()?;

        if self.subscriptions.max_subscriptions == 0 {
            return Err(AppError::Config(
                "subscriptions.max_subscriptions must be > 0".to_string(),
            ));
        }

        if self.subscriptions.cleanup_interval_secs == 0 {
            return Err(AppError::Config(
                "subscriptions.cleanup_interval_secs must be > 0".to_string(),
            ));
        }

        self.swap.validate()?;

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
