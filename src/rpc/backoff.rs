//! Reconnection with exponential backoff
//!
//! Delay for attempt `n` is `base_delay_ms * 1.5^n`, capped at `max_delay_ms`,
//! plus random jitter to prevent thundering herd when many clients reconnect at
//! once. Retries never give up; only the cancellation token ends the loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::constants;
use crate::rpc::errors::{RpcError, RpcResult};

/// Growth factor between consecutive reconnect delays
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Configuration for reconnection attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry in milliseconds
    #[serde(default = "constants::reconnect_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    #[serde(default = "constants::reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of random jitter added per attempt (0 disables)
    #[serde(default = "constants::reconnect_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: constants::reconnect_base_delay_ms(),
            max_delay_ms: constants::reconnect_max_delay_ms(),
            jitter_ms: constants::reconnect_jitter_ms(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.powi(attempt.min(64) as i32);
        let ms = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Delay before attempt `attempt` including jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::random::<u64>() % self.jitter_ms
        } else {
            0
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

/// Reconnect until success or cancellation
///
/// `connect_fn` receives the attempt number (0-based) it is running as.
///
/// # Returns
/// * `Ok(attempts)` - Connected after `attempts` failed tries
/// * `Err(RpcError::Shutdown)` - `cancel` fired first
pub async fn reconnect_with_backoff<F, Fut>(
    config: &ReconnectConfig,
    endpoint: &str,
    cancel: &CancellationToken,
    mut connect_fn: F,
) -> RpcResult<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = RpcResult<()>>,
{
    let mut attempt: u32 = 0;

    loop {
        let backoff = config.delay(attempt);

        tracing::info!(
            endpoint = %endpoint,
            attempt = attempt + 1,
            backoff_ms = backoff.as_millis() as u64,
            "Reconnect scheduled"
        );

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancel.cancelled() => return Err(RpcError::Shutdown),
        }

        match connect_fn(attempt).await {
            Ok(()) => return Ok(attempt),
            Err(e) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    attempt = attempt + 1,
                    error = %e,
                    "Reconnect attempt failed"
                );
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
