//! Application-wide constants and configuration defaults
//!
//! Every default used by the YAML config lives here. Values can be overridden
//! via environment variables.

use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// RPC Connection
// =============================================================================

/// Per-attempt request timeout in milliseconds (default: 15000ms)
///
/// Environment variable: `RPC_REQUEST_TIMEOUT_MS`
pub fn rpc_request_timeout_ms() -> u64 {
    env_or("RPC_REQUEST_TIMEOUT_MS", 15_000)
}

/// Re-sends of a timed-out request before giving up (default: 3)
///
/// Environment variable: `RPC_MAX_RETRIES`
pub fn rpc_max_retries() -> u32 {
    env_or("RPC_MAX_RETRIES", 3)
}

/// Commitment level for subscriptions and status queries (default: confirmed)
///
/// Environment variable: `RPC_COMMITMENT`
pub fn rpc_commitment() -> String {
    env_or("RPC_COMMITMENT", "confirmed".to_string())
}

/// Health check interval in seconds (default: 30)
///
/// Environment variable: `HEALTH_CHECK_INTERVAL_SECS`
pub fn health_check_interval_secs() -> u64 {
    env_or("HEALTH_CHECK_INTERVAL_SECS", 30)
}

/// Timeout of a single health probe in milliseconds (default: 5000ms)
///
/// Environment variable: `HEALTH_CHECK_TIMEOUT_MS`
pub fn health_check_timeout_ms() -> u64 {
    env_or("HEALTH_CHECK_TIMEOUT_MS", 5_000)
}

/// Consecutive failed probes that force a reconnect (default: 2)
///
/// Environment variable: `HEALTH_FAILURE_THRESHOLD`
pub fn health_failure_threshold() -> u32 {
    env_or("HEALTH_FAILURE_THRESHOLD", 2)
}

/// Delay before the first reconnect attempt (default: 1000ms)
///
/// Environment variable: `RECONNECT_BASE_DELAY_MS`
pub fn reconnect_base_delay_ms() -> u64 {
    env_or("RECONNECT_BASE_DELAY_MS", 1_000)
}

/// Ceiling of the reconnect delay (default: 60000ms)
///
/// Environment variable: `RECONNECT_MAX_DELAY_MS`
pub fn reconnect_max_delay_ms() -> u64 {
    env_or("RECONNECT_MAX_DELAY_MS", 60_000)
}

/// Upper bound of random reconnect jitter (default: 200ms)
///
/// Environment variable: `RECONNECT_JITTER_MS`
pub fn reconnect_jitter_ms() -> u64 {
    env_or("RECONNECT_JITTER_MS", 200)
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Maximum physical subscriptions per connection (default: 200)
///
/// Environment variable: `MAX_SUBSCRIPTIONS`
pub fn max_subscriptions() -> usize {
    env_or("MAX_SUBSCRIPTIONS", 200)
}

/// Idle age after which an abandoned subscription is removed (default: 30 min)
///
/// Environment variable: `SUBSCRIPTION_IDLE_TTL_SECS`
pub fn subscription_idle_ttl_secs() -> u64 {
    env_or("SUBSCRIPTION_IDLE_TTL_SECS", 1_800)
}

/// Idle cleanup interval (default: 15 min)
///
/// Environment variable: `SUBSCRIPTION_CLEANUP_INTERVAL_SECS`
pub fn subscription_cleanup_interval_secs() -> u64 {
    env_or("SUBSCRIPTION_CLEANUP_INTERVAL_SECS", 900)
}

/// Default wait for a subscription acknowledgement (default: 10000ms)
///
/// Environment variable: `SUBSCRIPTION_CONFIRM_TIMEOUT_MS`
pub fn subscription_confirm_timeout_ms() -> u64 {
    env_or("SUBSCRIPTION_CONFIRM_TIMEOUT_MS", 10_000)
}

/// Interval between `getSignatureStatuses` polls while a swap awaits
/// confirmation (default: 2000ms)
///
/// Environment variable: `SIGNATURE_POLL_INTERVAL_MS`
pub fn signature_poll_interval_ms() -> u64 {
    env_or("SIGNATURE_POLL_INTERVAL_MS", 2_000)
}

// =============================================================================
// Swap Routing
// =============================================================================

/// Amount deduction applied on the first attempt, in bps (default: 0)
///
/// Environment variable: `SWAP_INITIAL_DEDUCTION_BPS`
pub fn swap_initial_deduction_bps() -> u32 {
    env_or("SWAP_INITIAL_DEDUCTION_BPS", 0)
}

/// Largest amount deduction ever attempted, in bps (default: 500)
///
/// Environment variable: `SWAP_MAX_DEDUCTION_BPS`
pub fn swap_max_deduction_bps() -> u32 {
    env_or("SWAP_MAX_DEDUCTION_BPS", 500)
}

/// Deduction increase after a liquidity failure, in bps (default: 100)
///
/// Environment variable: `SWAP_DEDUCTION_STEP_BPS`
pub fn swap_deduction_step_bps() -> u32 {
    env_or("SWAP_DEDUCTION_STEP_BPS", 100)
}

/// Slippage tolerance of the first attempt, in bps (default: 50)
///
/// Environment variable: `SWAP_INITIAL_SLIPPAGE_BPS`
pub fn swap_initial_slippage_bps() -> u32 {
    env_or("SWAP_INITIAL_SLIPPAGE_BPS", 50)
}

/// Slippage tolerance ceiling, in bps (default: 300)
///
/// Environment variable: `SWAP_MAX_SLIPPAGE_BPS`
pub fn swap_max_slippage_bps() -> u32 {
    env_or("SWAP_MAX_SLIPPAGE_BPS", 300)
}

/// Pause between consecutive swap attempts (default: 500ms)
///
/// Environment variable: `SWAP_INTER_ATTEMPT_DELAY_MS`
pub fn swap_inter_attempt_delay_ms() -> u64 {
    env_or("SWAP_INTER_ATTEMPT_DELAY_MS", 500)
}

/// Same-parameter retries after a transient provider failure (default: 2)
///
/// Environment variable: `SWAP_MAX_TRANSIENT_RETRIES`
pub fn swap_max_transient_retries() -> u32 {
    env_or("SWAP_MAX_TRANSIENT_RETRIES", 2)
}

/// Wait for on-chain confirmation of a submitted swap (default: 60s)
///
/// Environment variable: `SWAP_CONFIRMATION_TIMEOUT_SECS`
pub fn swap_confirmation_timeout_secs() -> u64 {
    env_or("SWAP_CONFIRMATION_TIMEOUT_SECS", 60)
}

/// HTTP timeout for provider quote/swap calls (default: 10000ms)
///
/// Environment variable: `PROVIDER_HTTP_TIMEOUT_MS`
pub fn provider_http_timeout() -> Duration {
    Duration::from_millis(env_or("PROVIDER_HTTP_TIMEOUT_MS", 10_000))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Print all configuration defaults (for startup logs)
pub fn log_configuration() {
    tracing::info!("=== Configuration Defaults ===");
    tracing::info!("RPC:");
    tracing::info!("  - Request timeout: {}ms", rpc_request_timeout_ms());
    tracing::info!("  - Max retries: {}", rpc_max_retries());
    tracing::info!("  - Commitment: {}", rpc_commitment());
    tracing::info!("  - Health interval: {}s", health_check_interval_secs());
    tracing::info!("  - Health failure threshold: {}", health_failure_threshold());
    tracing::info!(
        "  - Reconnect: base {}ms, max {}ms, jitter {}ms",
        reconnect_base_delay_ms(),
        reconnect_max_delay_ms(),
        reconnect_jitter_ms()
    );

    tracing::info!("Subscriptions:");
    tracing::info!("  - Max subscriptions: {}", max_subscriptions());
    tracing::info!("  - Idle TTL: {}s", subscription_idle_ttl_secs());
    tracing::info!("  - Cleanup interval: {}s", subscription_cleanup_interval_secs());
    tracing::info!("  - Confirm timeout: {}ms", subscription_confirm_timeout_ms());

    tracing::info!("Swap:");
    tracing::info!(
        "  - Deduction: {}..{} bps step {}",
        swap_initial_deduction_bps(),
        swap_max_deduction_bps(),
        swap_deduction_step_bps()
    );
    tracing::info!(
        "  - Slippage: {}..{} bps",
        swap_initial_slippage_bps(),
        swap_max_slippage_bps()
    );
    tracing::info!("  - Inter-attempt delay: {}ms", swap_inter_attempt_delay_ms());
    tracing::info!("  - Confirmation timeout: {}s", swap_confirmation_timeout_secs());
    tracing::info!("  - Signature status poll: {}ms", signature_poll_interval_ms());
    tracing::info!("  - Provider HTTP timeout: {:?}", provider_http_timeout());
    tracing::info!("==============================");
}
