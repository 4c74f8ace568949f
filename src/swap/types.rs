//! Swap routing data types

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::constants;
use crate::error::AppError;
use crate::swap::errors::{ProviderError, SwapError};
use crate::swap::traits::TransactionSigner;

/// Basis points in 100%
pub const BPS_DENOMINATOR: u32 = 10_000;

// =============================================================================
// Retry policy
// =============================================================================

/// How the router adapts amount and slippage between attempts.
///
/// Immutable once the router is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "constants::swap_initial_deduction_bps")]
    pub initial_deduction_bps: u32,
    #[serde(default = "constants::swap_max_deduction_bps")]
    pub max_deduction_bps: u32,
    #[serde(default = "constants::swap_deduction_step_bps")]
    pub deduction_step_bps: u32,
    #[serde(default = "constants::swap_initial_slippage_bps")]
    pub initial_slippage_bps: u32,
    #[serde(default = "constants::swap_max_slippage_bps")]
    pub max_slippage_bps: u32,
    #[serde(default = "constants::swap_inter_attempt_delay_ms")]
    pub inter_attempt_delay_ms: u64,
    #[serde(default = "constants::swap_max_transient_retries")]
    pub max_transient_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_deduction_bps: constants::swap_initial_deduction_bps(),
            max_deduction_bps: constants::swap_max_deduction_bps(),
            deduction_step_bps: constants::swap_deduction_step_bps(),
            initial_slippage_bps: constants::swap_initial_slippage_bps(),
            max_slippage_bps: constants::swap_max_slippage_bps(),
            inter_attempt_delay_ms: constants::swap_inter_attempt_delay_ms(),
            max_transient_retries: constants::swap_max_transient_retries(),
        }
    }
}

impl RetryPolicy {
    pub fn inter_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.inter_attempt_delay_ms)
    }

    /// Liquidity attempts one provider gets before the router moves on
    pub fn liquidity_attempts(&self) -> u32 {
        if self.deduction_step_bps == 0 || self.initial_deduction_bps > self.max_deduction_bps {
            return 0;
        }
        (self.max_deduction_bps - self.initial_deduction_bps) / self.deduction_step_bps + 1
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.deduction_step_bps == 0 {
            return Err(AppError::Config(
                "swap.policy.deduction_step_bps must be > 0".to_string(),
            ));
        }
        if self.initial_deduction_bps > self.max_deduction_bps {
            return Err(AppError::Config(format!(
                "swap.policy: initial_deduction_bps ({}) must be <= max_deduction_bps ({})",
                self.initial_deduction_bps, self.max_deduction_bps
            )));
        }
        if self.max_deduction_bps >= BPS_DENOMINATOR {
            return Err(AppError::Config(format!(
                "swap.policy.max_deduction_bps must be < {} (got {})",
                BPS_DENOMINATOR, self.max_deduction_bps
            )));
        }
        if self.initial_slippage_bps > self.max_slippage_bps {
            return Err(AppError::Config(format!(
                "swap.policy: initial_slippage_bps ({}) must be <= max_slippage_bps ({})",
                self.initial_slippage_bps, self.max_slippage_bps
            )));
        }
        if self.max_slippage_bps > BPS_DENOMINATOR {
            return Err(AppError::Config(format!(
                "swap.policy.max_slippage_bps must be <= {} (got {})",
                BPS_DENOMINATOR, self.max_slippage_bps
            )));
        }
        Ok(())
    }
}

/// `amount * (1 - deduction_bps / 10000)`, rounded down
pub fn apply_deduction(amount: u64, deduction_bps: u32) -> u64 {
    let keep = BPS_DENOMINATOR.saturating_sub(deduction_bps) as u128;
    (amount as u128 * keep / BPS_DENOMINATOR as u128) as u64
}

/// Next slippage after a slippage failure: x1.5 rounded up, at least +1, capped
pub fn escalate_slippage(current_bps: u32, cap_bps: u32) -> u32 {
    let raised = (current_bps as u64 * 3).div_ceil(2) as u32;
    raised.max(current_bps + 1).min(cap_bps)
}

// =============================================================================
// Requests and results
// =============================================================================

/// One logical swap as asked for by the caller
#[derive(Clone)]
pub struct SwapRequest {
    pub source: String,
    pub dest: String,
    pub amount: u64,
    /// Caller's slippage ceiling; the policy ceiling also applies
    pub max_slippage_bps: u32,
    pub signer: Arc<dyn TransactionSigner>,
}

impl fmt::Debug for SwapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapRequest")
            .field("source", &self.source)
            .field("dest", &self.dest)
            .field("amount", &self.amount)
            .field("max_slippage_bps", &self.max_slippage_bps)
            .field("signer", &self.signer.public_key())
            .finish()
    }
}

impl SwapRequest {
    pub fn validate(&self) -> Result<(), SwapError> {
        if self.source.is_empty() || self.dest.is_empty() {
            return Err(SwapError::InvalidRequest("source and dest are required".to_string()));
        }
        if self.source == self.dest {
            return Err(SwapError::InvalidRequest(format!(
                "source and dest are the same asset ({})",
                self.source
            )));
        }
        if self.amount == 0 {
            return Err(SwapError::InvalidRequest("amount must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Parameters of a single provider attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOrder {
    pub source: String,
    pub dest: String,
    pub amount: u64,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Confirmed { signature: String },
    Failed(ProviderError),
    /// Finished after cancellation; result not acted upon
    Discarded(Box<AttemptOutcome>),
}

/// Record of one provider try
#[derive(Debug, Clone, PartialEq)]
pub struct SwapAttempt {
    pub provider: String,
    pub requested_amount: u64,
    pub applied_amount: u64,
    pub deduction_bps: u32,
    pub slippage_bps: u32,
    pub outcome: AttemptOutcome,
}

impl SwapAttempt {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed(_))
    }
}

/// A swap observed as confirmed on chain
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedSwap {
    pub provider: String,
    pub signature: String,
    pub applied_amount: u64,
    pub deduction_bps: u32,
    pub slippage_bps: u32,
    pub slot: Option<u64>,
    pub confirmed_at: DateTime<Utc>,
}

/// Result plus the attempt log of one `SwapRouter::swap` call
#[derive(Debug, Clone)]
pub struct SwapReport {
    pub swap_id: Uuid,
    pub outcome: Result<ConfirmedSwap, SwapError>,
    pub attempts: Vec<SwapAttempt>,
}

impl SwapReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Attempts made against `provider`
    pub fn attempts_for(&self, provider: &str) -> usize {
        self.attempts.iter().filter(|a| a.provider == provider).count()
    }
}

// =============================================================================
// Quotes and chain data
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quote {
    Route {
        expected_output: u64,
        price_impact_bps: u32,
    },
    NoRoute,
}

/// Final on-chain status of a submitted transaction
#[derive(Debug, Clone, PartialEq)]
pub enum ChainStatus {
    Confirmed { slot: Option<u64> },
    /// Landed but failed; `error` is the chain's error object
    Failed { error: serde_json::Value },
}

pub const STANDARD_TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const EXTENDED_TOKEN_PROGRAM: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Token program owning an asset's mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenProgramKind {
    Standard,
    Extended,
}

impl TokenProgramKind {
    pub fn from_program_id(program_id: &str) -> Option<Self> {
        match program_id {
            STANDARD_TOKEN_PROGRAM => Some(Self::Standard),
            EXTENDED_TOKEN_PROGRAM => Some(Self::Extended),
            _ => None,
        }
    }

    pub fn program_id(&self) -> &'static str {
        match self {
            Self::Standard => STANDARD_TOKEN_PROGRAM,
            Self::Extended => EXTENDED_TOKEN_PROGRAM,
        }
    }
}

impl fmt::Display for TokenProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Extended => write!(f, "extended"),
        }
    }
}
