//! Swap error taxonomy
//!
//! Every provider failure carries an `ErrorClass`; the router's next move
//! depends only on that class.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::rpc::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Not enough depth for the amount; retry smaller
    Liquidity,
    /// Price moved past tolerance; retry with wider slippage
    Slippage,
    /// Retrying cannot help; abort the whole swap
    Fatal,
    /// Timeouts, dropped connections, 5xx, 429
    Transient,
    /// Unknown failure; handled as fatal
    Unclassified,
}

impl ErrorClass {
    /// Stops the swap outright, no fallthrough
    pub fn aborts_swap(&self) -> bool {
        matches!(self, ErrorClass::Fatal | ErrorClass::Unclassified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Liquidity => "liquidity",
            ErrorClass::Slippage => "slippage",
            ErrorClass::Fatal => "fatal",
            ErrorClass::Transient => "transient",
            ErrorClass::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure from one provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{provider} ({class}): {message}")]
pub struct ProviderError {
    pub class: ErrorClass,
    pub provider: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(class: ErrorClass, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn liquidity(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Liquidity, provider, message)
    }

    pub fn slippage(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Slippage, provider, message)
    }

    pub fn fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, provider, message)
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, provider, message)
    }

    pub fn unclassified(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unclassified, provider, message)
    }

    /// Transport-level RPC failures are transient, anything else unclassified
    pub fn from_rpc(provider: impl Into<String>, err: &RpcError) -> Self {
        let class = if err.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Unclassified
        };
        Self::new(class, provider, err.to_string())
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Opaque signing failure from a `TransactionSigner`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Signing failed: {0}")]
pub struct SigningError(pub String);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwapError {
    #[error("Swap aborted: {0}")]
    Fatal(ProviderError),

    #[error("All providers exhausted: {}", summarize(.failures))]
    Exhausted { failures: Vec<ProviderError> },

    #[error("Swap cancelled")]
    Cancelled,

    #[error("No providers configured")]
    NoProviders,

    #[error("Invalid swap request: {0}")]
    InvalidRequest(String),
}

fn summarize(failures: &[ProviderError]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
