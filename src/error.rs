//! Application-wide error types using thiserror
//!
//! Layer errors (`RpcError`, `ProviderError`, `SwapError`) convert into
//! `AppError` with `?` at the application boundary.

use thiserror::Error;

use crate::rpc::RpcError;
use crate::swap::{ProviderError, SwapError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Swap error: {0}")]
    Swap(#[from] SwapError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
