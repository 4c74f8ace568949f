//! Seams between the router and the outside world
//!
//! `ProviderAdapter` is implemented once per liquidity source. Signing,
//! submission and confirmation are opaque capabilities so the router never
//! touches transaction bytes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::rpc::RpcResult;
use crate::swap::errors::{ProviderError, ProviderResult, SigningError};
use crate::swap::types::{ChainStatus, Quote, SwapOrder};

/// Uniform quote/swap contract for one liquidity provider
///
/// Adapters map every provider-specific failure to an `ErrorClass`; the
/// router decides what to do with it.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable name used in logs and attempt records
    fn name(&self) -> &str;

    /// Expected output for `amount` of `source`, or `Quote::NoRoute`
    async fn quote(&self, source: &str, dest: &str, amount: u64) -> ProviderResult<Quote>;

    /// Build, sign and submit one swap. Returns the transaction signature;
    /// confirmation is the caller's job.
    async fn swap(&self, order: &SwapOrder, signer: &dyn TransactionSigner) -> ProviderResult<String>;

    /// Map the error object of a landed-but-failed transaction
    fn classify_chain_error(&self, error: &Value) -> ProviderError;
}

/// Holds the key; never exposes it
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn public_key(&self) -> &str;

    /// Sign a serialized unsigned transaction
    async fn sign(&self, unsigned: &[u8]) -> Result<Vec<u8>, SigningError>;
}

#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Broadcast a signed transaction, returning its signature
    async fn submit(&self, signed: &[u8]) -> RpcResult<String>;
}

#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    /// Wait for the final status of `signature`.
    ///
    /// Fails with `RpcError::ConfirmationTimeout` when `timeout` passes first.
    async fn confirm(&self, signature: &str, timeout: Duration) -> RpcResult<ChainStatus>;
}
