//! Swap routing across competing liquidity providers
//!
//! - `router`: provider ordering, retry and parameter adaptation
//! - `classify`: provider/chain error vocabularies -> `ErrorClass`
//! - `traits`: adapter, signer, submitter and confirmation seams
//! - `confirmation` / `submitter`: RPC-backed implementations

pub mod classify;
pub mod confirmation;
pub mod errors;
pub mod router;
pub mod submitter;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use classify::{classify_http_status, ErrorTable};
pub use confirmation::SignatureConfirmer;
pub use errors::{ErrorClass, ProviderError, ProviderResult, SigningError, SwapError};
pub use router::SwapRouter;
pub use submitter::RpcSubmitter;
pub use traits::{ConfirmationSource, ProviderAdapter, TransactionSigner, TransactionSubmitter};
pub use types::{
    AttemptOutcome, ChainStatus, ConfirmedSwap, Quote, RetryPolicy, SwapAttempt, SwapOrder,
    SwapReport, SwapRequest, TokenProgramKind,
};
