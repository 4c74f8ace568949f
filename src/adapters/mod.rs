//! Liquidity provider adapters
//!
//! Each adapter implements `ProviderAdapter` for one provider API and owns
//! that provider's error vocabulary.

pub mod aggregator;
pub mod pool;
pub mod shared;

#[cfg(test)]
pub(crate) mod test_utils;

use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderKind};
use crate::swap::traits::{ProviderAdapter, TransactionSubmitter};

pub use aggregator::AggregatorAdapter;
pub use pool::PoolAdapter;
pub use shared::{ProviderHttp, RpcTokenProgramResolver, TokenProgramResolver};

/// Build adapters in configured (priority) order
pub fn build_providers(
    configs: &[ProviderConfig],
    submitter: Arc<dyn TransactionSubmitter>,
    token_programs: Arc<dyn TokenProgramResolver>,
) -> Vec<Arc<dyn ProviderAdapter>> {
    configs
        .iter()
        .map(|config| {
            let api_key = config.resolved_api_key();
            let adapter: Arc<dyn ProviderAdapter> = match config.kind {
                ProviderKind::Aggregator => Arc::new(AggregatorAdapter::new(
                    &config.name,
                    &config.base_url,
                    api_key,
                    submitter.clone(),
                )),
                ProviderKind::Pool => Arc::new(PoolAdapter::new(
                    &config.name,
                    &config.base_url,
                    api_key,
                    submitter.clone(),
                    token_programs.clone(),
                )),
            };
            tracing::info!(provider = %config.name, kind = %config.kind, "Provider registered");
            adapter
        })
        .collect()
}
