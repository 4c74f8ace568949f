//! Submitter and token-program doubles for adapter tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::adapters::shared::TokenProgramResolver;
use crate::rpc::{RpcError, RpcResult};
use crate::swap::errors::{ProviderError, ProviderResult};
use crate::swap::traits::TransactionSubmitter;
use crate::swap::types::TokenProgramKind;

/// Records submitted bytes and answers with a fixed result
pub struct RecordingSubmitter {
    result: RpcResult<String>,
    submitted: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSubmitter {
    pub fn ok(signature: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(signature.to_string()),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: RpcError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(error),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionSubmitter for RecordingSubmitter {
    async fn submit(&self, signed: &[u8]) -> RpcResult<String> {
        self.submitted.lock().unwrap().push(signed.to_vec());
        self.result.clone()
    }
}

pub struct FixedTokenPrograms(HashMap<String, TokenProgramKind>);

impl FixedTokenPrograms {
    pub fn new(entries: &[(&str, TokenProgramKind)]) -> Arc<Self> {
        Arc::new(Self(
            entries.iter().map(|(asset, kind)| (asset.to_string(), *kind)).collect(),
        ))
    }
}

#[async_trait]
impl TokenProgramResolver for FixedTokenPrograms {
    async fn resolve(&self, asset: &str) -> ProviderResult<TokenProgramKind> {
        self.0
            .get(asset)
            .copied()
            .ok_or_else(|| ProviderError::fatal("token-program", format!("{} is not a known mint", asset)))
    }
}
