//! Which token program owns an asset's mint
//!
//! Resolved once per asset from the mint account's owner and cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::rpc::ConnectionManager;
use crate::swap::errors::{ProviderError, ProviderResult};
use crate::swap::types::TokenProgramKind;

#[async_trait]
pub trait TokenProgramResolver: Send + Sync {
    async fn resolve(&self, asset: &str) -> ProviderResult<TokenProgramKind>;
}

/// `getAccountInfo` on the mint, owner -> `TokenProgramKind`
pub struct RpcTokenProgramResolver {
    manager: Arc<ConnectionManager>,
    cache: Mutex<HashMap<String, TokenProgramKind>>,
}

impl RpcTokenProgramResolver {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, asset: &str) -> Option<TokenProgramKind> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(asset)
            .copied()
    }
}

#[async_trait]
impl TokenProgramResolver for RpcTokenProgramResolver {
    async fn resolve(&self, asset: &str) -> ProviderResult<TokenProgramKind> {
        if let Some(kind) = self.cached(asset) {
            return Ok(kind);
        }

        let result = self
            .manager
            .send("getAccountInfo", json!([asset, { "encoding": "base64" }]))
            .await
            .map_err(|e| ProviderError::from_rpc("token-program", &e))?;

        let kind = owner_of(&result)
            .ok_or_else(|| ProviderError::fatal("token-program", format!("{} is not a known mint", asset)))
            .and_then(|owner| {
                TokenProgramKind::from_program_id(owner).ok_or_else(|| {
                    ProviderError::fatal(
                        "token-program",
                        format!("{} is owned by {}, not a token program", asset, owner),
                    )
                })
            })?;

        tracing::debug!(asset = %asset, kind = %kind, "Token program resolved");
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(asset.to_string(), kind);
        Ok(kind)
    }
}

fn owner_of(account_info: &Value) -> Option<&str> {
    account_info.get("value")?.get("owner")?.as_str()
}
