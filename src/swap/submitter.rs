//! `sendTransaction` over the shared RPC connection

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use crate::rpc::{ConnectionManager, RpcError, RpcResult};
use crate::swap::traits::TransactionSubmitter;

pub struct RpcSubmitter {
    manager: Arc<ConnectionManager>,
}

impl RpcSubmitter {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TransactionSubmitter for RpcSubmitter {
    async fn submit(&self, signed: &[u8]) -> RpcResult<String> {
        let params = json!([
            BASE64.encode(signed),
            {
                "encoding": "base64",
                "preflightCommitment": self.manager.config().commitment,
            }
        ]);
        let result = self.manager.send("sendTransaction", params).await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::InvalidResponse(format!("sendTransaction returned {}", result)))
    }
}
