//! On-chain confirmation of submitted swaps
//!
//! `SignatureConfirmer` subscribes to `signature:<sig>` and also polls
//! `getSignatureStatuses`. The first poll runs once the subscription is
//! acknowledged, so a transaction that landed earlier is still seen. Later
//! polls cover notifications lost across a reconnect and registries at their
//! subscription cap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::constants;
use crate::rpc::{
    ConnectionManager, Registration, RpcError, RpcResult, SubscriptionEvent, SubscriptionKey,
    SubscriptionRegistry,
};
use crate::swap::traits::ConfirmationSource;
use crate::swap::types::ChainStatus;

pub struct SignatureConfirmer {
    manager: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    poll_interval: Duration,
}

impl SignatureConfirmer {
    pub fn new(manager: Arc<ConnectionManager>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            manager,
            registry,
            poll_interval: Duration::from_millis(constants::signature_poll_interval_ms()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// One-shot status lookup; `None` while not yet at the commitment level
    async fn lookup(&self, signature: &str) -> RpcResult<Option<ChainStatus>> {
        let result = self
            .manager
            .send(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": false }]),
            )
            .await?;
        Ok(parse_status_response(&result, &self.manager.config().commitment))
    }

    /// `None` when the registry is full; the caller then relies on polling
    async fn watch(
        &self,
        key: &SubscriptionKey,
        tx: mpsc::Sender<ChainStatus>,
    ) -> RpcResult<Option<Registration>> {
        let subscribed = self
            .registry
            .subscribe_fn(key.clone(), move |event: &SubscriptionEvent| {
                if let Some(status) = parse_signature_notification(&event.payload) {
                    // Full means a status is already queued
                    let _ = tx.try_send(status);
                }
                Ok(())
            })
            .await;

        match subscribed {
            Ok(registration) => Ok(Some(registration)),
            Err(RpcError::CapacityExceeded { limit }) => {
                tracing::warn!(key = %key, limit, "Subscription cap reached, polling signature status");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_for_status(
        &self,
        key: &SubscriptionKey,
        signature: &str,
        registration: Option<&Registration>,
        mut rx: mpsc::Receiver<ChainStatus>,
    ) -> RpcResult<ChainStatus> {
        if let Some(registration) = registration {
            let ack_timeout = self.registry.config().confirm_timeout();
            if let Err(e) = self.registry.wait_confirmed(registration, ack_timeout).await {
                tracing::debug!(key = %key, error = %e, "Signature subscription not acknowledged yet");
            }
        }

        let mut notifications_open = registration.is_some();
        loop {
            match self.lookup(signature).await {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => tracing::debug!(key = %key, error = %e, "Status lookup failed"),
            }

            tokio::select! {
                notified = rx.recv(), if notifications_open => match notified {
                    Some(status) => return Ok(status),
                    None => notifications_open = false,
                },
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[async_trait]
impl ConfirmationSource for SignatureConfirmer {
    async fn confirm(&self, signature: &str, timeout: Duration) -> RpcResult<ChainStatus> {
        let key = SubscriptionKey::signature(signature);
        let (tx, rx) = mpsc::channel::<ChainStatus>(1);
        let registration = self.watch(&key, tx).await?;

        let waited = tokio::time::timeout(
            timeout,
            self.wait_for_status(&key, signature, registration.as_ref(), rx),
        )
        .await;

        if let Some(registration) = &registration {
            self.registry.unsubscribe(registration.id()).await;
        }

        match waited {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConfirmationTimeout {
                key: key.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// `{"context":{"slot":n},"value":{"err":...}}` from a signature notification.
///
/// `"receivedSignature"` notices carry no final status and map to `None`.
pub fn parse_signature_notification(payload: &Value) -> Option<ChainStatus> {
    let value = payload.get("value")?;
    let err = value.as_object()?.get("err")?;
    if err.is_null() {
        let slot = payload.get("context").and_then(|c| c.get("slot")).and_then(Value::as_u64);
        Some(ChainStatus::Confirmed { slot })
    } else {
        Some(ChainStatus::Failed { error: err.clone() })
    }
}

fn commitment_rank(level: &str) -> u8 {
    match level {
        "processed" => 0,
        "confirmed" => 1,
        "finalized" => 2,
        _ => 1,
    }
}

/// First entry of a `getSignatureStatuses` result
pub fn parse_status_response(result: &Value, commitment: &str) -> Option<ChainStatus> {
    let status = result.get("value")?.get(0)?;
    if status.is_null() {
        return None;
    }

    if let Some(err) = status.get("err").filter(|e| !e.is_null()) {
        return Some(ChainStatus::Failed { error: err.clone() });
    }

    let reached = status
        .get("confirmationStatus")
        .and_then(Value::as_str)
        .map(commitment_rank)?;
    if reached < commitment_rank(commitment) {
        return None;
    }
    Some(ChainStatus::Confirmed {
        slot: status.get("slot").and_then(Value::as_u64),
    })
}
