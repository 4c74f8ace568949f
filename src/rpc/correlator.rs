//! Request/response correlation over a fire-and-forget transport
//!
//! Every outbound request gets a fresh correlation id and a `PendingRequest`
//! entry. The entry is consumed exactly once: by its response, by its timeout
//! (a retry goes out under a new id), or by `fail_all` on connection teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::rpc::errors::{RpcError, RpcResult};
use crate::rpc::types::{JsonRpcRequest, JsonRpcResponse};

/// Something that can put a text frame on the wire
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn transmit(&self, frame: String) -> RpcResult<()>;
}

/// In-flight request awaiting its response
#[derive(Debug)]
pub struct PendingRequest {
    pub method: String,
    pub issued_at: Instant,
    pub retries_used: u32,
    result_tx: oneshot::Sender<RpcResult<Value>>,
}

/// Matches responses to requests by correlation id
#[derive(Debug)]
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    request_timeout: Duration,
    max_retries: u32,
}

/// Discards a pending entry if the waiting future is dropped early
struct PendingGuard<'a> {
    correlator: &'a RequestCorrelator,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.table().remove(&self.id);
    }
}

impl RequestCorrelator {
    pub fn new(request_timeout: Duration, max_retries: u32) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            request_timeout,
            max_retries,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send with the default timeout and retry budget
    pub async fn send<S>(&self, sink: &S, method: &str, params: Value) -> RpcResult<Value>
    where
        S: FrameSink + ?Sized,
    {
        self.send_with(sink, method, params, self.request_timeout, self.max_retries)
            .await
    }

    /// Send with an explicit timeout and retry budget
    ///
    /// A timed-out attempt is re-sent under a new id until `max_retries`
    /// retries are used; then `RpcError::RequestTimeout` is returned. Server
    /// errors and connection loss are returned immediately.
    pub async fn send_with<S>(
        &self,
        sink: &S,
        method: &str,
        params: Value,
        timeout: Duration,
        max_retries: u32,
    ) -> RpcResult<Value>
    where
        S: FrameSink + ?Sized,
    {
        for retries_used in 0..=max_retries {
            let id = self.allocate_id();
            let (result_tx, result_rx) = oneshot::channel();

            self.table().insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    issued_at: Instant::now(),
                    retries_used,
                    result_tx,
                },
            );
            let _guard = PendingGuard { correlator: self, id };

            let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, &params))
                .map_err(|e| RpcError::InvalidResponse(format!("serialize request: {}", e)))?;
            sink.transmit(frame).await?;

            tracing::trace!(id, method = %method, retries_used, "RPC request sent");

            match tokio::time::timeout(timeout, result_rx).await {
                Ok(Ok(result)) => return result,
                // Sender dropped without a value: treated as teardown
                Ok(Err(_)) => return Err(RpcError::ConnectionLost),
                Err(_) => {
                    tracing::warn!(
                        id,
                        method = %method,
                        retries_used,
                        timeout_ms = timeout.as_millis() as u64,
                        "RPC request timed out"
                    );
                }
            }
        }

        Err(RpcError::RequestTimeout {
            method: method.to_string(),
            retries: max_retries,
        })
    }

    /// Deliver a response to its waiting request
    ///
    /// Returns false (and drops the response) when the id is unknown, e.g. a
    /// late answer to an attempt that already timed out.
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let id = response.id;
        let entry = self.table().remove(&id);
        match entry {
            Some(pending) => {
                tracing::trace!(
                    id,
                    method = %pending.method,
                    latency_ms = pending.issued_at.elapsed().as_millis() as u64,
                    "RPC response matched"
                );
                let _ = pending.result_tx.send(response.into_result());
                true
            }
            None => {
                tracing::debug!(id, "Dropping response for unknown or expired request id");
                false
            }
        }
    }

    /// Fail every pending request with `error`; returns how many were failed
    pub fn fail_all(&self, error: RpcError) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.table().drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!(id, method = %pending.method, error = %error, "Failing pending request");
            let _ = pending.result_tx.send(Err(error.clone()));
        }
        count
    }

    /// Number of requests currently awaiting a response
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}
