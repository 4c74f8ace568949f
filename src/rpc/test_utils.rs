//! In-memory RPC node for connection and subscription tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::RpcConfig;
use crate::rpc::backoff::ReconnectConfig;
use crate::rpc::errors::{RpcError, RpcResult};
use crate::rpc::transport::{Transport, TransportChannels, TransportFrame};

/// First subscription id handed out by the mock
pub const FIRST_SUBSCRIPTION_ID: u64 = 100;

pub fn test_rpc_config() -> RpcConfig {
    RpcConfig {
        ws_url: "ws://mock-node".to_string(),
        commitment: "confirmed".to_string(),
        request_timeout_ms: 500,
        max_retries: 1,
        health_check_interval_secs: 30,
        health_check_timeout_ms: 30,
        health_failure_threshold: 2,
        reconnect: ReconnectConfig {
            base_delay_ms: 10,
            max_delay_ms: 50,
            jitter_ms: 0,
        },
    }
}

/// Poll `condition` every 5ms until it holds or `timeout` passes
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
struct NodeState {
    requests: Vec<Value>,
    silent: HashSet<String>,
    results: HashMap<String, Value>,
    /// (subject, physical id) per answered subscribe, in order
    assigned: Vec<(String, u64)>,
    inbound: Option<mpsc::Sender<TransportFrame>>,
    next_subscription: u64,
}

impl NodeState {
    fn subject_of(params: &Value) -> String {
        let first = &params[0];
        if let Some(s) = first.as_str() {
            return s.to_string();
        }
        if let Some(s) = first["mentions"][0].as_str() {
            return s.to_string();
        }
        "*".to_string()
    }

    fn answer(&mut self, request: &Value) -> Option<Value> {
        let method = request["method"].as_str().unwrap_or_default().to_string();
        self.requests.push(request.clone());
        if self.silent.contains(&method) {
            return None;
        }

        let result = if method.ends_with("Unsubscribe") {
            json!(true)
        } else if method.ends_with("Subscribe") {
            let id = self.next_subscription;
            self.next_subscription += 1;
            self.assigned
                .push((Self::subject_of(&request["params"]), id));
            json!(id)
        } else if method == "getHealth" {
            json!("ok")
        } else {
            self.results.get(&method).cloned().unwrap_or(Value::Null)
        };

        Some(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
    }
}

/// Auto-responding node: subscribes get increasing ids, unsubscribes `true`,
/// `getHealth` "ok", anything else its canned result or null
pub struct MockNode {
    state: Arc<Mutex<NodeState>>,
    connections: AtomicUsize,
    refuse: AtomicBool,
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        let state = NodeState {
            next_subscription: FIRST_SUBSCRIPTION_ID,
            ..NodeState::default()
        };
        Arc::new(Self {
            state: Arc::new(Mutex::new(state)),
            connections: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().unwrap()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Never answer `method`
    pub fn set_silent(&self, method: &str) {
        self.lock().silent.insert(method.to_string());
    }

    pub fn clear_silent(&self, method: &str) {
        self.lock().silent.remove(method);
    }

    pub fn set_result(&self, method: &str, result: Value) {
        self.lock().results.insert(method.to_string(), result);
    }

    pub fn requests(&self) -> Vec<Value> {
        self.lock().requests.clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r["method"] == method)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests_for(method).len()
    }

    /// Physical id most recently assigned for `subject`
    pub fn subscription_id(&self, subject: &str) -> Option<u64> {
        self.lock()
            .assigned
            .iter()
            .rev()
            .find(|(s, _)| s == subject)
            .map(|(_, id)| *id)
    }

    fn send_inbound(&self, frame: TransportFrame) {
        let inbound = self.lock().inbound.clone();
        if let Some(tx) = inbound {
            let _ = tx.try_send(frame);
        }
    }

    /// Close the current socket from the node side
    pub fn drop_connection(&self) {
        let inbound = self.lock().inbound.take();
        if let Some(tx) = inbound {
            let _ = tx.try_send(TransportFrame::Closed(Some("dropped by test".to_string())));
        }
    }

    pub fn push_raw(&self, text: &str) {
        self.send_inbound(TransportFrame::Text(text.to_string()));
    }

    pub fn push_notification(&self, method: &str, subscription: u64, result: Value) {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": { "subscription": subscription, "result": result }
        });
        self.push_raw(&frame.to_string());
    }

    /// Answer request `id` by hand (for methods marked silent)
    pub fn respond(&self, id: u64, result: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        self.push_raw(&frame.to_string());
    }
}

#[async_trait]
impl Transport for MockNode {
    async fn open(&self, url: &str) -> RpcResult<TransportChannels> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionFailed(format!("{} refused", url)));
        }

        let (out_tx, mut out_rx) = mpsc::channel::<String>(1024);
        let (in_tx, in_rx) = mpsc::channel::<TransportFrame>(1024);
        self.lock().inbound = Some(in_tx.clone());
        self.connections.fetch_add(1, Ordering::SeqCst);

        // Answers go back on the connection the request arrived on
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let Ok(request) = serde_json::from_str::<Value>(&frame) else {
                    continue;
                };
                let response = state.lock().unwrap().answer(&request);
                if let Some(response) = response {
                    if in_tx
                        .send(TransportFrame::Text(response.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        Ok(TransportChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
