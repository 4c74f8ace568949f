//! JSON-RPC wire types and subscription identities
//!
//! Outbound frames are `{jsonrpc, id, method, params}`. Inbound frames are
//! either a response matched by `id` or an unsolicited notification routed by
//! its `params.subscription` id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::rpc::errors::RpcError;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the single logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Outbound JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Response to a request we issued
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Collapse into the value/error the waiting caller receives
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(RpcError::Server {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// `params` of a subscription notification
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationParams {
    pub subscription: u64,
    pub result: Value,
}

/// Unsolicited subscription notification
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    pub params: NotificationParams,
}

/// Any frame the node may send us
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

// =============================================================================
// Subscription identities
// =============================================================================

/// Kind of on-chain event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    /// Account data / lamport balance changes
    Balance,
    /// Status of a submitted transaction signature
    Signature,
    /// Program log stream
    Logs,
    /// Slot progression
    Slot,
}

impl SubscriptionKind {
    /// Key prefix (`balance`, `signature`, ...)
    pub fn prefix(&self) -> &'static str {
        match self {
            SubscriptionKind::Balance => "balance",
            SubscriptionKind::Signature => "signature",
            SubscriptionKind::Logs => "logs",
            SubscriptionKind::Slot => "slot",
        }
    }

    pub fn subscribe_method(&self) -> &'static str {
        match self {
            SubscriptionKind::Balance => "accountSubscribe",
            SubscriptionKind::Signature => "signatureSubscribe",
            SubscriptionKind::Logs => "logsSubscribe",
            SubscriptionKind::Slot => "slotSubscribe",
        }
    }

    pub fn unsubscribe_method(&self) -> &'static str {
        match self {
            SubscriptionKind::Balance => "accountUnsubscribe",
            SubscriptionKind::Signature => "signatureUnsubscribe",
            SubscriptionKind::Logs => "logsUnsubscribe",
            SubscriptionKind::Slot => "slotUnsubscribe",
        }
    }

    /// Method name carried by this kind's notifications
    pub fn notification_method(&self) -> &'static str {
        match self {
            SubscriptionKind::Balance => "accountNotification",
            SubscriptionKind::Signature => "signatureNotification",
            SubscriptionKind::Logs => "logsNotification",
            SubscriptionKind::Slot => "slotNotification",
        }
    }

    /// Build the subscribe params for a subject at the given commitment
    pub fn subscribe_params(&self, subject: &str, commitment: &str) -> Value {
        match self {
            SubscriptionKind::Balance => json!([
                subject,
                { "encoding": "jsonParsed", "commitment": commitment }
            ]),
            SubscriptionKind::Signature => json!([subject, { "commitment": commitment }]),
            SubscriptionKind::Logs => json!([
                { "mentions": [subject] },
                { "commitment": commitment }
            ]),
            SubscriptionKind::Slot => json!([]),
        }
    }
}

impl FromStr for SubscriptionKind {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balance" => Ok(SubscriptionKind::Balance),
            "signature" => Ok(SubscriptionKind::Signature),
            "logs" => Ok(SubscriptionKind::Logs),
            "slot" => Ok(SubscriptionKind::Slot),
            other => Err(RpcError::InvalidResponse(format!(
                "unknown subscription kind '{}'",
                other
            ))),
        }
    }
}

/// Logical identity of a subscription, rendered `<kind>:<subject>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub kind: SubscriptionKind,
    pub subject: String,
}

impl SubscriptionKey {
    pub fn new(kind: SubscriptionKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
        }
    }

    pub fn balance(address: impl Into<String>) -> Self {
        Self::new(SubscriptionKind::Balance, address)
    }

    pub fn signature(signature: impl Into<String>) -> Self {
        Self::new(SubscriptionKind::Signature, signature)
    }

    pub fn logs(address: impl Into<String>) -> Self {
        Self::new(SubscriptionKind::Logs, address)
    }

    pub fn slot() -> Self {
        Self::new(SubscriptionKind::Slot, "*")
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.subject)
    }
}

impl FromStr for SubscriptionKey {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, subject) = s.split_once(':').ok_or_else(|| {
            RpcError::InvalidResponse(format!("subscription key '{}' has no kind prefix", s))
        })?;
        if subject.is_empty() {
            return Err(RpcError::InvalidResponse(format!(
                "subscription key '{}' has an empty subject",
                s
            )));
        }
        Ok(Self::new(prefix.parse()?, subject))
    }
}

/// Decoded notification delivered to listeners
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub key: SubscriptionKey,
    /// Provider-assigned id the notification arrived on
    pub physical_id: u64,
    /// Raw `params.result` payload
    pub payload: Value,
    /// Unix epoch milliseconds at arrival
    pub received_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_parse() {
        let key = SubscriptionKey::balance("W1");
        assert_eq!(key.to_string(), "balance:W1");

        let parsed: SubscriptionKey = "balance:W1".parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_key_parse_rejects_unknown_kind() {
        assert!("orders:BTC".parse::<SubscriptionKey>().is_err());
        assert!("balance".parse::<SubscriptionKey>().is_err());
        assert!("balance:".parse::<SubscriptionKey>().is_err());
    }

    #[test]
    fn test_request_serialization() {
        let params = json!(["W1"]);
        let req = JsonRpcRequest::new(7, "getBalance", &params);
        let text = serde_json::to_string(&req).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "getBalance");
        assert_eq!(value["params"][0], "W1");
    }

    #[test]
    fn test_inbound_response_parse() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":42}"#).unwrap();
        match msg {
            InboundMessage::Response(resp) => {
                assert_eq!(resp.id, 3);
                assert_eq!(resp.into_result().unwrap(), json!(42));
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn test_inbound_error_response_parse() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Response(resp) => {
                let err = resp.into_result().unwrap_err();
                assert!(matches!(err, RpcError::Server { code: -32601, .. }));
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn test_inbound_notification_parse() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"accountNotification","params":{"subscription":23,"result":{"value":{"lamports":5}}}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Notification(n) => {
                assert_eq!(n.method, "accountNotification");
                assert_eq!(n.params.subscription, 23);
                assert_eq!(n.params.result["value"]["lamports"], 5);
            }
            _ => panic!("expected notification"),
        }
    }

    #[test]
    fn test_subscribe_params_by_kind() {
        let p = SubscriptionKind::Logs.subscribe_params("Prog1", "confirmed");
        assert_eq!(p[0]["mentions"][0], "Prog1");
        let p = SubscriptionKind::Slot.subscribe_params("*", "confirmed");
        assert_eq!(p, json!([]));
    }
}
