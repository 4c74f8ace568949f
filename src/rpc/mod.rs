//! JSON-RPC connection and subscription layer
//!
//! - `transport`: physical socket (tokio-tungstenite) behind the `Transport` trait
//! - `correlator`: request/response matching with timeout and retry
//! - `connection`: lifecycle, reconnect with backoff, health checks
//! - `subscriptions`: physical subscription dedupe, resubscribe, idle cleanup
//! - `dispatcher`: per-key fan-out to listeners

pub mod backoff;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod errors;
pub mod subscriptions;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use backoff::{reconnect_with_backoff, ReconnectConfig};
pub use connection::{health_monitor_task, ConnectionManager, ConnectionObserver};
pub use correlator::{FrameSink, RequestCorrelator};
pub use dispatcher::{DispatchReport, EventDispatcher, ListenerCallback, RegistrationId};
pub use errors::{RpcError, RpcResult};
pub use subscriptions::{idle_cleanup_task, Registration, RegistryStats, SubscriptionRegistry};
pub use transport::{Transport, TransportChannels, TransportFrame, WsTransport};
pub use types::{
    ConnectionState, InboundMessage, JsonRpcNotification, JsonRpcResponse, SubscriptionEvent,
    SubscriptionKey, SubscriptionKind,
};
