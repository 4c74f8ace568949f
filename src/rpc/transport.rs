//! Socket transport
//!
//! A `Transport` opens one physical connection and hands back a pair of
//! channels: text frames to send, and frames received. The connection manager
//! owns everything above that, so tests can swap in an in-memory node.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config, tungstenite::protocol::Message, Connector,
    MaybeTlsStream, WebSocketStream,
};

use crate::rpc::errors::{RpcError, RpcResult};

/// Type alias for the WebSocket stream with TLS
pub type TlsWebSocketStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Capacity of the per-connection frame channels
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// Frame received from the remote node
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    Text(String),
    /// Socket closed (reason if known); no further frames follow
    Closed(Option<String>),
}

/// Channels of one open physical connection
#[derive(Debug)]
pub struct TransportChannels {
    /// Text frames to send; dropping this closes the socket
    pub outbound: mpsc::Sender<String>,
    /// Frames received, ending with `Closed`
    pub inbound: mpsc::Receiver<TransportFrame>,
}

/// Opens physical connections to a remote endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> RpcResult<TransportChannels>;
}

/// Connect to a WebSocket endpoint with TLS (TLSv1.2 minimum)
///
/// # Arguments
/// * `url` - WebSocket URL to connect to (wss://)
pub async fn connect_tls(url: &str) -> RpcResult<TlsWebSocketStream> {
    let tls = native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .build()
        .map_err(|e| RpcError::ConnectionFailed(format!("TLS error: {}", e)))?;

    let (ws_stream, _response) =
        connect_async_tls_with_config(url, None, false, Some(Connector::NativeTls(tls)))
            .await
            .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;

    Ok(ws_stream)
}

/// Production transport over tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }

    async fn connect_stream(url: &str) -> RpcResult<TlsWebSocketStream> {
        if url.starts_with("wss://") {
            connect_tls(url).await
        } else {
            let (ws_stream, _response) = connect_async(url)
                .await
                .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;
            Ok(ws_stream)
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> RpcResult<TransportChannels> {
        let ws_stream = Self::connect_stream(url).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(FRAME_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<TransportFrame>(FRAME_CHANNEL_CAPACITY);

        // Writer: drains outbound frames until the sender side is dropped
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
            tracing::debug!("WebSocket writer ended");
        });

        // Reader: forwards text frames, always terminates with Closed
        tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(TransportFrame::Text(text)).await.is_err() {
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break Some(
                            frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "closed by server".to_string()),
                        );
                    }
                    // Ping/pong handled by tungstenite; binary frames are not part of the protocol
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break Some("stream ended".to_string()),
                }
            };
            let _ = in_tx.send(TransportFrame::Closed(reason)).await;
            tracing::debug!("WebSocket reader ended");
        });

        Ok(TransportChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
