//! Connection lifecycle for the single multiplexed RPC socket
//!
//! `ConnectionManager` owns the socket, the request correlator and the event
//! dispatcher. Each physical socket gets a new generation number; frames and
//! close events from a superseded generation are ignored. On an unexpected
//! close every pending request fails with `ConnectionLost`, observers are told,
//! and a reconnect loop with exponential backoff runs until it succeeds or the
//! manager is shut down.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RpcConfig;
use crate::core::events::{current_timestamp_ms, log_event, LifecycleEvent};
use crate::rpc::backoff::reconnect_with_backoff;
use crate::rpc::correlator::{FrameSink, RequestCorrelator};
use crate::rpc::dispatcher::EventDispatcher;
use crate::rpc::errors::{RpcError, RpcResult};
use crate::rpc::transport::{Transport, TransportFrame};
use crate::rpc::types::{ConnectionState, InboundMessage, JsonRpcNotification};

/// Lightweight liveness probe
const HEALTH_METHOD: &str = "getHealth";

/// Longest frame excerpt included in protocol warnings
const FRAME_LOG_LIMIT: usize = 256;

/// Receives connection lifecycle callbacks
///
/// Observers are held weakly; dropping the observer unregisters it.
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// A new socket is live (initial connect or reconnect)
    async fn on_connected(&self, generation: u64);
    /// The socket dropped; state that referenced it is stale
    async fn on_connection_lost(&self);
    /// Unsolicited notification, delivered in arrival order
    async fn on_notification(&self, notification: JsonRpcNotification);
}

struct ActiveLink {
    generation: u64,
    outbound: mpsc::Sender<String>,
}

/// Owns the one logical connection to the remote node
pub struct ConnectionManager {
    config: RpcConfig,
    transport: Arc<dyn Transport>,
    correlator: RequestCorrelator,
    dispatcher: Arc<EventDispatcher>,
    state_tx: watch::Sender<ConnectionState>,
    link: Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
    reconnect_attempts: AtomicU32,
    reconnecting: AtomicBool,
    last_health_check_ms: AtomicU64,
    connect_lock: tokio::sync::Mutex<()>,
    observers: Mutex<Vec<Weak<dyn ConnectionObserver>>>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: RpcConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            correlator: RequestCorrelator::new(config.request_timeout(), config.max_retries),
            config,
            transport,
            dispatcher: Arc::new(EventDispatcher::new()),
            state_tx,
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            last_health_check_ms: AtomicU64::new(0),
            connect_lock: tokio::sync::Mutex::new(()),
            observers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        self.dispatcher.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Generation of the most recently opened socket (0 before the first)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Failed reconnect attempts since the connection was last up
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Unix ms of the last health probe, if any ran
    pub fn last_health_check_ms(&self) -> Option<u64> {
        match self.last_health_check_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn add_observer(&self, observer: Weak<dyn ConnectionObserver>) {
        self.observer_list().push(observer);
    }

    fn observer_list(&self) -> MutexGuard<'_, Vec<Weak<dyn ConnectionObserver>>> {
        self.observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live_observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        let mut observers = self.observer_list();
        observers.retain(|o| o.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    fn link_slot(&self) -> MutexGuard<'_, Option<ActiveLink>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link_slot().as_ref().map(|l| l.generation) == Some(generation)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Open the connection, or join the one already up or recovering
    pub async fn connect(self: &Arc<Self>) -> RpcResult<()> {
        {
            let _guard = self.connect_lock.lock().await;
            if self.shutdown.is_cancelled() {
                return Err(RpcError::Shutdown);
            }
            match self.state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Reconnecting => {}
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    self.set_state(ConnectionState::Connecting);
                    return match self.open_link().await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            self.set_state(ConnectionState::Disconnected);
                            tracing::error!(
                                endpoint = %self.config.ws_url,
                                error = %e,
                                "Initial connection failed"
                            );
                            Err(e)
                        }
                    };
                }
            }
        }
        // Reconnect loop is running; wait for it rather than opening a second socket
        self.wait_connected().await
    }

    async fn wait_connected(&self) -> RpcResult<()> {
        let mut state_rx = self.state_tx.subscribe();
        tokio::select! {
            res = state_rx.wait_for(|s| *s == ConnectionState::Connected) => {
                res.map(|_| ()).map_err(|_| RpcError::Shutdown)
            }
            _ = self.shutdown.cancelled() => Err(RpcError::Shutdown),
        }
    }

    /// Caller must hold `connect_lock`
    async fn open_link(self: &Arc<Self>) -> RpcResult<()> {
        let channels = self.transport.open(&self.config.ws_url).await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *self.link_slot() = Some(ActiveLink {
            generation,
            outbound: channels.outbound,
        });
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);

        tracing::info!(endpoint = %self.config.ws_url, generation, "Connected to RPC node");

        let reader = self.clone();
        tokio::spawn(async move { reader.read_loop(generation, channels.inbound).await });

        for observer in self.live_observers() {
            tokio::spawn(async move { observer.on_connected(generation).await });
        }
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, generation: u64, mut inbound: mpsc::Receiver<TransportFrame>) {
        let reason = loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                frame = inbound.recv() => frame,
            };
            if !self.is_current(generation) {
                tracing::debug!(generation, "Reader for superseded connection stopped");
                return;
            }
            match frame {
                Some(TransportFrame::Text(text)) => self.handle_frame(&text).await,
                Some(TransportFrame::Closed(reason)) => break reason,
                None => break None,
            }
        };
        let reason = reason.unwrap_or_else(|| "transport ended".to_string());
        self.drop_link(generation, &reason).await;
    }

    async fn handle_frame(&self, text: &str) {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                let excerpt: String = text.chars().take(FRAME_LOG_LIMIT).collect();
                tracing::warn!(error = %e, frame = %excerpt, "Dropping malformed frame");
                return;
            }
        };

        match message {
            InboundMessage::Response(response) => {
                self.correlator.resolve(response);
            }
            InboundMessage::Notification(notification) => {
                let observers = self.live_observers();
                if observers.is_empty() {
                    tracing::debug!(
                        method = %notification.method,
                        subscription = notification.params.subscription,
                        "Notification with no observer"
                    );
                }
                for observer in observers {
                    observer.on_notification(notification.clone()).await;
                }
            }
        }
    }

    /// Tear down `generation` (if still current) and start recovery
    async fn drop_link(self: &Arc<Self>, generation: u64, reason: &str) {
        {
            let mut slot = self.link_slot();
            match slot.as_ref() {
                Some(link) if link.generation == generation => *slot = None,
                _ => return,
            }
        }
        if self.shutdown.is_cancelled() {
            return;
        }

        self.set_state(ConnectionState::Reconnecting);
        let failed = self.correlator.fail_all(RpcError::ConnectionLost);
        tracing::warn!(
            endpoint = %self.config.ws_url,
            generation,
            reason = %reason,
            failed_requests = failed,
            "Connection lost"
        );
        log_event(&LifecycleEvent::connection_lost(&self.config.ws_url, generation, reason));

        for observer in self.live_observers() {
            observer.on_connection_lost().await;
        }
        self.spawn_reconnect();
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let endpoint = this.config.ws_url.clone();
            let result =
                reconnect_with_backoff(&this.config.reconnect, &endpoint, &this.shutdown, |attempt| {
                    let this = this.clone();
                    async move {
                        this.reconnect_attempts.store(attempt + 1, Ordering::SeqCst);
                        let _guard = this.connect_lock.lock().await;
                        if this.shutdown.is_cancelled() {
                            return Err(RpcError::Shutdown);
                        }
                        // Cleared before the new link goes live so its own loss can reschedule
                        this.reconnecting.store(false, Ordering::SeqCst);
                        if this.state() == ConnectionState::Connected {
                            return Ok(());
                        }
                        let result = this.open_link().await;
                        if result.is_err() {
                            this.reconnecting.store(true, Ordering::SeqCst);
                        }
                        result
                    }
                })
                .await;

            match result {
                Ok(failed_attempts) => {
                    log_event(&LifecycleEvent::reconnected(&endpoint, this.generation(), failed_attempts));
                }
                Err(e) => tracing::debug!(error = %e, "Reconnect loop stopped"),
            }
        });
    }

    /// Shut down: no reconnect follows, pending requests fail, tasks stop
    ///
    /// A manager that has been disconnected cannot connect again.
    pub async fn disconnect(&self) {
        self.shutdown.cancel();
        let link = self.link_slot().take();
        let failed = self.correlator.fail_all(RpcError::ConnectionLost);
        self.set_state(ConnectionState::Disconnected);

        for observer in self.live_observers() {
            observer.on_connection_lost().await;
        }

        tracing::info!(
            endpoint = %self.config.ws_url,
            had_link = link.is_some(),
            failed_requests = failed,
            "Disconnected"
        );
    }

    /// Send a request with the configured timeout and retry budget
    pub async fn send(&self, method: &str, params: Value) -> RpcResult<Value> {
        self.correlator.send(self, method, params).await
    }

    /// Send a request with an explicit timeout and retry budget
    pub async fn send_with(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        max_retries: u32,
    ) -> RpcResult<Value> {
        self.correlator
            .send_with(self, method, params, timeout, max_retries)
            .await
    }

    /// One liveness probe with the short health timeout and no retries
    pub async fn health_check(&self) -> RpcResult<()> {
        self.last_health_check_ms
            .store(current_timestamp_ms(), Ordering::Relaxed);
        self.send_with(HEALTH_METHOD, json!([]), self.config.health_check_timeout(), 0)
            .await
            .map(|_| ())
    }

    /// Start the periodic health monitor on the configured interval
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(health_monitor_task(
            self.clone(),
            self.config.health_check_interval(),
            shutdown_rx,
        ))
    }
}

#[async_trait]
impl FrameSink for ConnectionManager {
    async fn transmit(&self, frame: String) -> RpcResult<()> {
        let outbound = self
            .link_slot()
            .as_ref()
            .map(|l| l.outbound.clone())
            .ok_or(RpcError::NotConnected)?;
        outbound
            .send(frame)
            .await
            .map_err(|_| RpcError::ConnectionLost)
    }
}

/// Probe the connection every `interval`; force a reconnect after
/// `health_failure_threshold` consecutive failures
///
/// Runs until `shutdown_rx` fires or the manager is disconnected.
pub async fn health_monitor_task(
    manager: Arc<ConnectionManager>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let threshold = manager.config.health_failure_threshold.max(1);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    let mut consecutive_failures: u32 = 0;

    tracing::info!(interval_ms = interval.as_millis() as u64, "Health monitor started");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Health monitor shutting down");
                break;
            }
            _ = manager.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !manager.is_connected() {
            consecutive_failures = 0;
            continue;
        }

        let generation = manager.generation();
        match manager.health_check().await {
            Ok(()) => {
                if consecutive_failures > 0 {
                    tracing::info!(after_failures = consecutive_failures, "Health check recovered");
                }
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    generation,
                    consecutive_failures,
                    threshold,
                    error = %e,
                    "Health check failed"
                );
                if consecutive_failures >= threshold {
                    tracing::error!(generation, "Connection unhealthy, forcing reconnect");
                    manager.drop_link(generation, "health check failed").await;
                    consecutive_failures = 0;
                }
            }
        }
    }
}
