//! Structured swap and connection lifecycle events
//!
//! Every event is one tracing line with a stable `event_type` field
//! (SCREAMING_SNAKE_CASE) so log pipelines can filter on it.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::logging::sanitize_signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventType {
    SwapStarted,
    AttemptStarted,
    AttemptFailed,
    AttemptSubmitted,
    SwapConfirmed,
    SwapAborted,
    SwapExhausted,
    SwapCancelled,
    ConnectionLost,
    Reconnected,
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleEventType::SwapStarted => "SWAP_STARTED",
            LifecycleEventType::AttemptStarted => "ATTEMPT_STARTED",
            LifecycleEventType::AttemptFailed => "ATTEMPT_FAILED",
            LifecycleEventType::AttemptSubmitted => "ATTEMPT_SUBMITTED",
            LifecycleEventType::SwapConfirmed => "SWAP_CONFIRMED",
            LifecycleEventType::SwapAborted => "SWAP_ABORTED",
            LifecycleEventType::SwapExhausted => "SWAP_EXHAUSTED",
            LifecycleEventType::SwapCancelled => "SWAP_CANCELLED",
            LifecycleEventType::ConnectionLost => "CONNECTION_LOST",
            LifecycleEventType::Reconnected => "RECONNECTED",
        };
        write!(f, "{}", s)
    }
}

/// One lifecycle event. Fields not relevant to the event type stay `None`.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub event_type: LifecycleEventType,
    pub timestamp_ms: u64,
    pub swap_id: Option<Uuid>,
    pub provider: Option<String>,
    pub attempt: Option<u32>,
    pub requested_amount: Option<u64>,
    pub applied_amount: Option<u64>,
    pub deduction_bps: Option<u32>,
    pub slippage_bps: Option<u32>,
    pub signature: Option<String>,
    pub error_class: Option<String>,
    pub error: Option<String>,
    pub endpoint: Option<String>,
    pub generation: Option<u64>,
}

impl LifecycleEvent {
    pub fn new(event_type: LifecycleEventType) -> Self {
        Self {
            event_type,
            timestamp_ms: current_timestamp_ms(),
            swap_id: None,
            provider: None,
            attempt: None,
            requested_amount: None,
            applied_amount: None,
            deduction_bps: None,
            slippage_bps: None,
            signature: None,
            error_class: None,
            error: None,
            endpoint: None,
            generation: None,
        }
    }

    pub fn swap_started(swap_id: Uuid, amount: u64, providers: usize) -> Self {
        Self {
            swap_id: Some(swap_id),
            requested_amount: Some(amount),
            attempt: Some(providers as u32),
            ..Self::new(LifecycleEventType::SwapStarted)
        }
    }

    pub fn attempt_started(
        swap_id: Uuid,
        provider: &str,
        attempt: u32,
        applied_amount: u64,
        deduction_bps: u32,
        slippage_bps: u32,
    ) -> Self {
        Self {
            swap_id: Some(swap_id),
            provider: Some(provider.to_string()),
            attempt: Some(attempt),
            applied_amount: Some(applied_amount),
            deduction_bps: Some(deduction_bps),
            slippage_bps: Some(slippage_bps),
            ..Self::new(LifecycleEventType::AttemptStarted)
        }
    }

    pub fn attempt_submitted(swap_id: Uuid, provider: &str, attempt: u32, signature: &str) -> Self {
        Self {
            swap_id: Some(swap_id),
            provider: Some(provider.to_string()),
            attempt: Some(attempt),
            signature: Some(signature.to_string()),
            ..Self::new(LifecycleEventType::AttemptSubmitted)
        }
    }

    pub fn attempt_failed(
        swap_id: Uuid,
        provider: &str,
        attempt: u32,
        error_class: &str,
        error: &str,
    ) -> Self {
        Self {
            swap_id: Some(swap_id),
            provider: Some(provider.to_string()),
            attempt: Some(attempt),
            error_class: Some(error_class.to_string()),
            error: Some(error.to_string()),
            ..Self::new(LifecycleEventType::AttemptFailed)
        }
    }

    pub fn swap_confirmed(
        swap_id: Uuid,
        provider: &str,
        attempt: u32,
        applied_amount: u64,
        signature: &str,
    ) -> Self {
        Self {
            swap_id: Some(swap_id),
            provider: Some(provider.to_string()),
            attempt: Some(attempt),
            applied_amount: Some(applied_amount),
            signature: Some(signature.to_string()),
            ..Self::new(LifecycleEventType::SwapConfirmed)
        }
    }

    pub fn swap_aborted(swap_id: Uuid, provider: &str, error: &str) -> Self {
        Self {
            swap_id: Some(swap_id),
            provider: Some(provider.to_string()),
            error_class: Some("fatal".to_string()),
            error: Some(error.to_string()),
            ..Self::new(LifecycleEventType::SwapAborted)
        }
    }

    pub fn swap_exhausted(swap_id: Uuid, attempts: u32, error: &str) -> Self {
        Self {
            swap_id: Some(swap_id),
            attempt: Some(attempts),
            error: Some(error.to_string()),
            ..Self::new(LifecycleEventType::SwapExhausted)
        }
    }

    pub fn swap_cancelled(swap_id: Uuid, attempts: u32) -> Self {
        Self {
            swap_id: Some(swap_id),
            attempt: Some(attempts),
            ..Self::new(LifecycleEventType::SwapCancelled)
        }
    }

    pub fn connection_lost(endpoint: &str, generation: u64, reason: &str) -> Self {
        Self {
            endpoint: Some(endpoint.to_string()),
            generation: Some(generation),
            error: Some(reason.to_string()),
            ..Self::new(LifecycleEventType::ConnectionLost)
        }
    }

    pub fn reconnected(endpoint: &str, generation: u64, attempts: u32) -> Self {
        Self {
            endpoint: Some(endpoint.to_string()),
            generation: Some(generation),
            attempt: Some(attempts),
            ..Self::new(LifecycleEventType::Reconnected)
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Emit an event: DEBUG for attempt starts, WARN for failures, INFO otherwise
pub fn log_event(event: &LifecycleEvent) {
    let event_type = event.event_type.to_string();
    let swap_id = event.swap_id.map(|id| id.to_string());
    let signature = event.signature.as_deref().map(sanitize_signature);

    match event.event_type {
        LifecycleEventType::AttemptStarted => {
            debug!(
                event_type = %event_type,
                timestamp = event.timestamp_ms,
                swap_id = ?swap_id,
                provider = ?event.provider,
                attempt = ?event.attempt,
                applied_amount = ?event.applied_amount,
                deduction_bps = ?event.deduction_bps,
                slippage_bps = ?event.slippage_bps,
                ""
            );
        }
        LifecycleEventType::AttemptFailed
        | LifecycleEventType::SwapAborted
        | LifecycleEventType::SwapExhausted
        | LifecycleEventType::ConnectionLost => {
            warn!(
                event_type = %event_type,
                timestamp = event.timestamp_ms,
                swap_id = ?swap_id,
                provider = ?event.provider,
                attempt = ?event.attempt,
                error_class = ?event.error_class,
                error = ?event.error,
                endpoint = ?event.endpoint,
                generation = ?event.generation,
                ""
            );
        }
        _ => {
            info!(
                event_type = %event_type,
                timestamp = event.timestamp_ms,
                swap_id = ?swap_id,
                provider = ?event.provider,
                attempt = ?event.attempt,
                requested_amount = ?event.requested_amount,
                applied_amount = ?event.applied_amount,
                signature = ?signature,
                endpoint = ?event.endpoint,
                generation = ?event.generation,
                ""
            );
        }
    }
}
