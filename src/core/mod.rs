//! Cross-cutting infrastructure: logging setup and lifecycle events

pub mod events;
pub mod logging;

pub use events::{current_timestamp_ms, log_event, LifecycleEvent, LifecycleEventType};
pub use logging::{init_logging, sanitize, sanitize_signature, LoggingConfig, SanitizedValue};
