//! Process-wide structured logging for fulfillment services.

pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat, ObservabilityError, init, init_with};
