//! # Keel Telemetry
//!
//! Log subscriber setup and Prometheus export of pool statistics.

pub mod logging;
pub mod metrics;

pub use logging::{EventLogger, LoggingError};
pub use metrics::MetricsRecorder;
