//! # Warden Telemetry
//!
//! Crate for logging and metrics shared by every jail.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
