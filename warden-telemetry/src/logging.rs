//! ## warden-telemetry::logging
//! **Subscriber setup and structured security events**
//!
//! Jails and their workers log through plain `tracing` macros inside their
//! own `jail{name=..}` span. Events an operator may want to alert on
//! (ban issued, ban restored, jail started/stopped) go through
//! [`EventLogger::log_event`] so they share one span name and layout.

use opentelemetry::KeyValue;
use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` wins over `level`.
    pub fn init(level: &str) {
        if let Err(err) = Self::try_init(level) {
            eprintln!("tracing subscriber already installed: {err}");
        }
    }

    pub fn try_init(
        level: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
    }

    #[inline]
    pub fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "security_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );

        span.in_scope(|| {
            tracing::info!(
                metadata = ?metadata,
                "Security event occurred"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_logging() {
        EventLogger::log_event("ban_issued", vec![KeyValue::new("ip", "192.0.2.7")]);
        assert!(logs_contain("Security event occurred"));
        assert!(logs_contain("192.0.2.7"));
    }
}
