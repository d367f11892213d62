//! ## warden-telemetry::metrics
//! **Prometheus counters and histograms, labelled per jail**

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    pub tickets_enqueued: IntCounterVec,
    pub tickets_restored: IntCounterVec,
    pub restore_failures: IntCounterVec,
    pub bans_issued: IntCounterVec,
    pub ban_duration: HistogramVec,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let tickets_enqueued = IntCounterVec::new(
            Opts::new(
                "warden_tickets_enqueued_total",
                "Tickets handed from watchers to actuators",
            ),
            &["jail"],
        )
        .unwrap();
        let tickets_restored = IntCounterVec::new(
            Opts::new(
                "warden_tickets_restored_total",
                "Bans re-injected from the ban store at startup",
            ),
            &["jail"],
        )
        .unwrap();
        let restore_failures = IntCounterVec::new(
            Opts::new(
                "warden_restore_failures_total",
                "Tickets or store queries that failed during restoration",
            ),
            &["jail"],
        )
        .unwrap();
        let bans_issued = IntCounterVec::new(
            Opts::new("warden_bans_issued_total", "Bans applied by actuators"),
            &["jail"],
        )
        .unwrap();

        let ban_duration = HistogramVec::new(
            HistogramOpts::new(
                "warden_ban_duration_seconds",
                "Finite ban durations chosen by the ban time policy",
            )
            .buckets(vec![60.0, 600.0, 3_600.0, 86_400.0, 604_800.0, 2_592_000.0]),
            &["jail"],
        )
        .unwrap();

        registry
            .register(Box::new(tickets_enqueued.clone()))
            .unwrap();
        registry
            .register(Box::new(tickets_restored.clone()))
            .unwrap();
        registry
            .register(Box::new(restore_failures.clone()))
            .unwrap();
        registry.register(Box::new(bans_issued.clone())).unwrap();
        registry.register(Box::new(ban_duration.clone())).unwrap();

        Self {
            registry,
            tickets_enqueued,
            tickets_restored,
            restore_failures,
            bans_issued,
            ban_duration,
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }

    pub fn inc_tickets_enqueued(&self, jail: &str) {
        self.tickets_enqueued.with_label_values(&[jail]).inc();
    }

    pub fn inc_tickets_restored(&self, jail: &str, count: u64) {
        self.tickets_restored.with_label_values(&[jail]).inc_by(count);
    }

    pub fn inc_restore_failures(&self, jail: &str, count: u64) {
        self.restore_failures.with_label_values(&[jail]).inc_by(count);
    }

    /// `None` records a permanent ban, which is counted but not observed.
    pub fn record_ban(&self, jail: &str, seconds: Option<f64>) {
        self.bans_issued.with_label_values(&[jail]).inc();
        if let Some(seconds) = seconds {
            self.ban_duration.with_label_values(&[jail]).observe(seconds);
        }
    }
}
