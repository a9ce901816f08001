use std::sync::Arc;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly is not acceptable for
/// production. Callers can provide an implementation that forwards these
/// events to `tracing`, `log`, metrics, or custom sinks.
pub trait StoreEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: StoreEvent);
}

/// Structured events emitted by the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    SeriesCreated { id: u64, label_set: String },
    AppendRejected { series_id: u64, error: String },
    ChunksTruncated { series_id: u64, chunks: usize },
    TruncateFailed { series_id: u64, error: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl StoreEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: StoreEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn StoreEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation and in-process scraping.
///
/// ## Key properties
/// - Library-safe: emitting metrics is effectively a no-op until a recorder is installed.
/// - Serverless scraping: callers can render Prometheus exposition text in-process.
pub mod store_metrics {
    use ::metrics::{describe_counter, describe_gauge, Unit};

    // --- metric names ---
    //
    // Counters are exposed as `<name>_total` by the Prometheus exporter.

    pub const APPENDED_SAMPLES: &str = "smolder_appended_samples";
    pub const APPENDS_REJECTED: &str = "smolder_appends_rejected";
    pub const TRUNCATED_CHUNKS: &str = "smolder_truncated_chunks";
    pub const ACTIVE_SERIES: &str = "smolder_active_series";

    #[inline]
    pub fn record_appended_sample() {
        ::metrics::counter!(APPENDED_SAMPLES).increment(1);
    }

    #[inline]
    pub fn record_append_rejected() {
        ::metrics::counter!(APPENDS_REJECTED).increment(1);
    }

    #[inline]
    pub fn record_truncated_chunks(chunks: u64) {
        if chunks > 0 {
            ::metrics::counter!(TRUNCATED_CHUNKS).increment(chunks);
        }
    }

    #[inline]
    pub fn set_active_series(count: usize) {
        ::metrics::gauge!(ACTIVE_SERIES).set(count as f64);
    }

    #[cfg_attr(not(feature = "prometheus"), allow(dead_code))]
    fn describe_all() {
        describe_counter!(
            APPENDED_SAMPLES,
            Unit::Count,
            "Total number of profiles appended across all series."
        );
        describe_counter!(
            APPENDS_REJECTED,
            Unit::Count,
            "Total number of appends rejected (out-of-order or schema mismatch)."
        );
        describe_counter!(
            TRUNCATED_CHUNKS,
            Unit::Count,
            "Total number of timestamp chunks removed by truncation."
        );
        describe_gauge!(
            ACTIVE_SERIES,
            Unit::Count,
            "Number of series currently held by the store."
        );
    }

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: metrics_exporter_prometheus::PrometheusHandle,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process).
        ///
        /// Callers should invoke [`InProcessPrometheus::run_upkeep`] periodically
        /// to keep exporter internals healthy when scraping infrequently.
        pub fn install() -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;
            Ok(Self { handle })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }

        pub fn run_upkeep(&self) {
            self.handle.run_upkeep();
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: metrics_exporter_prometheus::BuildError) -> Self {
            match e {
                metrics_exporter_prometheus::BuildError::FailedToSetGlobalRecorder(_) => {
                    MetricsInitError::AlreadyInstalled
                }
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct CapturingListener {
        events: Mutex<Vec<StoreEvent>>,
    }

    impl StoreEventListener for CapturingListener {
        fn on_event(&self, event: StoreEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn noop_listener_swallows_events() {
        noop_event_listener().on_event(StoreEvent::SeriesCreated {
            id: 1,
            label_set: "{}".to_string(),
        });
    }

    #[test]
    fn listener_receives_events() {
        let l = CapturingListener::default();
        l.on_event(StoreEvent::ChunksTruncated {
            series_id: 7,
            chunks: 2,
        });
        let events = l.events.lock().unwrap();
        assert!(matches!(
            events[0],
            StoreEvent::ChunksTruncated {
                series_id: 7,
                chunks: 2
            }
        ));
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        store_metrics::record_appended_sample();
        store_metrics::record_truncated_chunks(0);
        store_metrics::set_active_series(3);
    }
}
