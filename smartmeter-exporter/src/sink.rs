//! Metrics sink holding the latest meter readings and scrape outcomes.
//!
//! Every exported value lives in its own atomic (or per-family lock), so
//! the scrape task never holds a lock that `/metrics` has to wait on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use smartmeter_common::{Phase, Reading};
use tracing::error;

use crate::scrape::ScrapeOutcome;

/// Metric name prefix.
pub const METRIC_PREFIX: &str = "smartmeter";

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Prometheus client_golang `DefBuckets`.
const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

type Labels = Vec<(String, String)>;
type FloatGauge = Gauge<f64, AtomicU64>;

fn phase_labels(phase: Phase) -> Labels {
    vec![("phase".to_string(), phase.as_str().to_string())]
}

fn error_labels(error_type: &str) -> Labels {
    vec![("type".to_string(), error_type.to_string())]
}

/// Thread-safe store of the exporter's metrics.
pub struct MetricsSink {
    registry: Registry,
    power: FloatGauge,
    current: Family<Labels, FloatGauge>,
    last_success: FloatGauge,
    duration: Histogram,
    errors: Family<Labels, Counter>,
    /// Cycles observed, for readiness and final statistics.
    scrapes: AtomicU64,
}

/// Shared handle to the sink.
pub type SharedSink = Arc<MetricsSink>;

impl MetricsSink {
    /// Create the sink and register every metric.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRIC_PREFIX);

        let power = FloatGauge::default();
        registry.register(
            "power_watts",
            "Instantaneous electric power consumption in Watts",
            power.clone(),
        );

        let current = Family::<Labels, FloatGauge>::default();
        registry.register(
            "current_amperes",
            "Instantaneous electric current in Amperes",
            current.clone(),
        );

        let last_success = FloatGauge::default();
        registry.register(
            "last_scrape_timestamp_seconds",
            "Unix timestamp of the last successful scrape",
            last_success.clone(),
        );

        let duration = Histogram::new(DURATION_BUCKETS.into_iter());
        registry.register(
            "scrape_duration_seconds",
            "Scrape duration in seconds",
            duration.clone(),
        );

        // Registered as "scrape_errors"; the encoder appends "_total".
        let errors = Family::<Labels, Counter>::default();
        registry.register(
            "scrape_errors",
            "Total number of failed scrapes, labeled by error type",
            errors.clone(),
        );
        for error_type in ScrapeOutcome::error_types() {
            errors.get_or_create(&error_labels(error_type));
        }

        Self {
            registry,
            power,
            current,
            last_success,
            duration,
            errors,
            scrapes: AtomicU64::new(0),
        }
    }

    /// Replace the value for a reading's key.
    pub fn set_reading(&self, reading: &Reading) {
        match reading {
            Reading::PowerWatts(watts) => {
                self.power.set(*watts);
            }
            Reading::CurrentAmperes { phase, value } => {
                self.current.get_or_create(&phase_labels(*phase)).set(*value);
            }
        }
    }

    /// Record the Unix time of a successful scrape.
    pub fn record_success(&self, unix_seconds: f64) {
        self.last_success.set(unix_seconds);
    }

    /// Record the wall-clock duration of one scrape cycle.
    pub fn record_duration(&self, seconds: f64) {
        self.duration.observe(seconds);
        self.scrapes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a cycle outcome. Successes are not counted as errors.
    pub fn increment_outcome(&self, outcome: ScrapeOutcome) {
        if let Some(error_type) = outcome.error_type() {
            self.errors.get_or_create(&error_labels(error_type)).inc();
        }
    }

    /// Latest instantaneous power.
    pub fn power_watts(&self) -> f64 {
        self.power.get()
    }

    /// Unix time of the last successful scrape, if any.
    pub fn last_success(&self) -> Option<f64> {
        let value = self.last_success.get();
        (value > 0.0).then_some(value)
    }

    /// Cumulative error count for a failure outcome; always 0 for success.
    pub fn error_count(&self, outcome: ScrapeOutcome) -> u64 {
        // Every failure label is created in `new`, so this never adds a series.
        outcome
            .error_type()
            .map(|error_type| self.errors.get_or_create(&error_labels(error_type)).get())
            .unwrap_or(0)
    }

    /// Number of scrape cycles recorded so far.
    pub fn scrape_count(&self) -> u64 {
        self.scrapes.load(Ordering::Relaxed)
    }

    /// Render metrics in OpenMetrics text format.
    pub fn render(&self) -> String {
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &self.registry) {
            error!(error = %e, "Failed to encode metrics");
        }
        output
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Value of the first sample line starting with `series`.
    fn sample(output: &str, series: &str) -> Option<f64> {
        output
            .lines()
            .filter(|l| !l.starts_with('#'))
            .find_map(|l| l.strip_prefix(series)?.trim().parse().ok())
    }

    #[test]
    fn test_initial_render() {
        let sink = MetricsSink::new();
        let output = sink.render();

        assert!(output.contains("# TYPE smartmeter_power_watts gauge"));
        assert!(output.contains("# TYPE smartmeter_current_amperes gauge"));
        assert!(output.contains("# TYPE smartmeter_last_scrape_timestamp_seconds gauge"));
        assert!(output.contains("# TYPE smartmeter_scrape_duration_seconds histogram"));
        assert!(output.contains("# TYPE smartmeter_scrape_errors counter"));
        assert_eq!(sample(&output, "smartmeter_power_watts"), Some(0.0));
        assert_eq!(
            sample(&output, "smartmeter_scrape_errors_total{type=\"auth\"}"),
            Some(0.0)
        );
        // Current series only exist once a reading arrived.
        assert!(!output.contains("smartmeter_current_amperes{"));
        assert!(output.trim_end().ends_with("# EOF"));
    }

    #[test]
    fn test_set_readings() {
        let sink = MetricsSink::new();
        sink.set_reading(&Reading::PowerWatts(1200.0));
        sink.set_reading(&Reading::CurrentAmperes {
            phase: Phase::R,
            value: 10.0,
        });
        sink.set_reading(&Reading::CurrentAmperes {
            phase: Phase::T,
            value: 5.0,
        });

        let output = sink.render();
        assert_eq!(sink.power_watts(), 1200.0);
        assert_eq!(sample(&output, "smartmeter_power_watts"), Some(1200.0));
        assert_eq!(
            sample(&output, "smartmeter_current_amperes{phase=\"r\"}"),
            Some(10.0)
        );
        assert_eq!(
            sample(&output, "smartmeter_current_amperes{phase=\"t\"}"),
            Some(5.0)
        );
    }

    #[test]
    fn test_last_write_wins() {
        let sink = MetricsSink::new();
        sink.set_reading(&Reading::PowerWatts(100.0));
        sink.set_reading(&Reading::PowerWatts(250.0));

        assert_eq!(sink.power_watts(), 250.0);
    }

    #[test]
    fn test_outcome_counters() {
        let sink = MetricsSink::new();
        sink.increment_outcome(ScrapeOutcome::AuthFailure);
        sink.increment_outcome(ScrapeOutcome::AuthFailure);
        sink.increment_outcome(ScrapeOutcome::ParseFailure);
        sink.increment_outcome(ScrapeOutcome::Success);

        assert_eq!(sink.error_count(ScrapeOutcome::AuthFailure), 2);
        assert_eq!(sink.error_count(ScrapeOutcome::ParseFailure), 1);
        assert_eq!(sink.error_count(ScrapeOutcome::QueryFailure), 0);
        assert_eq!(sink.error_count(ScrapeOutcome::IpResolveFailure), 0);
        assert_eq!(sink.error_count(ScrapeOutcome::Success), 0);

        let output = sink.render();
        assert_eq!(
            sample(&output, "smartmeter_scrape_errors_total{type=\"auth\"}"),
            Some(2.0)
        );
    }

    #[test]
    fn test_reading_counts_exports_only_known_series() {
        let sink = MetricsSink::new();
        for outcome in ScrapeOutcome::FAILURES {
            sink.error_count(outcome);
        }
        sink.error_count(ScrapeOutcome::Success);

        let output = sink.render();
        let series = output
            .lines()
            .filter(|l| l.starts_with("smartmeter_scrape_errors_total{"))
            .count();
        assert_eq!(series, ScrapeOutcome::FAILURES.len());
        assert!(!output.contains("type=\"\""));
    }

    #[test]
    fn test_last_success_absent_until_recorded() {
        let sink = MetricsSink::new();
        assert_eq!(sink.last_success(), None);

        sink.record_success(1_700_000_000.0);
        assert_eq!(sink.last_success(), Some(1_700_000_000.0));
    }

    #[test]
    fn test_duration_histogram() {
        let sink = MetricsSink::new();
        sink.record_duration(0.2);
        sink.record_duration(7.5);

        assert_eq!(sink.scrape_count(), 2);
        let output = sink.render();
        assert_eq!(
            sample(&output, "smartmeter_scrape_duration_seconds_count"),
            Some(2.0)
        );
        assert_eq!(
            sample(&output, "smartmeter_scrape_duration_seconds_bucket{le=\"0.25\"}"),
            Some(1.0)
        );
    }

    #[test]
    fn test_concurrent_reads_and_writes() {
        let sink = Arc::new(MetricsSink::new());

        let writer = {
            let sink = sink.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    sink.set_reading(&Reading::PowerWatts(i as f64));
                    sink.set_reading(&Reading::CurrentAmperes {
                        phase: Phase::R,
                        value: i as f64 / 10.0,
                    });
                    sink.record_duration(0.01);
                }
            })
        };

        let reader = {
            let sink = sink.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let output = sink.render();
                    let power = sample(&output, "smartmeter_power_watts").unwrap();
                    assert!((0.0..1000.0).contains(&power));
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(sink.power_watts(), 999.0);
        assert_eq!(sink.scrape_count(), 1000);
    }
}
