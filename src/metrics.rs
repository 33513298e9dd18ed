//! Metrics recorded during load tests.
//!
//! Every virtual user holds a [`MetricRecorder`], a cheap clone of the sending half of an
//! [`unbounded Flume channel`](https://docs.rs/flume/*/flume/fn.unbounded.html). Recording
//! never blocks and never contends with other users. The scheduler drains the channel
//! into a [`MetricStore`] between ticks, so users spend all their time generating and
//! validating load.
//!
//! What a metric name means is declared in the [`MetricRegistry`]: its [`MetricKind`]
//! and, for rate metrics, its [`Polarity`].

use chrono::prelude::*;
use itertools::Itertools;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use crate::report::RunResult;
use crate::scheduler::RunState;
use crate::util;
use crate::{FlockError, LoadTest};

/// Total requests issued.
pub const HTTP_REQS: &str = "http_reqs";
/// Request latency in milliseconds, only for requests that received a response.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// `true` for every request that failed.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// `true` for every check that passed.
pub const CHECKS: &str = "checks";
/// Completed iterations.
pub const ITERATIONS: &str = "iterations";
/// Iteration latency in milliseconds, including think time.
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Active virtual users.
pub const VUS: &str = "vus";
/// The most virtual users the stage plan asks for.
pub const VUS_MAX: &str = "vus_max";
/// Requests that never received a response, tagged with `error`.
pub const TRANSPORT_ERRORS: &str = "transport_errors";

/// How samples of a metric are aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Values are summed.
    Counter,
    /// The latest value wins.
    Gauge,
    /// Values form a distribution.
    Trend,
    /// Boolean samples, aggregated as a fraction.
    Rate,
}
impl MetricKind {
    /// Rates hold booleans, every other kind holds numbers.
    pub fn accepts(&self, value: &MetricValue) -> bool {
        matches!(value, MetricValue::Rate(_)) == (*self == MetricKind::Rate)
    }
}

/// Which boolean value a rate metric counts toward its rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// The rate is the fraction of `true` samples.
    CountsTrue,
    /// The rate is the fraction of `false` samples.
    CountsFalse,
}
impl Polarity {
    fn counts(self, sample: bool) -> bool {
        match self {
            Polarity::CountsTrue => sample,
            Polarity::CountsFalse => !sample,
        }
    }
}

/// Declares what a metric name means.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub kind: MetricKind,
    /// Only set for [`MetricKind::Rate`].
    pub polarity: Option<Polarity>,
}
impl MetricDefinition {
    pub fn counter(name: &str) -> Self {
        MetricDefinition {
            name: name.to_string(),
            kind: MetricKind::Counter,
            polarity: None,
        }
    }

    pub fn gauge(name: &str) -> Self {
        MetricDefinition {
            name: name.to_string(),
            kind: MetricKind::Gauge,
            polarity: None,
        }
    }

    pub fn trend(name: &str) -> Self {
        MetricDefinition {
            name: name.to_string(),
            kind: MetricKind::Trend,
            polarity: None,
        }
    }

    pub fn rate(name: &str, polarity: Polarity) -> Self {
        MetricDefinition {
            name: name.to_string(),
            kind: MetricKind::Rate,
            polarity: Some(polarity),
        }
    }
}

/// The set of known metrics, including the built-ins.
#[derive(Clone, Debug)]
pub struct MetricRegistry {
    definitions: BTreeMap<String, MetricDefinition>,
}
impl MetricRegistry {
    /// Register a custom metric.
    ///
    /// Re-registering an identical definition is allowed, redefining a name is not.
    ///
    /// # Example
    /// ```rust
    /// use flock::metrics::{MetricDefinition, MetricRegistry, Polarity};
    ///
    /// let mut registry = MetricRegistry::default();
    /// registry.register(MetricDefinition::rate("cache_hits", Polarity::CountsTrue)).unwrap();
    /// assert!(registry.get("cache_hits").is_some());
    ///
    /// // Built-in metrics can't be redefined.
    /// assert!(registry.register(MetricDefinition::gauge("http_reqs")).is_err());
    /// ```
    pub fn register(&mut self, definition: MetricDefinition) -> Result<(), FlockError> {
        if definition.kind == MetricKind::Rate && definition.polarity.is_none() {
            return Err(FlockError::InvalidOption {
                option: "metric".to_string(),
                value: definition.name,
                detail: "Rate metrics must declare a polarity.".to_string(),
            });
        }
        if let Some(existing) = self.definitions.get(&definition.name) {
            if existing != &definition {
                return Err(FlockError::InvalidOption {
                    option: "metric".to_string(),
                    value: definition.name.to_string(),
                    detail: format!("Metric is already registered as a {}.", existing.kind),
                });
            }
        }
        self.definitions.insert(definition.name.to_string(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MetricDefinition> {
        self.definitions.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.values()
    }

    // Warn once per name about samples that will never be summarized, returns true
    // if a warning was logged.
    pub(crate) fn warn_unexpected(&self, metric: &Metric, warned: &mut HashSet<String>) -> bool {
        if warned.contains(&metric.name) {
            return false;
        }
        let problem = match self.get(&metric.name) {
            None => "is not registered".to_string(),
            Some(definition) if !definition.kind.accepts(&metric.value) => {
                format!("is a {} and can't hold {:?}", definition.kind, metric.value)
            }
            Some(_) => return false,
        };
        warn!(
            "metric {} {}, check its name and registration",
            metric.name, problem
        );
        warned.insert(metric.name.to_string());
        true
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        let definitions = [
            MetricDefinition::counter(HTTP_REQS),
            MetricDefinition::trend(HTTP_REQ_DURATION),
            MetricDefinition::rate(HTTP_REQ_FAILED, Polarity::CountsTrue),
            MetricDefinition::rate(CHECKS, Polarity::CountsTrue),
            MetricDefinition::counter(ITERATIONS),
            MetricDefinition::trend(ITERATION_DURATION),
            MetricDefinition::gauge(VUS),
            MetricDefinition::gauge(VUS_MAX),
            MetricDefinition::counter(TRANSPORT_ERRORS),
        ];
        MetricRegistry {
            definitions: definitions
                .into_iter()
                .map(|d| (d.name.to_string(), d))
                .collect(),
        }
    }
}

/// A single recorded value.
///
/// Serialized untagged for the metrics log, so it can't be read back.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    /// Milliseconds.
    Duration(f64),
    Rate(bool),
}
impl MetricValue {
    /// A duration sample, in milliseconds.
    pub fn duration(elapsed: Duration) -> Self {
        MetricValue::Duration(elapsed.as_secs_f64() * 1_000.0)
    }

    /// The value as a float, rates are 1.0 for `true`.
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Counter(v) | MetricValue::Gauge(v) | MetricValue::Duration(v) => v,
            MetricValue::Rate(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// One immutable sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}
impl Metric {
    pub fn new(name: &str, value: MetricValue) -> Self {
        Metric {
            name: name.to_string(),
            value,
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Add a tag to the metric.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|v| v.as_str())
    }
}

/// Records metrics from any number of concurrent virtual users.
#[derive(Clone, Debug)]
pub struct MetricRecorder {
    sender: flume::Sender<Metric>,
}
impl MetricRecorder {
    /// Create a recorder and the receiver metrics are drained from.
    pub fn channel() -> (MetricRecorder, flume::Receiver<Metric>) {
        let (sender, receiver) = flume::unbounded();
        (MetricRecorder { sender }, receiver)
    }

    /// Record a metric without blocking.
    ///
    /// Fails with [`FlockError::MetricsUnavailable`] if nothing is receiving metrics
    /// anymore, the metric is never silently dropped.
    pub fn record(&self, metric: Metric) -> Result<(), FlockError> {
        self.sender
            .send(metric)
            .map_err(|e| FlockError::MetricsUnavailable {
                detail: format!("failed to record {}: receiver is gone", e.into_inner().name),
            })
    }
}

/// Selects the samples of one metric, optionally only those with a matching tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSelector {
    pub name: String,
    pub tag: Option<(String, String)>,
}
impl MetricSelector {
    pub fn new(name: &str) -> Self {
        MetricSelector {
            name: name.to_string(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tag = Some((key.to_string(), value.to_string()));
        self
    }

    pub fn matches(&self, metric: &Metric) -> bool {
        metric.name == self.name
            && match &self.tag {
                Some((key, value)) => metric.tag(key) == Some(value.as_str()),
                None => true,
            }
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.tag {
            Some((key, value)) => write!(f, "{}{{{}:{}}}", self.name, key, value),
            None => write!(f, "{}", self.name),
        }
    }
}

/// All metrics received during a run, grouped by name.
#[derive(Clone, Debug, Default)]
pub struct MetricStore {
    samples: HashMap<String, Vec<Metric>>,
}
impl MetricStore {
    pub fn new() -> Self {
        MetricStore::default()
    }

    pub fn insert(&mut self, metric: Metric) {
        self.samples
            .entry(metric.name.to_string())
            .or_default()
            .push(metric);
    }

    /// All samples recorded for a name, in the order they were received.
    pub fn query(&self, name: &str) -> &[Metric] {
        self.samples.get(name).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// All samples matching a selector.
    pub fn select<'a>(&'a self, selector: &'a MetricSelector) -> impl Iterator<Item = &'a Metric> {
        self.query(&selector.name)
            .iter()
            .filter(move |m| selector.matches(m))
    }

    /// The numeric values matching a selector, sorted ascending.
    pub fn sorted_values(&self, selector: &MetricSelector) -> Vec<f64> {
        self.select(selector)
            .map(|m| m.value.as_f64())
            .sorted_by(|a, b| a.total_cmp(b))
            .collect()
    }

    /// Number of samples counted toward the rate and the total, for rate metrics.
    pub fn rate_counts(&self, selector: &MetricSelector, polarity: Polarity) -> (usize, usize) {
        let mut counted = 0;
        let mut total = 0;
        for metric in self.select(selector) {
            if let MetricValue::Rate(sample) = metric.value {
                total += 1;
                if polarity.counts(sample) {
                    counted += 1;
                }
            }
        }
        (counted, total)
    }

    /// Total number of samples in the store.
    pub fn len(&self) -> usize {
        self.samples.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate the samples matching a selector, `None` if there are none.
    pub fn summarize(
        &self,
        definition: &MetricDefinition,
        selector: &MetricSelector,
        elapsed: Duration,
    ) -> Option<MetricSummary> {
        let values = self.sorted_values(selector);
        if values.is_empty() {
            return None;
        }
        let summary = match definition.kind {
            MetricKind::Counter => {
                let total: f64 = values.iter().sum();
                let seconds = elapsed.as_secs_f64();
                MetricSummary::Counter {
                    count: values.len(),
                    total,
                    per_second: if seconds > 0.0 { total / seconds } else { 0.0 },
                }
            }
            MetricKind::Gauge => {
                let value = self
                    .select(selector)
                    .max_by_key(|m| m.timestamp)
                    .map(|m| m.value.as_f64())
                    .unwrap_or_default();
                MetricSummary::Gauge {
                    value,
                    min: values[0],
                    max: values[values.len() - 1],
                }
            }
            MetricKind::Trend => MetricSummary::Trend {
                count: values.len(),
                avg: values.iter().sum::<f64>() / values.len() as f64,
                min: values[0],
                med: percentile(&values, 50.0).unwrap_or_default(),
                max: values[values.len() - 1],
                p90: percentile(&values, 90.0).unwrap_or_default(),
                p95: percentile(&values, 95.0).unwrap_or_default(),
                p99: percentile(&values, 99.0).unwrap_or_default(),
            },
            MetricKind::Rate => {
                let (counted, total) = self.rate_counts(
                    selector,
                    definition.polarity.unwrap_or(Polarity::CountsTrue),
                );
                // Only non-boolean samples were recorded under this name.
                if total == 0 {
                    return None;
                }
                MetricSummary::Rate {
                    counted,
                    total,
                    rate: counted as f64 / total as f64,
                }
            }
        };
        Some(summary)
    }

    /// Aggregate every registered metric that recorded at least one sample.
    pub fn summarize_all(
        &self,
        registry: &MetricRegistry,
        elapsed: Duration,
    ) -> BTreeMap<String, MetricSummary> {
        registry
            .definitions()
            .filter_map(|definition| {
                self.summarize(definition, &MetricSelector::new(&definition.name), elapsed)
                    .map(|summary| (definition.name.to_string(), summary))
            })
            .collect()
    }
}

/// Aggregate statistics of one metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Counter {
        count: usize,
        total: f64,
        per_second: f64,
    },
    Gauge {
        value: f64,
        min: f64,
        max: f64,
    },
    Trend {
        count: usize,
        avg: f64,
        min: f64,
        med: f64,
        max: f64,
        p90: f64,
        p95: f64,
        p99: f64,
    },
    Rate {
        counted: usize,
        total: usize,
        rate: f64,
    },
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MetricSummary::Counter {
                total, per_second, ..
            } => write!(
                f,
                "{} ({:.2}/s)",
                format_number(*total as usize),
                per_second
            ),
            MetricSummary::Gauge { value, min, max } => {
                write!(f, "{} (min {}, max {})", value, min, max)
            }
            MetricSummary::Trend {
                avg,
                min,
                med,
                max,
                p90,
                p95,
                p99,
                ..
            } => write!(
                f,
                "avg={:.2} min={:.2} med={:.2} max={:.2} p(90)={:.2} p(95)={:.2} p(99)={:.2}",
                avg, min, med, max, p90, p95, p99
            ),
            MetricSummary::Rate {
                counted,
                total,
                rate,
            } => write!(
                f,
                "{:.2}% ({} of {})",
                rate * 100.0,
                format_number(*counted),
                format_number(*total)
            ),
        }
    }
}

/// Nearest-rank percentile of ascending `sorted` values.
///
/// The rank is `ceil(percent / 100 * n)`, 1-based, so the result is always one of the
/// samples. Returns `None` when there are no samples.
///
/// # Example
/// ```rust
/// use flock::metrics::percentile;
///
/// let values: Vec<f64> = (1..=20).map(|v| (v * 100) as f64).collect();
/// assert_eq!(percentile(&values, 99.0), Some(2000.0));
/// assert_eq!(percentile(&values, 50.0), Some(1000.0));
/// assert_eq!(percentile(&[], 50.0), None);
/// ```
pub fn percentile(sorted: &[f64], percent: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (percent * sorted.len() as f64 / 100.0).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}

/// Format large number in locale appropriate style.
pub(crate) fn format_number(number: usize) -> String {
    (number).to_formatted_string(&Locale::en)
}

impl LoadTest {
    // Receive metrics from virtual users. If flush is true all metrics are received
    // regardless of how long it takes. If flush is false, metrics are only received
    // for up to 400 ms before returning, to continue on the next call.
    pub(crate) async fn sync_metrics(
        &mut self,
        run_state: &mut RunState,
        flush: bool,
    ) -> Result<(), FlockError> {
        let received = self.receive_metrics(run_state, flush).await?;
        if received > 0 {
            trace!("received {} metrics", received);
        }

        // Periodically display running metrics.
        if let Some(running_metrics) = self.configuration.running_metrics {
            if util::timer_expired(run_state.running_metrics_timer, running_metrics) {
                run_state.running_metrics_timer = std::time::Instant::now();
                self.print_running(run_state);
            }
        }
        Ok(())
    }

    async fn receive_metrics(
        &mut self,
        run_state: &mut RunState,
        flush: bool,
    ) -> Result<usize, FlockError> {
        let mut received = 0;

        // The scheduler wakes up every 100 ms, so don't spend more than 400 ms receiving
        // metrics unless flushing.
        let receive_timeout = 400;
        let receive_started = std::time::Instant::now();

        while let Ok(metric) = run_state.metrics_rx.try_recv() {
            received += 1;
            if let Some(logger) = run_state.logger_tx.as_ref() {
                if logger.send(Some(metric.clone())).is_err() {
                    warn!("metrics log is no longer receiving, disabling");
                    run_state.logger_tx = None;
                }
            }
            self.registry
                .warn_unexpected(&metric, &mut run_state.unexpected_metrics);
            run_state.store.insert(metric);
            if !flush && util::ms_timer_expired(receive_started, receive_timeout) {
                break;
            }
        }
        Ok(received)
    }

    // Display a running summary and interim threshold status.
    fn print_running(&self, run_state: &RunState) {
        let running = RunResult::new(
            &run_state.store,
            &self.registry,
            self.evaluate_thresholds(&run_state.store),
            run_state.history.clone(),
            run_state.started_at,
        );
        info!(
            "printing running metrics after {} seconds...",
            run_state.started.elapsed().as_secs()
        );
        running.print();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nearest_rank_percentile() {
        let values: Vec<f64> = (1..=20).map(|v| (v * 100) as f64).collect();
        assert_eq!(percentile(&values, 99.0), Some(2000.0));
        assert_eq!(percentile(&values, 95.0), Some(1900.0));
        assert_eq!(percentile(&values, 90.0), Some(1800.0));
        assert_eq!(percentile(&values, 50.0), Some(1000.0));
        assert_eq!(percentile(&values, 0.0), Some(100.0));
        assert_eq!(percentile(&values, 100.0), Some(2000.0));

        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&values, 99.0), Some(99.0));
        assert_eq!(percentile(&values, 99.9), Some(100.0));
        assert_eq!(percentile(&[42.0], 99.0), Some(42.0));
        assert_eq!(percentile(&[], 99.0), None);
    }

    #[test]
    fn concurrent_recorders() {
        let (recorder, receiver) = MetricRecorder::channel();
        let writers = 16;
        let per_writer = 500;
        let handles: Vec<_> = (0..writers)
            .map(|writer| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for i in 0..per_writer {
                        recorder
                            .record(
                                Metric::new(HTTP_REQS, MetricValue::Counter(1.0))
                                    .with_tag("writer", &writer.to_string())
                                    .with_tag("sequence", &i.to_string()),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(recorder);

        let mut store = MetricStore::new();
        for metric in receiver.drain() {
            store.insert(metric);
        }
        assert_eq!(store.len(), writers * per_writer);

        // No duplicates.
        let unique: std::collections::HashSet<(String, String)> = store
            .query(HTTP_REQS)
            .iter()
            .map(|m| {
                (
                    m.tag("writer").unwrap().to_string(),
                    m.tag("sequence").unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(unique.len(), writers * per_writer);
    }

    #[test]
    fn record_without_receiver() {
        let (recorder, receiver) = MetricRecorder::channel();
        drop(receiver);
        let result = recorder.record(Metric::new(ITERATIONS, MetricValue::Counter(1.0)));
        assert!(matches!(
            result,
            Err(FlockError::MetricsUnavailable { .. })
        ));
    }

    #[test]
    fn summaries() {
        let registry = MetricRegistry::default();
        let mut store = MetricStore::new();
        for ms in [100.0, 200.0, 300.0, 400.0] {
            store.insert(Metric::new(HTTP_REQ_DURATION, MetricValue::Duration(ms)));
            store.insert(Metric::new(HTTP_REQS, MetricValue::Counter(1.0)));
        }
        store.insert(Metric::new(HTTP_REQ_FAILED, MetricValue::Rate(false)));
        store.insert(Metric::new(HTTP_REQ_FAILED, MetricValue::Rate(true)));
        store.insert(Metric::new(HTTP_REQ_FAILED, MetricValue::Rate(false)));
        store.insert(Metric::new(HTTP_REQ_FAILED, MetricValue::Rate(false)));

        let summaries = store.summarize_all(&registry, Duration::from_secs(2));
        assert_eq!(summaries.len(), 3);
        assert_eq!(
            summaries[HTTP_REQS],
            MetricSummary::Counter {
                count: 4,
                total: 4.0,
                per_second: 2.0
            }
        );
        assert_eq!(
            summaries[HTTP_REQ_FAILED],
            MetricSummary::Rate {
                counted: 1,
                total: 4,
                rate: 0.25
            }
        );
        match &summaries[HTTP_REQ_DURATION] {
            MetricSummary::Trend {
                count,
                avg,
                min,
                med,
                max,
                ..
            } => {
                assert_eq!(*count, 4);
                assert_eq!(*avg, 250.0);
                assert_eq!(*min, 100.0);
                assert_eq!(*med, 200.0);
                assert_eq!(*max, 400.0);
            }
            other => panic!("unexpected summary: {:?}", other),
        }
    }

    #[test]
    fn tagged_selection() {
        let mut store = MetricStore::new();
        store.insert(Metric::new(CHECKS, MetricValue::Rate(true)).with_tag("check", "a"));
        store.insert(Metric::new(CHECKS, MetricValue::Rate(false)).with_tag("check", "b"));
        store.insert(Metric::new(CHECKS, MetricValue::Rate(true)).with_tag("check", "b"));

        let all = MetricSelector::new(CHECKS);
        assert_eq!(store.rate_counts(&all, Polarity::CountsTrue), (2, 3));
        let b = MetricSelector::new(CHECKS).with_tag("check", "b");
        assert_eq!(store.rate_counts(&b, Polarity::CountsTrue), (1, 2));
        assert_eq!(store.rate_counts(&b, Polarity::CountsFalse), (1, 2));
        assert_eq!(b.to_string(), "checks{check:b}");
        assert!(store.query("unknown").is_empty());
    }

    #[test]
    fn registry() {
        let mut registry = MetricRegistry::default();
        assert_eq!(registry.get(CHECKS).unwrap().kind, MetricKind::Rate);
        assert_eq!(
            registry.get(HTTP_REQ_FAILED).unwrap().polarity,
            Some(Polarity::CountsTrue)
        );
        // Identical re-registration is fine.
        registry.register(MetricDefinition::trend(HTTP_REQ_DURATION)).unwrap();
        assert!(registry
            .register(MetricDefinition::counter(HTTP_REQ_DURATION))
            .is_err());
        assert!(registry
            .register(MetricDefinition {
                name: "custom".to_string(),
                kind: MetricKind::Rate,
                polarity: None
            })
            .is_err());
    }

    #[test]
    fn logged_values_are_bare() {
        let duration = serde_json::to_value(Metric::new(
            HTTP_REQ_DURATION,
            MetricValue::Duration(12.5),
        ))
        .unwrap();
        assert_eq!(duration["value"], serde_json::json!(12.5));
        let failed =
            serde_json::to_value(Metric::new(HTTP_REQ_FAILED, MetricValue::Rate(true))).unwrap();
        assert_eq!(failed["value"], serde_json::json!(true));
        assert_eq!(failed["name"], HTTP_REQ_FAILED);
    }

    #[test]
    fn rate_without_booleans() {
        let mut registry = MetricRegistry::default();
        registry
            .register(MetricDefinition::rate("cache_hits", Polarity::CountsTrue))
            .unwrap();
        let mut store = MetricStore::new();
        store.insert(Metric::new("cache_hits", MetricValue::Counter(1.0)));

        let definition = registry.get("cache_hits").unwrap();
        let selector = MetricSelector::new("cache_hits");
        assert_eq!(
            store.summarize(definition, &selector, Duration::from_secs(1)),
            None
        );
        assert!(!store
            .summarize_all(&registry, Duration::from_secs(1))
            .contains_key("cache_hits"));
    }

    #[test]
    fn unexpected_metrics_warn_once() {
        let registry = MetricRegistry::default();
        let mut warned = HashSet::new();

        // Registered and well typed.
        let ok = Metric::new(HTTP_REQS, MetricValue::Counter(1.0));
        assert!(!registry.warn_unexpected(&ok, &mut warned));

        // A typo in a custom metric name.
        let typo = Metric::new("cache_hist", MetricValue::Rate(true));
        assert!(registry.warn_unexpected(&typo, &mut warned));
        assert!(!registry.warn_unexpected(&typo, &mut warned));

        // A boolean recorded under a counter.
        let mismatch = Metric::new(ITERATIONS, MetricValue::Rate(true));
        assert!(registry.warn_unexpected(&mismatch, &mut warned));
        assert!(!registry.warn_unexpected(&mismatch, &mut warned));
        assert_eq!(warned.len(), 2);

        assert!(MetricKind::Rate.accepts(&MetricValue::Rate(false)));
        assert!(!MetricKind::Rate.accepts(&MetricValue::Counter(1.0)));
        assert!(MetricKind::Trend.accepts(&MetricValue::Duration(3.0)));
        assert!(!MetricKind::Gauge.accepts(&MetricValue::Rate(true)));
    }

    #[test]
    fn number_format() {
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
