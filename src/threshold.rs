//! Pass/fail rules evaluated over the metrics of a run.
//!
//! A [`Threshold`] is parsed once, at configuration time, from a string such as
//! `http_req_duration: p(99) < 2000` into a structured selector, aggregate, comparator
//! and bound. After every virtual user has exited the [`ThresholdEvaluator`] computes
//! the aggregate over all matching samples and compares it to the bound. The run fails
//! if any threshold fails.
//!
//! Percentiles use the nearest-rank method, see [`percentile`]. Comparators are exactly
//! as written: `p(99) < 2000` fails when the 99th percentile is exactly 2000, while
//! `p(99) <= 2000` passes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::metrics::{
    percentile, MetricKind, MetricRegistry, MetricSelector, MetricStore, Polarity,
};
use crate::{FlockError, LoadTest};

/// The statistic a threshold is applied to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Aggregate {
    /// Nearest-rank percentile, `p(99)`.
    Percentile(f64),
    /// Fraction of counted samples of a rate metric.
    Rate,
    Avg,
    Min,
    Max,
    /// The 50th percentile.
    Med,
    /// Total of a counter, or the number of samples of any other metric.
    Count,
}
impl Aggregate {
    fn supports(&self, kind: MetricKind) -> bool {
        match self {
            Aggregate::Percentile(_) | Aggregate::Med => kind == MetricKind::Trend,
            Aggregate::Rate => kind == MetricKind::Rate,
            Aggregate::Avg | Aggregate::Min | Aggregate::Max => {
                matches!(kind, MetricKind::Trend | MetricKind::Gauge)
            }
            Aggregate::Count => true,
        }
    }
}

impl FromStr for Aggregate {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |detail: &str| FlockError::InvalidOption {
            option: "--threshold".to_string(),
            value: s.to_string(),
            detail: detail.to_string(),
        };
        let s = s.trim();
        match s {
            "rate" => Ok(Aggregate::Rate),
            "avg" => Ok(Aggregate::Avg),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            "med" => Ok(Aggregate::Med),
            "count" => Ok(Aggregate::Count),
            _ => {
                let percent = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|p| p.trim().parse::<f64>().ok())
                    .ok_or_else(|| {
                        invalid("expected p(N), rate, avg, min, max, med or count")
                    })?;
                if percent > 0.0 && percent <= 100.0 {
                    Ok(Aggregate::Percentile(percent))
                } else {
                    Err(invalid("percentile must be greater than 0 and at most 100"))
                }
            }
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Aggregate::Percentile(p) => write!(f, "p({})", p),
            Aggregate::Rate => write!(f, "rate"),
            Aggregate::Avg => write!(f, "avg"),
            Aggregate::Min => write!(f, "min"),
            Aggregate::Max => write!(f, "max"),
            Aggregate::Med => write!(f, "med"),
            Aggregate::Count => write!(f, "count"),
        }
    }
}

/// How the observed aggregate is compared to the bound.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum Comparator {
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessOrEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterOrEqual,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
}
impl Comparator {
    /// Returns `true` if `observed` satisfies the comparison against `bound`.
    pub fn compare(self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Less => observed < bound,
            Comparator::LessOrEqual => observed <= bound,
            Comparator::Greater => observed > bound,
            Comparator::GreaterOrEqual => observed >= bound,
            Comparator::Equal => observed == bound,
            Comparator::NotEqual => observed != bound,
        }
    }
}

/// A pass/fail rule over an aggregate statistic of a metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: MetricSelector,
    pub aggregate: Aggregate,
    pub comparator: Comparator,
    pub bound: f64,
}
impl Threshold {
    /// Build a threshold from its parts.
    ///
    /// # Example
    /// ```rust
    /// use flock::threshold::{Aggregate, Comparator, Threshold};
    ///
    /// let threshold = Threshold::new("http_req_duration", Aggregate::Percentile(99.0), Comparator::Less, 2000.0);
    /// assert_eq!(threshold, "http_req_duration: p(99) < 2000".parse().unwrap());
    /// ```
    pub fn new(metric: &str, aggregate: Aggregate, comparator: Comparator, bound: f64) -> Self {
        Threshold {
            metric: MetricSelector::new(metric),
            aggregate,
            comparator,
            bound,
        }
    }

    /// Only apply the threshold to samples carrying this tag.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.metric = self.metric.with_tag(key, value);
        self
    }

    /// Confirm the metric exists and supports the aggregate.
    pub fn validate(&self, registry: &MetricRegistry) -> Result<(), FlockError> {
        let definition =
            registry
                .get(&self.metric.name)
                .ok_or_else(|| FlockError::InvalidOption {
                    option: "--threshold".to_string(),
                    value: self.to_string(),
                    detail: format!("Unknown metric: {}.", self.metric.name),
                })?;
        if !self.aggregate.supports(definition.kind) {
            return Err(FlockError::InvalidOption {
                option: "--threshold".to_string(),
                value: self.to_string(),
                detail: format!(
                    "{} can't be applied to {}, a {} metric.",
                    self.aggregate, definition.name, definition.kind
                ),
            });
        }
        Ok(())
    }
}

/// Parse `metric{tag:value}: aggregate comparator bound`, the tag filter is optional.
impl FromStr for Threshold {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |detail: &str| FlockError::InvalidOption {
            option: "--threshold".to_string(),
            value: s.to_string(),
            detail: detail.to_string(),
        };
        let re = Regex::new(
            r"^\s*(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*(\{\s*(?P<key>[^:{}]+?)\s*:\s*(?P<value>[^{}]+?)\s*\})?\s*:\s*(?P<aggregate>[a-z]+(\(\s*[0-9.]+\s*\))?)\s*(?P<comparator><=|>=|==|!=|<|>)\s*(?P<bound>-?[0-9]+(\.[0-9]+)?)\s*$",
        )
        .map_err(|e| invalid(&e.to_string()))?;
        let cap = match re.captures(s) {
            Some(cap) => cap,
            None => {
                // Logger isn't initialized yet, provide helpful debug output.
                eprintln!("ERROR: invalid `configuration.threshold` value: '{}'", s);
                eprintln!("  Expected format: --threshold \"{{metric}}: {{aggregate}} {{comparator}} {{bound}}\"");
                eprintln!("    ie \"http_req_duration: p(99) < 2000\" or \"checks{{check:health status is 200}}: rate >= 0.99\"");
                return Err(invalid("invalid `configuration.threshold` value."));
            }
        };
        let aggregate = cap["aggregate"].parse::<Aggregate>()?;
        let comparator = Comparator::from_str(&cap["comparator"])
            .map_err(|e| invalid(&e.to_string()))?;
        let bound = cap["bound"]
            .parse::<f64>()
            .map_err(|e| invalid(&e.to_string()))?;
        let mut threshold = Threshold::new(&cap["name"], aggregate, comparator, bound);
        if let (Some(key), Some(value)) = (cap.name("key"), cap.name("value")) {
            threshold = threshold.with_tag(key.as_str(), value.as_str());
        }
        Ok(threshold)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {} {} {}",
            self.metric, self.aggregate, self.comparator, self.bound
        )
    }
}

/// An ordered list of thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds(pub Vec<Threshold>);
impl Thresholds {
    pub fn iter(&self) -> std::slice::Iter<'_, Threshold> {
        self.0.iter()
    }
}

/// 99% of requests complete below 2 seconds, and fewer than 1% fail.
impl Default for Thresholds {
    fn default() -> Self {
        Thresholds(vec![
            Threshold::new(
                crate::metrics::HTTP_REQ_DURATION,
                Aggregate::Percentile(99.0),
                Comparator::Less,
                2000.0,
            ),
            Threshold::new(
                crate::metrics::HTTP_REQ_FAILED,
                Aggregate::Rate,
                Comparator::Less,
                0.01,
            ),
        ])
    }
}

/// Thresholds are separated by semicolons.
impl FromStr for Thresholds {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let thresholds = s
            .split(';')
            .filter(|t| !t.trim().is_empty())
            .map(Threshold::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if thresholds.is_empty() {
            return Err(FlockError::InvalidOption {
                option: "--threshold".to_string(),
                value: s.to_string(),
                detail: "No thresholds defined.".to_string(),
            });
        }
        Ok(Thresholds(thresholds))
    }
}

/// The outcome of evaluating one threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub threshold: Threshold,
    /// The aggregate, or `None` if no samples matched.
    pub observed: Option<f64>,
    pub passed: bool,
    /// `observed - bound`.
    pub margin: Option<f64>,
}

impl fmt::Display for ThresholdResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        match (self.observed, self.margin) {
            (Some(observed), Some(margin)) => write!(
                f,
                "{} {} (observed {:.4}, margin {:+.4})",
                status, self.threshold, observed, margin
            ),
            _ => write!(f, "{} {} (no samples)", status, self.threshold),
        }
    }
}

/// The overall outcome of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum Verdict {
    Pass,
    Fail,
}

/// Evaluates thresholds over a read-only view of the recorded metrics.
pub struct ThresholdEvaluator<'a> {
    store: &'a MetricStore,
    registry: &'a MetricRegistry,
}
impl<'a> ThresholdEvaluator<'a> {
    pub fn new(store: &'a MetricStore, registry: &'a MetricRegistry) -> Self {
        ThresholdEvaluator { store, registry }
    }

    /// Compute the aggregate a threshold is about, `None` if no samples match.
    pub fn observe(&self, threshold: &Threshold) -> Option<f64> {
        let definition = self.registry.get(&threshold.metric.name)?;
        let values = self.store.sorted_values(&threshold.metric);
        if values.is_empty() {
            return None;
        }
        match threshold.aggregate {
            Aggregate::Percentile(p) => percentile(&values, p),
            Aggregate::Med => percentile(&values, 50.0),
            Aggregate::Avg => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregate::Min => values.first().copied(),
            Aggregate::Max => values.last().copied(),
            Aggregate::Rate => {
                let polarity = definition.polarity.unwrap_or(Polarity::CountsTrue);
                let (counted, total) = self.store.rate_counts(&threshold.metric, polarity);
                match total {
                    0 => None,
                    _ => Some(counted as f64 / total as f64),
                }
            }
            Aggregate::Count => match definition.kind {
                MetricKind::Counter => Some(
                    self.store
                        .select(&threshold.metric)
                        .map(|m| m.value.as_f64())
                        .sum(),
                ),
                _ => Some(values.len() as f64),
            },
        }
    }

    /// Evaluate a single threshold. A threshold with no matching samples fails.
    pub fn evaluate(&self, threshold: &Threshold) -> ThresholdResult {
        let observed = self.observe(threshold);
        let passed = observed
            .map(|o| threshold.comparator.compare(o, threshold.bound))
            .unwrap_or(false);
        ThresholdResult {
            threshold: threshold.clone(),
            observed,
            passed,
            margin: observed.map(|o| o - threshold.bound),
        }
    }

    /// Evaluate every threshold, the verdict fails if any of them fails.
    pub fn evaluate_all(&self, thresholds: &Thresholds) -> (Verdict, Vec<ThresholdResult>) {
        let results: Vec<ThresholdResult> = thresholds.iter().map(|t| self.evaluate(t)).collect();
        let verdict = if results.iter().all(|r| r.passed) {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        (verdict, results)
    }
}

impl LoadTest {
    pub(crate) fn evaluate_thresholds(&self, store: &MetricStore) -> (Verdict, Vec<ThresholdResult>) {
        ThresholdEvaluator::new(store, &self.registry).evaluate_all(&self.thresholds)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::{
        Metric, MetricValue, CHECKS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    };

    fn latency_store() -> MetricStore {
        let mut store = MetricStore::new();
        for ms in (100..=2000).step_by(100) {
            store.insert(Metric::new(
                HTTP_REQ_DURATION,
                MetricValue::Duration(ms as f64),
            ));
        }
        store
    }

    #[test]
    fn percentile_boundary() {
        let store = latency_store();
        let registry = MetricRegistry::default();
        let evaluator = ThresholdEvaluator::new(&store, &registry);

        // The 99th percentile of 20 samples is the largest, exactly 2000.
        let strict: Threshold = "http_req_duration: p(99) < 2000".parse().unwrap();
        let result = evaluator.evaluate(&strict);
        assert_eq!(result.observed, Some(2000.0));
        assert_eq!(result.margin, Some(0.0));
        assert!(!result.passed);

        let inclusive: Threshold = "http_req_duration: p(99) <= 2000".parse().unwrap();
        assert!(evaluator.evaluate(&inclusive).passed);

        let p95: Threshold = "http_req_duration: p(95) < 2000".parse().unwrap();
        let result = evaluator.evaluate(&p95);
        assert_eq!(result.observed, Some(1900.0));
        assert!(result.passed);

        let (verdict, results) =
            evaluator.evaluate_all(&Thresholds(vec![inclusive.clone(), strict.clone()]));
        assert_eq!(verdict, Verdict::Fail);
        assert_eq!(results.len(), 2);
        let (verdict, _) = evaluator.evaluate_all(&Thresholds(vec![inclusive, p95]));
        assert_eq!(verdict, Verdict::Pass);
    }

    #[test]
    fn rate_polarity() {
        let registry = MetricRegistry::default();
        let mut store = MetricStore::new();
        for failed in [false, false, false, true] {
            store.insert(Metric::new(HTTP_REQ_FAILED, MetricValue::Rate(failed)));
        }
        for passed in [true, true, false, true] {
            store.insert(
                Metric::new(CHECKS, MetricValue::Rate(passed))
                    .with_tag("check", if passed { "ok" } else { "broken" }),
            );
        }
        let evaluator = ThresholdEvaluator::new(&store, &registry);

        let failed: Threshold = "http_req_failed: rate < 0.01".parse().unwrap();
        let result = evaluator.evaluate(&failed);
        assert_eq!(result.observed, Some(0.25));
        assert!(!result.passed);

        let checks: Threshold = "checks: rate >= 0.75".parse().unwrap();
        assert!(evaluator.evaluate(&checks).passed);

        let broken: Threshold = "checks{check:broken}: rate > 0.5".parse().unwrap();
        assert_eq!(evaluator.evaluate(&broken).observed, Some(0.0));
        assert!(!evaluator.evaluate(&broken).passed);
    }

    #[test]
    fn no_samples_fail() {
        let registry = MetricRegistry::default();
        let store = MetricStore::new();
        let evaluator = ThresholdEvaluator::new(&store, &registry);
        let (verdict, results) = evaluator.evaluate_all(&Thresholds::default());
        assert_eq!(verdict, Verdict::Fail);
        assert!(results.iter().all(|r| r.observed.is_none() && !r.passed));
    }

    #[test]
    fn other_aggregates() {
        let registry = MetricRegistry::default();
        let mut store = latency_store();
        for _ in 0..3 {
            store.insert(Metric::new(HTTP_REQS, MetricValue::Counter(1.0)));
        }
        let evaluator = ThresholdEvaluator::new(&store, &registry);
        let observe = |s: &str| evaluator.observe(&s.parse().unwrap());
        assert_eq!(observe("http_req_duration: avg < 0"), Some(1050.0));
        assert_eq!(observe("http_req_duration: min < 0"), Some(100.0));
        assert_eq!(observe("http_req_duration: max < 0"), Some(2000.0));
        assert_eq!(observe("http_req_duration: med < 0"), Some(1000.0));
        assert_eq!(observe("http_req_duration: count < 0"), Some(20.0));
        assert_eq!(observe("http_reqs: count < 0"), Some(3.0));
    }

    #[test]
    fn parse_thresholds() {
        let threshold: Threshold = "http_req_failed: rate<0.01".parse().unwrap();
        assert_eq!(
            threshold,
            Threshold::new(HTTP_REQ_FAILED, Aggregate::Rate, Comparator::Less, 0.01)
        );

        let threshold: Threshold = " checks{check:predict status is 200} : rate >= 0.99 "
            .parse()
            .unwrap();
        assert_eq!(
            threshold.metric,
            MetricSelector::new(CHECKS).with_tag("check", "predict status is 200")
        );
        assert_eq!(threshold.comparator, Comparator::GreaterOrEqual);
        // Display parses back to the same threshold.
        assert_eq!(threshold, threshold.to_string().parse().unwrap());

        let threshold: Threshold = "http_req_duration: p(99.9) != 5".parse().unwrap();
        assert_eq!(threshold.aggregate, Aggregate::Percentile(99.9));
        assert_eq!(threshold.to_string(), "http_req_duration: p(99.9) != 5");

        let thresholds: Thresholds = "http_req_duration: p(99) < 2000; http_req_failed: rate < 0.01"
            .parse()
            .unwrap();
        assert_eq!(thresholds, Thresholds::default());
    }

    #[test]
    fn invalid_thresholds() {
        for invalid in [
            "",
            "http_req_duration",
            "http_req_duration: p(99)",
            "http_req_duration: p(99) << 2000",
            "http_req_duration: p(0) < 2000",
            "http_req_duration: p(101) < 2000",
            "http_req_duration: p99 < 2000",
            "http_req_duration: mean < 2000",
            "http_req_duration: p(99) < fast",
            "http_req_duration p(99) < 2000",
        ] {
            assert!(invalid.parse::<Threshold>().is_err(), "{}", invalid);
        }
        assert!(";".parse::<Thresholds>().is_err());
    }

    #[test]
    fn validate_against_registry() {
        let registry = MetricRegistry::default();
        let valid = |s: &str| s.parse::<Threshold>().unwrap().validate(&registry);
        assert!(valid("http_req_duration: p(99) < 2000").is_ok());
        assert!(valid("http_req_failed: rate < 0.01").is_ok());
        assert!(valid("vus: max <= 10").is_ok());
        assert!(valid("http_reqs: count > 0").is_ok());
        // Percentile on a rate metric.
        assert!(valid("http_req_failed: p(99) < 1").is_err());
        // Rate on a trend.
        assert!(valid("http_req_duration: rate < 1").is_err());
        assert!(valid("http_reqs: avg < 1").is_err());
        // Unknown metric.
        assert!(valid("http_req_latency: p(99) < 2000").is_err());
    }
}
