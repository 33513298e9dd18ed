//! The result of a completed load test.
//!
//! [`LoadTest::execute()`](../struct.LoadTest.html#method.execute) returns a [`RunResult`]
//! once every virtual user has exited. Viewed with [`std::fmt::Display`] it prints
//! tables of metrics, checks, thresholds and the stage history. It also serializes to
//! JSON, which is what `--report-file` writes.

use chrono::prelude::*;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::AsyncWriteExt;

use crate::metrics::{
    format_number, MetricRegistry, MetricSelector, MetricStore, MetricSummary, CHECKS,
};
use crate::stage::StageHistory;
use crate::threshold::{ThresholdResult, Verdict};
use crate::util;
use crate::FlockError;

/// Everything known about a completed run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    /// [`Verdict::Fail`] if any threshold failed.
    pub verdict: Verdict,
    pub thresholds: Vec<ThresholdResult>,
    /// Aggregate statistics of every metric that recorded samples.
    pub metrics: BTreeMap<String, MetricSummary>,
    /// Pass rate of each named check.
    pub checks: BTreeMap<String, MetricSummary>,
    pub history: Vec<StageHistory>,
    pub started: DateTime<Utc>,
    pub stopped: DateTime<Utc>,
    /// Seconds.
    pub duration: f64,
}
impl RunResult {
    /// Summarize a store of metrics. Thresholds are evaluated by the caller.
    pub(crate) fn new(
        store: &MetricStore,
        registry: &MetricRegistry,
        (verdict, thresholds): (Verdict, Vec<ThresholdResult>),
        history: Vec<StageHistory>,
        started: DateTime<Utc>,
    ) -> Self {
        let stopped = Utc::now();
        let elapsed = (stopped - started).to_std().unwrap_or_default();
        let mut checks = BTreeMap::new();
        if let Some(definition) = registry.get(CHECKS) {
            let names = store
                .query(CHECKS)
                .iter()
                .filter_map(|m| m.tag("check"))
                .unique()
                .map(|name| name.to_string())
                .collect::<Vec<String>>();
            for name in names {
                let selector = MetricSelector::new(CHECKS).with_tag("check", &name);
                if let Some(summary) = store.summarize(definition, &selector, elapsed) {
                    checks.insert(name, summary);
                }
            }
        }
        RunResult {
            verdict,
            thresholds,
            metrics: store.summarize_all(registry, elapsed),
            checks,
            history,
            started,
            stopped,
            duration: elapsed.as_secs_f64(),
        }
    }

    /// Returns `true` if every threshold passed.
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Thresholds that failed.
    pub fn failures(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    /// Write the result as pretty printed JSON.
    pub async fn write_json(&self, path: &str) -> Result<(), FlockError> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(serde_json::to_string_pretty(self)?.as_bytes())
            .await?;
        file.flush().await?;
        info!("wrote report to: {}", path);
        Ok(())
    }

    /// Print the result tables to stdout.
    pub fn print(&self) {
        println!("{}", self);
    }

    fn fmt_metrics(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.metrics.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            "\n === METRICS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<24} | {:<7} | Summary", "Name", "Type")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (name, summary) in &self.metrics {
            let kind = match summary {
                MetricSummary::Counter { .. } => "counter",
                MetricSummary::Gauge { .. } => "gauge",
                MetricSummary::Trend { .. } => "trend",
                MetricSummary::Rate { .. } => "rate",
            };
            writeln!(
                fmt,
                " {:<24} | {:<7} | {}",
                util::truncate_string(name, 24),
                kind,
                summary
            )?;
        }
        Ok(())
    }

    fn fmt_checks(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.checks.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            "\n === CHECKS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<40} | {:>13} | {:>14}",
            "Name", "# passes", "# fails"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (name, summary) in &self.checks {
            if let MetricSummary::Rate {
                counted,
                total,
                rate,
            } = summary
            {
                let fails = total - counted;
                writeln!(
                    fmt,
                    " {:<40} | {:>13} | {:>14}",
                    util::truncate_string(name, 40),
                    format_number(*counted),
                    format!("{} ({:.1}%)", format_number(fails), (1.0 - rate) * 100.0)
                )?;
            }
        }
        Ok(())
    }

    fn fmt_thresholds(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            "\n === THRESHOLDS ===\n ------------------------------------------------------------------------------"
        )?;
        for result in &self.thresholds {
            writeln!(fmt, " {}", result)?;
        }
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " Verdict: {}", self.verdict.to_string().to_uppercase())
    }

    fn fmt_history(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.history.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            "\n === STAGES ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<12} | {:<25} | {:>8}", "Action", "Started", "Users")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for step in &self.history {
            writeln!(
                fmt,
                " {:<12} | {:<25} | {:>8}",
                step.action.to_string(),
                step.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                format_number(step.users)
            )?;
        }
        writeln!(
            fmt,
            " Duration: {:.1} seconds ({} - {})",
            self.duration,
            self.started.format("%H:%M:%S"),
            self.stopped.format("%H:%M:%S")
        )
    }
}

/// Implement format trait to allow displaying the result.
impl fmt::Display for RunResult {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_history(fmt)?;
        self.fmt_metrics(fmt)?;
        self.fmt_checks(fmt)?;
        self.fmt_thresholds(fmt)
    }
}
