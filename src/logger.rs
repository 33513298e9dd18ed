//! Optional metrics log.
//!
//! Enabled with the `--metrics-log` run-time option, or the
//! [`FlockDefault::MetricsLog`](../config/enum.FlockDefault.html#variant.MetricsLog)
//! default configuration option. When enabled, a logger task is launched and every
//! metric the scheduler receives from virtual users is forwarded to it over a channel
//! for efficient logging to file. The logger task uses Tokio's asynchronous
//! [`BufWriter`](https://docs.rs/tokio/*/tokio/io/struct.BufWriter.html).
//!
//! The format is set with `--metrics-format`:
//!  - `json` (default): one JSON object per line
//!  - `csv`: `timestamp,name,value,tags` with tags joined as `key=value|key=value`
//!  - `raw`: the Debug output of each metric

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::metrics::Metric;
use crate::FlockError;

/// Formats the metrics log can be written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricLogFormat {
    #[default]
    Json,
    Csv,
    Raw,
}
/// Allow `--metrics-format` from the command line using text variations on supported
/// formats.
impl FromStr for MetricLogFormat {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let formats = RegexSet::new([r"(?i)^json$", r"(?i)^csv$", r"(?i)^(raw|debug)$"]).map_err(
            |e| FlockError::InvalidOption {
                option: "--metrics-format".to_string(),
                value: s.to_string(),
                detail: e.to_string(),
            },
        )?;
        let matches = formats.matches(s.trim());
        if matches.matched(0) {
            Ok(MetricLogFormat::Json)
        } else if matches.matched(1) {
            Ok(MetricLogFormat::Csv)
        } else if matches.matched(2) {
            Ok(MetricLogFormat::Raw)
        } else {
            Err(FlockError::InvalidOption {
                option: "--metrics-format".to_string(),
                value: s.to_string(),
                detail: "Invalid metrics format, expected: json, csv or raw".to_string(),
            })
        }
    }
}

impl MetricLogFormat {
    fn header(&self) -> Option<&'static str> {
        match self {
            MetricLogFormat::Csv => Some("timestamp,name,value,tags"),
            _ => None,
        }
    }

    pub(crate) fn format(&self, metric: &Metric) -> String {
        match self {
            MetricLogFormat::Json => json!(metric).to_string(),
            MetricLogFormat::Csv => {
                let tags: Vec<String> = metric
                    .tags
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect();
                format!(
                    "{},{},{},\"{}\"",
                    metric.timestamp.to_rfc3339(),
                    metric.name,
                    metric.value.as_f64(),
                    tags.join("|").replace('"', "\"\"")
                )
            }
            MetricLogFormat::Raw => format!("{:?}", metric),
        }
    }
}

/// Logger task, opens the log file and waits for metrics from the scheduler. A `None`
/// message means it's time to flush and exit.
pub(crate) async fn logger_main(
    metrics_log: String,
    format: MetricLogFormat,
    receiver: flume::Receiver<Option<Metric>>,
) -> Result<(), FlockError> {
    let file = File::create(&metrics_log).await?;
    info!("writing metrics to metrics_log: {}", &metrics_log);
    let mut metrics_file = BufWriter::with_capacity(64 * 1024, file);

    if let Some(header) = format.header() {
        metrics_file
            .write_all(format!("{}\n", header).as_bytes())
            .await?;
    }

    // Loop waiting for and writing metrics.
    while let Ok(Some(metric)) = receiver.recv_async().await {
        let formatted = format.format(&metric);
        if let Err(e) = metrics_file
            .write_all(format!("{}\n", formatted).as_bytes())
            .await
        {
            warn!("failed to write to {}: {}", &metrics_log, e);
        }
    }

    // Cleanup and flush the log to disk.
    info!("flushing metrics_log: {}", &metrics_log);
    metrics_file.flush().await?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::{MetricValue, HTTP_REQ_DURATION};

    #[test]
    fn formats() {
        assert_eq!(
            "json".parse::<MetricLogFormat>().unwrap(),
            MetricLogFormat::Json
        );
        assert_eq!("CSV".parse::<MetricLogFormat>().unwrap(), MetricLogFormat::Csv);
        assert_eq!(
            "debug".parse::<MetricLogFormat>().unwrap(),
            MetricLogFormat::Raw
        );
        assert!("xml".parse::<MetricLogFormat>().is_err());
    }

    #[test]
    fn format_metric() {
        let metric = Metric::new(HTTP_REQ_DURATION, MetricValue::Duration(12.5))
            .with_tag("method", "GET")
            .with_tag("name", "/api/health");

        let line = MetricLogFormat::Json.format(&metric);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["name"], "http_req_duration");
        assert_eq!(parsed["value"], 12.5);
        assert_eq!(parsed["tags"]["method"], "GET");

        let line = MetricLogFormat::Csv.format(&metric);
        assert!(line.ends_with(",http_req_duration,12.5,\"method=GET|name=/api/health\""));
    }

    #[tokio::test]
    async fn write_log() {
        let path = std::env::temp_dir().join(format!("flock-metrics-{}.log", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let (tx, rx) = flume::unbounded();
        let handle = tokio::spawn(logger_main(path.clone(), MetricLogFormat::Json, rx));
        for ms in [1.0, 2.0, 3.0] {
            tx.send(Some(Metric::new(HTTP_REQ_DURATION, MetricValue::Duration(ms))))
                .unwrap();
        }
        tx.send(None).unwrap();
        handle.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        std::fs::remove_file(&path).unwrap();
    }
}
