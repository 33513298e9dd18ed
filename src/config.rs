//! Run-time options and programmatic defaults.
//!
//! Every option can be set on the command line. Most can also be given a custom default
//! with [`FlockDefaultType::set_default()`], which the command line overrides. Options
//! that are set nowhere fall back to built-in defaults: the stage plan
//! `10,30s;10,5m;0,30s`, a cache rate of 0.95, 500 ms of think time, and the thresholds
//! `http_req_duration: p(99) < 2000` and `http_req_failed: rate < 0.01`.
//!
//! The host is resolved in this order: `--host`, [`FlockDefault::Host`], the `API_URL`
//! environment variable, then `http://localhost:8000`.

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::DEFAULT_TIMEOUT;
use crate::logger::MetricLogFormat;
use crate::payload::CacheRate;
use crate::stage::StagePlan;
use crate::threshold::{Threshold, Thresholds};
use crate::util;
use crate::{FlockError, LoadTest};

/// Host used when no other host is configured.
pub const DEFAULT_HOST: &str = "http://localhost:8000";
/// Environment variable consulted for the host.
pub const HOST_ENV: &str = "API_URL";
/// Think time used when none is configured.
pub const DEFAULT_THINK_TIME: &str = "500ms";

/// Runtime options available when launching a Flock load test.
///
/// Custom defaults can be programmatically set for most of these options using
/// [`FlockDefaultType::set_default()`].
///
/// Flock leverages [`gumdrop`](https://docs.rs/gumdrop/) to derive help from the
/// below structure.
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"Flock drives staged load against an HTTP service, validates responses with
named checks, and passes or fails the run against thresholds.

The following runtime options are available when launching a Flock load test:"#
)]
pub struct FlockConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,
    /// Lists all scenarios and exits
    // Add a blank line after this option
    #[options(short = "l", help = "Lists all scenarios and exits\n")]
    pub list: bool,

    /// Defines host to load test (default: $API_URL or http://localhost:8000)
    #[options(short = "H")]
    pub host: String,
    /// Defines the stage plan ("10,30s;10,5m;0,30s")
    #[options(short = "s", meta = "\"STAGES\"")]
    pub stages: Option<StagePlan>,
    /// Sets the fraction of requests using the fixed payload (default: 0.95)
    #[options(no_short, meta = "RATE")]
    pub cache_rate: Option<CacheRate>,
    /// Sets the pause after each iteration (default: 500ms)
    #[options(no_short, meta = "TIME")]
    pub think_time: String,
    /// Adds a threshold ("http_req_duration: p(99) < 2000"), repeatable
    #[options(no_short, meta = "\"THRESHOLD\"")]
    pub threshold: Vec<Threshold>,
    /// Seeds each user's random number generator, for repeatable payloads
    #[options(no_short, meta = "SEED")]
    pub seed: Option<u64>,
    /// Sets per-request timeout, in seconds (default: 60)
    #[options(no_short, meta = "VALUE")]
    pub timeout: Option<String>,
    /// Enables log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases Flock verbosity (-q, -qq, etc)
    #[options(count, short = "q", help = "Decreases Flock verbosity (-q, -qq, etc)")]
    pub quiet: u8,
    /// Increases Flock verbosity (-v, -vv, etc)
    #[options(
        count,
        short = "v",
        // Add a blank line and then a 'Metrics:' header after this option
        help = "Increases Flock verbosity (-v, -vv, etc)\n\nMetrics:"
    )]
    pub verbose: u8,

    /// How often to optionally print running metrics, in seconds
    #[options(no_short, meta = "TIME")]
    pub running_metrics: Option<usize>,
    /// Doesn't display metrics at end of load test
    #[options(no_short)]
    pub no_print_metrics: bool,
    /// Writes every recorded metric to this file
    #[options(short = "M", meta = "NAME")]
    pub metrics_log: String,
    /// Sets metrics log format (json, csv, raw)
    #[options(no_short, meta = "FORMAT")]
    pub metrics_format: Option<MetricLogFormat>,
    /// Writes a JSON report of the run to this file
    #[options(no_short, meta = "NAME")]
    pub report_file: String,
}

/// Optional default values for Flock run-time options.
///
/// These custom defaults can be configured using [`FlockDefaultType::set_default()`].
#[derive(Clone, Debug, Default)]
pub(crate) struct FlockDefaults {
    /// An optional default host to run this load test against.
    pub host: Option<String>,
    /// An optional default stage plan.
    pub stages: Option<StagePlan>,
    /// An optional default cache rate.
    pub cache_rate: Option<CacheRate>,
    /// An optional default think time.
    pub think_time: Option<String>,
    /// Optional default thresholds.
    pub thresholds: Option<Thresholds>,
    /// An optional default seed.
    pub seed: Option<u64>,
    /// An optional default number of seconds to timeout requests.
    pub timeout: Option<String>,
    /// An optional default for the log file name.
    pub log_file: Option<String>,
    /// An optional default log level.
    pub log_level: Option<u8>,
    /// An optional default value for quiet level.
    pub quiet: Option<u8>,
    /// An optional default value for verbosity level.
    pub verbose: Option<u8>,
    /// An optional default for printing running metrics.
    pub running_metrics: Option<usize>,
    /// An optional default for not displaying metrics at the end of the load test.
    pub no_print_metrics: Option<bool>,
    /// An optional default for the metrics log file name.
    pub metrics_log: Option<String>,
    /// An optional default for the metrics log format.
    pub metrics_format: Option<MetricLogFormat>,
    /// An optional default for the JSON report file name.
    pub report_file: Option<String>,
}

/// Defines all [`FlockConfiguration`] options that can be programmatically configured
/// with a custom default.
#[derive(Debug)]
pub enum FlockDefault {
    /// An optional default host to run this load test against.
    Host,
    /// An optional default stage plan.
    Stages,
    /// An optional default cache rate.
    CacheRate,
    /// An optional default think time.
    ThinkTime,
    /// Optional default thresholds, separated by semicolons.
    Thresholds,
    /// An optional default seed.
    Seed,
    /// An optional default number of seconds to timeout requests.
    Timeout,
    /// An optional default for the log file name.
    LogFile,
    /// An optional default log level.
    LogLevel,
    /// An optional default value for quiet level.
    Quiet,
    /// An optional default value for verbosity level.
    Verbose,
    /// An optional default for printing running metrics.
    RunningMetrics,
    /// An optional default for not displaying metrics at the end of the load test.
    NoPrintMetrics,
    /// An optional default for the metrics log file name.
    MetricsLog,
    /// An optional default for the metrics log format.
    MetricsFormat,
    /// An optional default for the JSON report file name.
    ReportFile,
}

/// Most run-time options can be programmatically configured with custom defaults.
///
/// The following run-time options can be configured with a custom default using a
/// borrowed string slice ([`&str`]):
///  - [`FlockDefault::Host`]
///  - [`FlockDefault::Stages`]
///  - [`FlockDefault::ThinkTime`]
///  - [`FlockDefault::Thresholds`]
///  - [`FlockDefault::Timeout`]
///  - [`FlockDefault::LogFile`]
///  - [`FlockDefault::MetricsLog`]
///  - [`FlockDefault::ReportFile`]
///
/// The following run-time options can be configured with a custom default using a
/// [`usize`] integer:
///  - [`FlockDefault::Seed`]
///  - [`FlockDefault::LogLevel`]
///  - [`FlockDefault::Quiet`]
///  - [`FlockDefault::Verbose`]
///  - [`FlockDefault::RunningMetrics`]
///
/// The following run-time flags can be configured with a custom default using a
/// [`bool`] (and otherwise default to [`false`]):
///  - [`FlockDefault::NoPrintMetrics`]
///
/// The following run-time options can be configured with a custom default using a
/// [`f64`]:
///  - [`FlockDefault::CacheRate`]
///
/// The following run-time options can be configured with a custom default using a
/// [`MetricLogFormat`]:
///  - [`FlockDefault::MetricsFormat`]
pub trait FlockDefaultType<T> {
    /// Sets a [`FlockDefault`] to the provided value. The required type of each option
    /// is documented in [`FlockDefaultType`].
    ///
    /// # Example
    /// ```rust
    /// use flock::prelude::*;
    ///
    /// fn main() -> Result<(), FlockError> {
    ///     LoadTest::initialize()?
    ///         // Ramp to 2 users over 10 seconds, then back down.
    ///         .set_default(FlockDefault::Stages, "2,10s;0,10s")?
    ///         // Always use the fixed payload.
    ///         .set_default(FlockDefault::CacheRate, 1.0)?
    ///         // Do not display info level logs while the test runs.
    ///         .set_default(FlockDefault::Quiet, 1)?;
    ///
    ///     Ok(())
    /// }
    /// ```
    fn set_default(self, key: FlockDefault, value: T) -> Result<Box<Self>, FlockError>;
}

// A helpful and explicit error for a default set with the wrong type.
fn type_mismatch(key: FlockDefault, value: &str, expected: &str, received: &str) -> FlockError {
    FlockError::InvalidOption {
        option: format!("FlockDefault::{:?}", key),
        value: value.to_string(),
        detail: format!(
            "set_default(FlockDefault::{:?}, {}) expected {} value, received {}",
            key, value, expected, received
        ),
    }
}

impl FlockDefaultType<&str> for LoadTest {
    /// Sets [`FlockDefault`] to a [`&str`] value.
    fn set_default(mut self, key: FlockDefault, value: &str) -> Result<Box<Self>, FlockError> {
        match key {
            // Set valid defaults.
            FlockDefault::Host => {
                self.defaults.host = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            FlockDefault::Stages => self.defaults.stages = Some(value.parse::<StagePlan>()?),
            FlockDefault::ThinkTime => self.defaults.think_time = Some(value.to_string()),
            FlockDefault::Thresholds => {
                self.defaults.thresholds = Some(value.parse::<Thresholds>()?)
            }
            FlockDefault::Timeout => self.defaults.timeout = Some(value.to_string()),
            FlockDefault::LogFile => self.defaults.log_file = Some(value.to_string()),
            FlockDefault::MetricsLog => self.defaults.metrics_log = Some(value.to_string()),
            FlockDefault::ReportFile => self.defaults.report_file = Some(value.to_string()),
            // Otherwise display a helpful and explicit error.
            FlockDefault::Seed
            | FlockDefault::LogLevel
            | FlockDefault::Quiet
            | FlockDefault::Verbose
            | FlockDefault::RunningMetrics => {
                return Err(type_mismatch(key, value, "usize", "&str"))
            }
            FlockDefault::NoPrintMetrics => return Err(type_mismatch(key, value, "bool", "&str")),
            FlockDefault::CacheRate => return Err(type_mismatch(key, value, "f64", "&str")),
            FlockDefault::MetricsFormat => {
                return Err(type_mismatch(key, value, "MetricLogFormat", "&str"))
            }
        }
        Ok(Box::new(self))
    }
}
impl FlockDefaultType<usize> for LoadTest {
    /// Sets [`FlockDefault`] to a [`usize`] value.
    fn set_default(mut self, key: FlockDefault, value: usize) -> Result<Box<Self>, FlockError> {
        match key {
            FlockDefault::Seed => self.defaults.seed = Some(value as u64),
            FlockDefault::LogLevel => self.defaults.log_level = Some(value as u8),
            FlockDefault::Quiet => self.defaults.quiet = Some(value as u8),
            FlockDefault::Verbose => self.defaults.verbose = Some(value as u8),
            FlockDefault::RunningMetrics => self.defaults.running_metrics = Some(value),
            FlockDefault::Host
            | FlockDefault::Stages
            | FlockDefault::ThinkTime
            | FlockDefault::Thresholds
            | FlockDefault::Timeout
            | FlockDefault::LogFile
            | FlockDefault::MetricsLog
            | FlockDefault::ReportFile => {
                return Err(type_mismatch(key, &value.to_string(), "&str", "usize"))
            }
            FlockDefault::NoPrintMetrics => {
                return Err(type_mismatch(key, &value.to_string(), "bool", "usize"))
            }
            FlockDefault::CacheRate => {
                return Err(type_mismatch(key, &value.to_string(), "f64", "usize"))
            }
            FlockDefault::MetricsFormat => {
                return Err(type_mismatch(
                    key,
                    &value.to_string(),
                    "MetricLogFormat",
                    "usize",
                ))
            }
        }
        Ok(Box::new(self))
    }
}
impl FlockDefaultType<bool> for LoadTest {
    /// Sets [`FlockDefault`] to a [`bool`] value.
    fn set_default(mut self, key: FlockDefault, value: bool) -> Result<Box<Self>, FlockError> {
        match key {
            FlockDefault::NoPrintMetrics => self.defaults.no_print_metrics = Some(value),
            FlockDefault::CacheRate => {
                return Err(type_mismatch(key, &value.to_string(), "f64", "bool"))
            }
            FlockDefault::MetricsFormat => {
                return Err(type_mismatch(
                    key,
                    &value.to_string(),
                    "MetricLogFormat",
                    "bool",
                ))
            }
            FlockDefault::Seed
            | FlockDefault::LogLevel
            | FlockDefault::Quiet
            | FlockDefault::Verbose
            | FlockDefault::RunningMetrics => {
                return Err(type_mismatch(key, &value.to_string(), "usize", "bool"))
            }
            _ => return Err(type_mismatch(key, &value.to_string(), "&str", "bool")),
        }
        Ok(Box::new(self))
    }
}
impl FlockDefaultType<f64> for LoadTest {
    /// Sets [`FlockDefault`] to a [`f64`] value.
    fn set_default(mut self, key: FlockDefault, value: f64) -> Result<Box<Self>, FlockError> {
        match key {
            FlockDefault::CacheRate => self.defaults.cache_rate = Some(CacheRate::try_from(value)?),
            _ => return Err(type_mismatch(key, &value.to_string(), "another type", "f64")),
        }
        Ok(Box::new(self))
    }
}
impl FlockDefaultType<MetricLogFormat> for LoadTest {
    /// Sets [`FlockDefault`] to a [`MetricLogFormat`] value.
    fn set_default(
        mut self,
        key: FlockDefault,
        value: MetricLogFormat,
    ) -> Result<Box<Self>, FlockError> {
        match key {
            FlockDefault::MetricsFormat => self.defaults.metrics_format = Some(value),
            _ => {
                return Err(type_mismatch(
                    key,
                    &format!("{:?}", value),
                    "another type",
                    "MetricLogFormat",
                ))
            }
        }
        Ok(Box::new(self))
    }
}

/// Used internally to configure [`FlockConfiguration`] values based on precedence rules.
#[derive(Debug, Clone)]
pub(crate) struct FlockValue<'a, T> {
    /// The optional value to set.
    pub(crate) value: Option<T>,
    /// Filter using this value if true.
    pub(crate) filter: bool,
    /// An optional INFO level log message.
    pub(crate) message: &'a str,
}

pub(crate) trait FlockConfigure<T> {
    /// Return the first unfiltered [`FlockValue`].
    fn get_value(&self, values: Vec<FlockValue<T>>) -> Option<T>;
}

impl<T: fmt::Debug> FlockConfigure<T> for FlockConfiguration {
    fn get_value(&self, values: Vec<FlockValue<T>>) -> Option<T> {
        for value in values {
            if let Some(v) = value.value {
                if value.filter {
                    continue;
                } else {
                    if !value.message.is_empty() {
                        info!("{} = {:?}", value.message, v)
                    }
                    return Some(v);
                }
            }
        }
        None
    }
}

impl FlockConfiguration {
    /// Apply custom defaults and built-in defaults to every option not set on the
    /// command line, then initialize logging.
    pub(crate) fn configure(&mut self, defaults: &FlockDefaults) {
        // Configure `quiet`.
        self.quiet = self
            .get_value(vec![
                // Use --quiet if set.
                FlockValue {
                    value: Some(self.quiet),
                    filter: self.quiet == 0,
                    message: "",
                },
                // Otherwise use FlockDefault if set.
                FlockValue {
                    value: defaults.quiet,
                    filter: defaults.quiet.is_none(),
                    message: "",
                },
            ])
            .unwrap_or(0);

        // Configure `verbose`.
        self.verbose = self
            .get_value(vec![
                FlockValue {
                    value: Some(self.verbose),
                    filter: self.verbose == 0,
                    message: "",
                },
                FlockValue {
                    value: defaults.verbose,
                    filter: defaults.verbose.is_none(),
                    message: "",
                },
            ])
            .unwrap_or(0);

        // Configure `log_level`.
        self.log_level = self
            .get_value(vec![
                FlockValue {
                    value: Some(self.log_level),
                    filter: self.log_level == 0,
                    message: "",
                },
                FlockValue {
                    value: defaults.log_level,
                    filter: defaults.log_level.is_none(),
                    message: "",
                },
            ])
            .unwrap_or(0);

        // Configure `log_file`.
        self.log_file = self
            .get_value(vec![
                FlockValue {
                    value: Some(self.log_file.to_string()),
                    filter: self.log_file.is_empty(),
                    message: "",
                },
                FlockValue {
                    value: defaults.log_file.clone(),
                    filter: defaults.log_file.is_none(),
                    message: "",
                },
            ])
            .unwrap_or_default();

        // Initialize the logger.
        self.initialize_logger();

        // Configure `host`, the environment is only consulted at this boundary.
        let environment_host = std::env::var(HOST_ENV).ok();
        self.host = self
            .get_value(vec![
                // Use --host if set.
                FlockValue {
                    value: Some(self.host.to_string()),
                    filter: self.host.is_empty(),
                    message: "host",
                },
                // Otherwise use FlockDefault if set.
                FlockValue {
                    value: defaults.host.clone(),
                    filter: defaults.host.is_none(),
                    message: "host",
                },
                // Otherwise use $API_URL if set.
                FlockValue {
                    value: environment_host.clone(),
                    filter: environment_host
                        .as_ref()
                        .map(|h| h.trim().is_empty())
                        .unwrap_or(true),
                    message: "host (from $API_URL)",
                },
            ])
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        // Configure `stages`.
        self.stages = Some(
            self.get_value(vec![
                FlockValue {
                    value: self.stages.clone(),
                    filter: self.stages.is_none(),
                    message: "stages",
                },
                FlockValue {
                    value: defaults.stages.clone(),
                    filter: defaults.stages.is_none(),
                    message: "stages",
                },
            ])
            .unwrap_or_default(),
        );

        // Configure `cache_rate`.
        self.cache_rate = Some(
            self.get_value(vec![
                FlockValue {
                    value: self.cache_rate,
                    filter: self.cache_rate.is_none(),
                    message: "cache_rate",
                },
                FlockValue {
                    value: defaults.cache_rate,
                    filter: defaults.cache_rate.is_none(),
                    message: "cache_rate",
                },
            ])
            .unwrap_or_default(),
        );

        // Configure `think_time`.
        self.think_time = self
            .get_value(vec![
                FlockValue {
                    value: Some(self.think_time.to_string()),
                    filter: self.think_time.is_empty(),
                    message: "think_time",
                },
                FlockValue {
                    value: defaults.think_time.clone(),
                    filter: defaults.think_time.is_none(),
                    message: "think_time",
                },
            ])
            .unwrap_or_else(|| DEFAULT_THINK_TIME.to_string());

        // Configure `threshold`, thresholds from the command line replace all defaults.
        self.threshold = self
            .get_value(vec![
                FlockValue {
                    value: Some(self.threshold.clone()),
                    filter: self.threshold.is_empty(),
                    message: "thresholds",
                },
                FlockValue {
                    value: defaults.thresholds.clone().map(|t| t.0),
                    filter: defaults.thresholds.is_none(),
                    message: "thresholds",
                },
            ])
            .unwrap_or_else(|| Thresholds::default().0);

        // Configure `seed`.
        self.seed = self.get_value(vec![
            FlockValue {
                value: self.seed,
                filter: self.seed.is_none(),
                message: "seed",
            },
            FlockValue {
                value: defaults.seed,
                filter: defaults.seed.is_none(),
                message: "seed",
            },
        ]);

        // Configure `timeout`.
        self.timeout = self.get_value(vec![
            FlockValue {
                value: self.timeout.clone(),
                filter: self.timeout.is_none(),
                message: "timeout",
            },
            FlockValue {
                value: defaults.timeout.clone(),
                filter: defaults.timeout.is_none(),
                message: "timeout",
            },
        ]);

        // Configure `running_metrics`.
        self.running_metrics = self.get_value(vec![
            FlockValue {
                value: self.running_metrics,
                filter: self.running_metrics.is_none(),
                message: "running_metrics",
            },
            FlockValue {
                value: defaults.running_metrics,
                filter: defaults.running_metrics.is_none(),
                message: "running_metrics",
            },
        ]);

        // Configure `no_print_metrics`.
        self.no_print_metrics = self
            .get_value(vec![
                FlockValue {
                    value: Some(self.no_print_metrics),
                    filter: !self.no_print_metrics,
                    message: "no_print_metrics",
                },
                FlockValue {
                    value: defaults.no_print_metrics,
                    filter: defaults.no_print_metrics.is_none(),
                    message: "no_print_metrics",
                },
            ])
            .unwrap_or(false);

        // Configure `metrics_log`.
        self.metrics_log = self
            .get_value(vec![
                FlockValue {
                    value: Some(self.metrics_log.to_string()),
                    filter: self.metrics_log.is_empty(),
                    message: "metrics_log",
                },
                FlockValue {
                    value: defaults.metrics_log.clone(),
                    filter: defaults.metrics_log.is_none(),
                    message: "metrics_log",
                },
            ])
            .unwrap_or_default();

        // Configure `metrics_format`.
        self.metrics_format = self.get_value(vec![
            FlockValue {
                value: self.metrics_format,
                filter: self.metrics_format.is_none(),
                message: "metrics_format",
            },
            FlockValue {
                value: defaults.metrics_format,
                filter: defaults.metrics_format.is_none(),
                message: "metrics_format",
            },
        ]);

        // Configure `report_file`.
        self.report_file = self
            .get_value(vec![
                FlockValue {
                    value: Some(self.report_file.to_string()),
                    filter: self.report_file.is_empty(),
                    message: "report_file",
                },
                FlockValue {
                    value: defaults.report_file.clone(),
                    filter: defaults.report_file.is_none(),
                    message: "report_file",
                },
            ])
            .unwrap_or_default();
    }

    /// Validate the configured options, before any virtual user launches.
    pub(crate) fn validate(&self) -> Result<(), FlockError> {
        // Can't set both --verbose and --quiet.
        if self.verbose > 0 && self.quiet > 0 {
            return Err(FlockError::InvalidOption {
                option: "`configuration.verbose`".to_string(),
                value: self.verbose.to_string(),
                detail: "`configuration.verbose` can not be set with `configuration.quiet`."
                    .to_string(),
            });
        }

        util::is_valid_host(&self.host)?;

        // Think time must be a valid time span.
        self.think_time()?;

        // If set, timeout must be greater than zero.
        self.timeout()?;

        // Running metrics must be displayed at least once a second.
        if self.running_metrics == Some(0) {
            return Err(FlockError::InvalidOption {
                option: "`configuration.running_metrics`".to_string(),
                value: "0".to_string(),
                detail: "`configuration.running_metrics` must be at least 1.".to_string(),
            });
        }

        // A metrics format without a metrics log does nothing.
        if self.metrics_format.is_some() && self.metrics_log.is_empty() {
            return Err(FlockError::InvalidOption {
                option: "`configuration.metrics_format`".to_string(),
                value: format!("{:?}", self.metrics_format),
                detail: "`configuration.metrics_format` can not be set without `configuration.metrics_log`."
                    .to_string(),
            });
        }

        Ok(())
    }

    /// The configured think time.
    pub(crate) fn think_time(&self) -> Result<Duration, FlockError> {
        if self.think_time.is_empty() {
            return util::parse_timespan(DEFAULT_THINK_TIME);
        }
        util::parse_timespan(&self.think_time).map_err(|_| FlockError::InvalidOption {
            option: "`configuration.think_time`".to_string(),
            value: self.think_time.to_string(),
            detail: "`configuration.think_time` must be a time span such as 500ms or 2s."
                .to_string(),
        })
    }

    /// The configured per-request timeout.
    pub(crate) fn timeout(&self) -> Result<Duration, FlockError> {
        match self.timeout.as_ref() {
            None => Ok(DEFAULT_TIMEOUT),
            Some(timeout) => match util::get_float_from_string(Some(timeout.to_string())) {
                Some(seconds) if seconds > 0.0 => Duration::try_from_secs_f64(seconds)
                    .map_err(|e| FlockError::InvalidOption {
                        option: "`configuration.timeout`".to_string(),
                        value: timeout.to_string(),
                        detail: format!("`configuration.timeout` is out of range: {}.", e),
                    }),
                _ => Err(FlockError::InvalidOption {
                    option: "`configuration.timeout`".to_string(),
                    value: timeout.to_string(),
                    detail: "`configuration.timeout` must be greater than 0.".to_string(),
                }),
            },
        }
    }

    /// The configured stage plan.
    pub(crate) fn stage_plan(&self) -> StagePlan {
        self.stages.clone().unwrap_or_default()
    }

    /// The configured thresholds.
    pub(crate) fn thresholds(&self) -> Thresholds {
        if self.threshold.is_empty() {
            Thresholds::default()
        } else {
            Thresholds(self.threshold.clone())
        }
    }

    // Configure the logger, writing to stdout and optionally to a log file.
    pub(crate) fn initialize_logger(&self) {
        // Configure debug output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Open the log file if configured.
        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        // Otherwise disable the log.
        } else {
            None
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> =
            vec![SimpleLogger::new(debug_level, Config::default())];
        if let Some(log_to_file) = log_file.as_ref() {
            match std::fs::File::create(log_to_file) {
                Ok(file) => loggers.push(WriteLogger::new(log_level, Config::default(), file)),
                Err(e) => eprintln!(
                    "failed to create log file {}: {}",
                    log_to_file.display(),
                    e
                ),
            }
        }
        match CombinedLogger::init(loggers) {
            Ok(_) => (),
            Err(e) => {
                info!("failed to initialize CombinedLogger: {}", e);
            }
        }
        if let Some(log_to_file) = log_file {
            info!("Writing to log file: {}", log_to_file.display());
        }

        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}
