//! # Flock
//!
//! Flock drives synthetic traffic against an HTTP service to validate throughput,
//! latency and caching behavior under sustained concurrency.
//!
//! A load test is made of four pieces:
//!  - a [`StagePlan`](./stage/struct.StagePlan.html) that ramps, holds and drains
//!    virtual users over time,
//!  - one or more [`Scenario`](./scenario/struct.Scenario.html)s, async functions every
//!    virtual user runs in a loop,
//!  - named [`Checks`](./scenario/struct.Checks.html) validating each response,
//!  - [`Thresholds`](./threshold/struct.Thresholds.html) deciding whether the run passed.
//!
//! ## Creating a load test
//!
//! ```rust,no_run
//! use flock::prelude::*;
//!
//! fn main() -> Result<(), FlockError> {
//!     let result = LoadTest::initialize()?
//!         .register_scenario(Scenario::new("Health", iteration!(health)))
//!         .set_default(FlockDefault::Stages, "5,10s;5,1m;0,10s")?
//!         .execute()?;
//!
//!     if !result.passed() {
//!         std::process::exit(1);
//!     }
//!     Ok(())
//! }
//!
//! /// Request the health endpoint and validate the response.
//! async fn health(user: &mut VirtualUser) -> IterationResult {
//!     let checks = Checks::new().add("health status is 200", |r| r.status == 200);
//!     let response = user.get("/api/health").await?;
//!     user.check(&response, &checks)?;
//!     Ok(())
//! }
//! ```
//!
//! Every run-time option can be set on the command line, run with `--help` for a list.
//! Without any options, Flock ramps to 10 users over 30 seconds, holds them for 5
//! minutes, then ramps down over 30 seconds. The run fails if the 99th percentile
//! request latency reaches 2 seconds, or if 1% or more of requests fail.
//!
//! ## Metrics
//!
//! Every request records `http_reqs`, `http_req_duration` and `http_req_failed`. Every
//! check records a `checks` sample tagged with its name. Completed iterations record
//! `iterations` and `iteration_duration`. The scheduler records `vus` and `vus_max`.
//! Custom metrics can be registered with
//! [`LoadTest::register_metric`](./struct.LoadTest.html#method.register_metric) and
//! recorded with [`VirtualUser::record`](./scenario/struct.VirtualUser.html#method.record).

#[macro_use]
extern crate log;

pub mod client;
pub mod config;
pub mod logger;
pub mod metrics;
pub mod payload;
pub mod prelude;
pub mod report;
pub mod scenario;
mod scheduler;
pub mod sentiment;
pub mod stage;
pub mod threshold;
mod user;
pub mod util;

use gumdrop::Options;
use lazy_static::lazy_static;
use std::sync::{Arc, RwLock};
use std::{fmt, io};
use tokio::runtime::Runtime;

use crate::client::RequestClient;
use crate::config::{FlockConfiguration, FlockDefaults};
use crate::metrics::{MetricDefinition, MetricRegistry};
use crate::payload::PayloadGenerator;
use crate::report::RunResult;
use crate::scenario::Scenario;
use crate::threshold::Thresholds;

lazy_static! {
    /// Set to `true` when ctrl-c is caught, retiring all virtual users.
    static ref CANCELED: RwLock<bool> = RwLock::new(false);
}

/// An enumeration of all errors a [`LoadTest`](./struct.LoadTest.html) can return.
#[derive(Debug)]
pub enum FlockError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a ['tokio::task::JoinError'](https://tokio-rs.github.io/tokio/doc/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// Wraps a [`serde_json::Error`](https://docs.rs/serde_json/*/serde_json/struct.Error.html).
    Json(serde_json::Error),
    /// Failed to parse a hostname.
    InvalidHost {
        /// The invalid hostname that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// Nothing is receiving recorded metrics anymore.
    MetricsUnavailable {
        /// An optional explanation of the error.
        detail: String,
    },
    /// [`LoadTest`](./struct.LoadTest.html) has no [`Scenario`](./scenario/struct.Scenario.html) defined.
    NoScenarios {
        /// An optional explanation of the error.
        detail: String,
    },
}
/// Implement a helper to provide a text description of all possible types of errors.
impl FlockError {
    fn describe(&self) -> &str {
        match *self {
            FlockError::Io(_) => "io::Error",
            FlockError::Reqwest(_) => "reqwest::Error",
            FlockError::TokioJoin(_) => "tokio::task::JoinError",
            FlockError::Json(_) => "serde_json::Error",
            FlockError::InvalidHost { .. } => "failed to parse hostname",
            FlockError::InvalidOption { .. } => "invalid option or value specified",
            FlockError::MetricsUnavailable { .. } => "metrics are no longer being received",
            FlockError::NoScenarios { .. } => "no scenarios defined",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for FlockError {
    // Implement display of error with `{}` marker.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FlockError::Io(ref source) => write!(f, "FlockError: {} ({})", self.describe(), source),
            FlockError::Reqwest(ref source) => {
                write!(f, "FlockError: {} ({})", self.describe(), source)
            }
            FlockError::TokioJoin(ref source) => {
                write!(f, "FlockError: {} ({})", self.describe(), source)
            }
            FlockError::Json(ref source) => {
                write!(f, "FlockError: {} ({})", self.describe(), source)
            }
            FlockError::InvalidHost {
                ref parse_error, ..
            } => write!(f, "FlockError: {} ({})", self.describe(), parse_error),
            FlockError::InvalidOption {
                ref option,
                ref value,
                ref detail,
            } => write!(
                f,
                "FlockError: {} ({} = {}: {})",
                self.describe(),
                option,
                value,
                detail
            ),
            FlockError::MetricsUnavailable { ref detail }
            | FlockError::NoScenarios { ref detail } => {
                write!(f, "FlockError: {} ({})", self.describe(), detail)
            }
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for FlockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            FlockError::Io(ref source) => Some(source),
            FlockError::Reqwest(ref source) => Some(source),
            FlockError::TokioJoin(ref source) => Some(source),
            FlockError::Json(ref source) => Some(source),
            FlockError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for FlockError {
    fn from(err: reqwest::Error) -> FlockError {
        FlockError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for FlockError {
    fn from(err: io::Error) -> FlockError {
        FlockError::Io(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for FlockError {
    fn from(err: tokio::task::JoinError) -> FlockError {
        FlockError::TokioJoin(err)
    }
}

/// Auto-convert serde_json errors.
impl From<serde_json::Error> for FlockError {
    fn from(err: serde_json::Error) -> FlockError {
        FlockError::Json(err)
    }
}

/// Global internal state for the load test.
pub struct LoadTest {
    /// All scenarios, assigned to virtual users round robin as they launch.
    scenarios: Vec<Scenario>,
    /// Optional default values for Flock run-time options.
    defaults: FlockDefaults,
    /// Configuration object holding options set when launching the load test.
    configuration: FlockConfiguration,
    /// What every metric name means.
    registry: MetricRegistry,
    /// The thresholds deciding the verdict, resolved when the load test starts.
    thresholds: Thresholds,
    /// Optional request client, otherwise a reqwest client is built.
    client: Option<Arc<dyn RequestClient>>,
    payloads: Arc<PayloadGenerator>,
}
/// Flock's internal global state.
impl LoadTest {
    /// Load configuration from the command line and initialize a
    /// [`LoadTest`](./struct.LoadTest.html).
    ///
    /// # Example
    /// ```rust
    /// use flock::prelude::*;
    ///
    /// let mut load_test = LoadTest::initialize();
    /// ```
    pub fn initialize() -> Result<LoadTest, FlockError> {
        LoadTest::initialize_with_config(FlockConfiguration::parse_args_default_or_exit())
    }

    /// Initialize a [`LoadTest`](./struct.LoadTest.html) with an already loaded
    /// configuration.
    ///
    /// This is generally used by tests.
    ///
    /// # Example
    /// ```rust
    /// use flock::LoadTest;
    /// use flock::config::FlockConfiguration;
    /// use gumdrop::Options;
    ///
    /// let configuration = FlockConfiguration::parse_args_default_or_exit();
    /// let mut load_test = LoadTest::initialize_with_config(configuration);
    /// ```
    pub fn initialize_with_config(
        configuration: FlockConfiguration,
    ) -> Result<LoadTest, FlockError> {
        Ok(LoadTest {
            scenarios: Vec::new(),
            defaults: FlockDefaults::default(),
            configuration,
            registry: MetricRegistry::default(),
            thresholds: Thresholds::default(),
            client: None,
            payloads: Arc::new(PayloadGenerator::default()),
        })
    }

    /// A load test must include at least one [`Scenario`](./scenario/struct.Scenario.html).
    /// When more than one is registered, virtual users are assigned them round robin.
    ///
    /// # Example
    /// ```rust
    /// use flock::prelude::*;
    ///
    /// fn main() -> Result<(), FlockError> {
    ///     LoadTest::initialize()?
    ///         .register_scenario(Scenario::new("Example", iteration!(example_iteration)))
    ///         .register_scenario(flock::sentiment::scenario());
    ///
    ///     Ok(())
    /// }
    ///
    /// async fn example_iteration(user: &mut VirtualUser) -> IterationResult {
    ///     let _response = user.get("/foo").await?;
    ///     Ok(())
    /// }
    /// ```
    pub fn register_scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Declare a custom metric, so it is summarized and thresholds can refer to it.
    ///
    /// Rate metrics must declare a [`Polarity`](./metrics/enum.Polarity.html).
    pub fn register_metric(mut self, definition: MetricDefinition) -> Result<Self, FlockError> {
        self.registry.register(definition)?;
        Ok(self)
    }

    /// Use a custom request client instead of the default reqwest client.
    pub fn set_client(mut self, client: Arc<dyn RequestClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use custom texts for generated payloads.
    pub fn set_payload_generator(mut self, payloads: PayloadGenerator) -> Self {
        self.payloads = Arc::new(payloads);
        self
    }

    /// Execute the [`LoadTest`](./struct.LoadTest.html) load test.
    ///
    /// Returns the [`RunResult`](./report/struct.RunResult.html) once every virtual user
    /// exited. A failed threshold is not an error: check
    /// [`RunResult::passed`](./report/struct.RunResult.html#method.passed).
    ///
    /// # Example
    /// ```rust,no_run
    /// use flock::prelude::*;
    ///
    /// fn main() -> Result<(), FlockError> {
    ///     let result = LoadTest::initialize()?
    ///         .register_scenario(flock::sentiment::scenario())
    ///         .execute()?;
    ///     println!("verdict: {}", result.verdict);
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn execute(mut self) -> Result<RunResult, FlockError> {
        // If version flag is set, display package name and version and exit.
        if self.configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        // At least one scenario is required.
        if self.scenarios.is_empty() {
            return Err(FlockError::NoScenarios {
                detail: "No scenarios are defined.".to_string(),
            });
        }

        // Display scenarios, then exit.
        if self.configuration.list {
            println!("Available scenarios:");
            for scenario in &self.scenarios {
                println!(" - {} ({})", scenario.name, scenario.iteration.name);
            }
            std::process::exit(0);
        }

        // Configure FlockConfiguration.
        self.configuration.configure(&self.defaults);

        // Validate FlockConfiguration.
        self.configuration.validate()?;

        // Every threshold must refer to a registered metric it can aggregate.
        self.thresholds = self.configuration.thresholds();
        for threshold in self.thresholds.iter() {
            threshold.validate(&self.registry)?;
        }
        info!("global host configured: {}", self.configuration.host);

        let rt = Runtime::new()?;
        rt.block_on(self.run())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::Polarity;

    #[test]
    fn error_display() {
        let error = FlockError::InvalidOption {
            option: "--stages".to_string(),
            value: "x".to_string(),
            detail: "invalid".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "FlockError: invalid option or value specified (--stages = x: invalid)"
        );
        assert!(std::error::Error::source(&error).is_none());

        let parse_error = url::Url::parse("localhost").unwrap_err();
        let error = FlockError::InvalidHost {
            host: "localhost".to_string(),
            detail: String::new(),
            parse_error,
        };
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn no_scenarios() {
        let load_test = LoadTest::initialize_with_config(FlockConfiguration::default()).unwrap();
        assert!(matches!(
            load_test.execute(),
            Err(FlockError::NoScenarios { .. })
        ));
    }

    #[test]
    fn custom_metrics() {
        let load_test = LoadTest::initialize_with_config(FlockConfiguration::default())
            .unwrap()
            .register_metric(MetricDefinition::rate("cache_hits", Polarity::CountsTrue))
            .unwrap();
        assert!(load_test.registry.get("cache_hits").is_some());

        // A custom rate without a polarity is rejected.
        let mut definition = MetricDefinition::rate("misses", Polarity::CountsFalse);
        definition.polarity = None;
        assert!(LoadTest::initialize_with_config(FlockConfiguration::default())
            .unwrap()
            .register_metric(definition)
            .is_err());
    }
}
