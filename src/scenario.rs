//! Scenarios, checks and the virtual user state iterations run with.
//!
//! A [`Scenario`] is a named iteration function. Every virtual user runs one scenario in
//! a loop: each pass calls the iteration function with the user's [`VirtualUser`], then
//! sleeps the think time.
//!
//! ```rust
//! use flock::prelude::*;
//!
//! let scenario = Scenario::new("Health", iteration!(health));
//!
//! /// Request the health endpoint and check the response.
//! async fn health(user: &mut VirtualUser) -> IterationResult {
//!     let checks = Checks::new().add("status is 200", |r| r.status == 200);
//!     let response = user.get("/api/health").await?;
//!     user.check(&response, &checks)?;
//!     Ok(())
//! }
//! ```

use rand::rngs::StdRng;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::client::{ClientResponse, RequestClient};
use crate::metrics::{
    Metric, MetricRecorder, MetricValue, CHECKS, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    TRANSPORT_ERRORS,
};
use crate::payload::{CacheRate, PayloadGenerator, PayloadSpec};
use crate::FlockError;

/// The result of one iteration. Errors are logged and counted, never fatal.
pub type IterationResult = Result<(), FlockError>;

/// An async function run once per iteration.
pub type IterationFunction =
    for<'r> fn(&'r mut VirtualUser) -> Pin<Box<dyn Future<Output = IterationResult> + Send + 'r>>;

/// iteration!(foo) expands to Iteration::new("foo", foo), wrapping the async function.
#[macro_export]
macro_rules! iteration {
    ($iteration_func:ident) => {
        $crate::scenario::Iteration::new(stringify!($iteration_func), move |u| {
            std::boxed::Box::pin($iteration_func(u))
        })
    };
}

/// A named [`IterationFunction`].
#[derive(Clone)]
pub struct Iteration {
    pub name: String,
    pub function: IterationFunction,
}
impl Iteration {
    pub fn new(name: &str, function: IterationFunction) -> Self {
        trace!("new iteration: {}", name);
        Iteration {
            name: name.to_string(),
            function,
        }
    }
}

/// A named iteration run in a loop by virtual users.
#[derive(Clone)]
pub struct Scenario {
    pub name: String,
    pub iteration: Iteration,
    /// Overrides the configured think time for this scenario.
    pub think_time: Option<Duration>,
}
impl Scenario {
    pub fn new(name: &str, iteration: Iteration) -> Self {
        trace!("new scenario: {}", name);
        Scenario {
            name: name.to_string(),
            iteration,
            think_time: None,
        }
    }

    /// Sleep this long after every iteration instead of the configured think time.
    pub fn set_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = Some(think_time);
        self
    }
}

/// Predicate a [`Check`] evaluates against a response.
pub type CheckPredicate = Arc<dyn Fn(&ClientResponse) -> bool + Send + Sync>;

/// A named assertion about a response.
#[derive(Clone)]
pub struct Check {
    pub name: String,
    pub predicate: CheckPredicate,
}

/// An ordered list of checks, all evaluated and recorded the same way.
#[derive(Clone, Default)]
pub struct Checks {
    checks: Vec<Check>,
}
impl Checks {
    pub fn new() -> Self {
        Checks::default()
    }

    /// Register a check.
    pub fn add<F>(mut self, name: &str, predicate: F) -> Self
    where
        F: Fn(&ClientResponse) -> bool + Send + Sync + 'static,
    {
        self.checks.push(Check {
            name: name.to_string(),
            predicate: Arc::new(predicate),
        });
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Check> {
        self.checks.iter()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// The state of one virtual user, passed to every iteration it runs.
pub struct VirtualUser {
    /// Unique among all users of a run, in spawn order.
    pub id: usize,
    /// Completed iterations.
    pub iteration: usize,
    pub base_url: Url,
    /// Seeded per user.
    pub rng: StdRng,
    pub cache_rate: CacheRate,
    pub think_time: Duration,
    client: Arc<dyn RequestClient>,
    recorder: MetricRecorder,
    payloads: Arc<PayloadGenerator>,
    group: Option<String>,
}
impl VirtualUser {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        base_url: Url,
        rng: StdRng,
        cache_rate: CacheRate,
        think_time: Duration,
        client: Arc<dyn RequestClient>,
        recorder: MetricRecorder,
        payloads: Arc<PayloadGenerator>,
    ) -> Self {
        VirtualUser {
            id,
            iteration: 0,
            base_url,
            rng,
            cache_rate,
            think_time,
            client,
            recorder,
            payloads,
            group: None,
        }
    }

    /// Tag all following requests and checks with a group name.
    pub fn set_group(&mut self, name: &str) {
        self.group = Some(name.to_string());
    }

    pub fn clear_group(&mut self) {
        self.group = None;
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Build an absolute url from a path relative to the host.
    ///
    /// # Example
    /// ```rust
    /// use flock::prelude::*;
    ///
    /// async fn example(user: &mut VirtualUser) -> IterationResult {
    ///     let url = user.build_url("/api/health")?;
    ///     assert!(url.ends_with("/api/health"));
    ///     Ok(())
    /// }
    /// ```
    pub fn build_url(&self, path: &str) -> Result<String, FlockError> {
        match self.base_url.join(path) {
            Ok(url) => Ok(url.to_string()),
            Err(parse_error) => Err(FlockError::InvalidHost {
                host: self.base_url.to_string(),
                detail: format!("failed to join {}", path),
                parse_error,
            }),
        }
    }

    /// Generate a payload with this user's rng and the configured cache rate.
    pub fn generate_payload(&mut self) -> PayloadSpec {
        self.payloads.generate(self.cache_rate, &mut self.rng)
    }

    /// Record a custom metric, tagged with the current group.
    pub fn record(&self, mut metric: Metric) -> Result<(), FlockError> {
        if let Some(group) = &self.group {
            metric.tags.entry("group".to_string()).or_insert(group.to_string());
        }
        self.recorder.record(metric)
    }

    /// GET a path relative to the host.
    ///
    /// Transport failures are recorded and returned as an empty status 0 response.
    pub async fn get(&mut self, path: &str) -> Result<ClientResponse, FlockError> {
        let url = self.build_url(path)?;
        let started = std::time::Instant::now();
        let response = match self.client.get(&url).await {
            Ok(response) => response,
            Err(error) => ClientResponse::from_transport_error(error, started.elapsed()),
        };
        self.record_request("GET", path, &response)?;
        Ok(response)
    }

    /// POST a raw body to a path relative to the host.
    pub async fn post(
        &mut self,
        path: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> Result<ClientResponse, FlockError> {
        let url = self.build_url(path)?;
        let started = std::time::Instant::now();
        let response = match self.client.post(&url, body, headers).await {
            Ok(response) => response,
            Err(error) => ClientResponse::from_transport_error(error, started.elapsed()),
        };
        self.record_request("POST", path, &response)?;
        Ok(response)
    }

    /// POST a value serialized as JSON.
    pub async fn post_json<T: Serialize + ?Sized>(
        &mut self,
        path: &str,
        json: &T,
    ) -> Result<ClientResponse, FlockError> {
        let body = serde_json::to_string(json)?;
        self.post(path, body, &[("Content-Type", "application/json")])
            .await
    }

    fn record_request(
        &self,
        method: &str,
        name: &str,
        response: &ClientResponse,
    ) -> Result<(), FlockError> {
        let status = response.status.to_string();
        let tagged = |metric: Metric| {
            metric
                .with_tag("name", name)
                .with_tag("method", method)
                .with_tag("status", &status)
        };
        self.record(tagged(Metric::new(HTTP_REQS, MetricValue::Counter(1.0))))?;
        match &response.error {
            None => {
                debug!("{} {}: status {}", method, name, response.status);
                self.record(tagged(Metric::new(
                    HTTP_REQ_DURATION,
                    MetricValue::duration(response.latency),
                )))?;
            }
            Some(error) => {
                warn!("{} {}: {}", method, name, error);
                self.record(
                    tagged(Metric::new(TRANSPORT_ERRORS, MetricValue::Counter(1.0)))
                        .with_tag("error", &error.kind.to_string()),
                )?;
            }
        }
        self.record(tagged(Metric::new(
            HTTP_REQ_FAILED,
            MetricValue::Rate(!response.is_success()),
        )))
    }

    /// Run every check against a response, recording each result as a `checks` sample.
    ///
    /// Returns `true` if all checks passed. A failing check doesn't stop the others.
    pub fn check(&self, response: &ClientResponse, checks: &Checks) -> Result<bool, FlockError> {
        let mut all_passed = true;
        for check in checks.iter() {
            let passed = (check.predicate)(response);
            if !passed {
                debug!("user {}: check failed: {}", self.id, check.name);
                all_passed = false;
            }
            self.record(
                Metric::new(CHECKS, MetricValue::Rate(passed)).with_tag("check", &check.name),
            )?;
        }
        Ok(all_passed)
    }
}
