//! Useful definitions for writing load tests, pulled in with `use flock::prelude::*;`.

pub use crate::client::{ClientResponse, RequestClient};
pub use crate::config::{FlockDefault, FlockDefaultType};
pub use crate::metrics::{Metric, MetricDefinition, MetricValue, Polarity};
pub use crate::payload::{CacheRate, PayloadGenerator, PayloadSpec};
pub use crate::report::RunResult;
pub use crate::scenario::{Checks, Iteration, IterationFunction, IterationResult, Scenario, VirtualUser};
pub use crate::threshold::{Threshold, Thresholds, Verdict};
pub use crate::{iteration, FlockError, LoadTest};
