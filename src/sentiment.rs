//! The built-in scenario, exercising a sentiment analysis API.
//!
//! Every iteration posts a generated payload to `/api/bulk-predict`, then requests
//! `/api/health`, validating both responses with named checks. Both requests run in the
//! `Sentiment Analysis API` group.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::client::ClientResponse;
use crate::scenario::{Checks, IterationResult, Scenario, VirtualUser};

/// Group tag applied to every request and check of an iteration.
pub const GROUP: &str = "Sentiment Analysis API";
pub const BULK_PREDICT_PATH: &str = "/api/bulk-predict";
pub const HEALTH_PATH: &str = "/api/health";

/// One label predicted for one text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: String,
    pub score: f64,
}

/// Response of the bulk predict endpoint: one list of labels per posted text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkPredictResponse {
    pub predictions: Vec<Vec<Sentiment>>,
}

/// Response of the health endpoint, other fields are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

lazy_static! {
    static ref PREDICT_CHECKS: Checks = predict_checks();
    static ref HEALTH_CHECKS: Checks = health_checks();
}

/// Checks run against every bulk predict response.
pub fn predict_checks() -> Checks {
    Checks::new()
        .add("predict status is 200", |r| r.status == 200)
        .add("predict response has predictions", |r| {
            r.json_value()
                .map(|body| body.get("predictions").is_some())
                .unwrap_or(false)
        })
        .add("predict response has correct format", has_correct_format)
}

// Only the first label of the first text is inspected.
fn has_correct_format(response: &ClientResponse) -> bool {
    match response.json_value() {
        Some(body) => {
            let predictions = &body["predictions"];
            predictions.is_array()
                && predictions[0].is_array()
                && predictions[0][0]["label"].is_string()
                && predictions[0][0]["score"].is_number()
        }
        None => false,
    }
}

/// Checks run against every health response.
pub fn health_checks() -> Checks {
    Checks::new()
        .add("health status is 200", |r| r.status == 200)
        .add("health response shows healthy", |r| {
            r.json::<HealthResponse>()
                .map(|health| health.status == "healthy")
                .unwrap_or(false)
        })
}

/// Post a generated payload for prediction, then check the API is healthy.
pub async fn sentiment_analysis_api(user: &mut VirtualUser) -> IterationResult {
    let payload = user.generate_payload();
    trace!(
        "user {} posting {} payload: {:?}",
        user.id,
        payload.kind(),
        payload.texts()
    );

    user.set_group(GROUP);
    let predict = user
        .post(
            BULK_PREDICT_PATH,
            payload.to_request_body()?,
            &[("Content-Type", "application/json")],
        )
        .await?;
    user.check(&predict, &PREDICT_CHECKS)?;

    let health = user.get(HEALTH_PATH).await?;
    user.check(&health, &HEALTH_CHECKS)?;
    user.clear_group();

    Ok(())
}

/// The sentiment analysis scenario, ready to register.
///
/// # Example
/// ```rust,no_run
/// use flock::prelude::*;
///
/// fn main() -> Result<(), FlockError> {
///     let result = LoadTest::initialize()?
///         .register_scenario(flock::sentiment::scenario())
///         .execute()?;
///     assert!(result.passed());
///     Ok(())
/// }
/// ```
pub fn scenario() -> Scenario {
    Scenario::new("SentimentApi", crate::iteration!(sentiment_analysis_api))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::{Metric, CHECKS, HTTP_REQS};
    use crate::scenario::test::{user_with, StaticClient};
    use serde_json::json;
    use std::time::Duration;

    fn response(status: u16, body: serde_json::Value) -> ClientResponse {
        ClientResponse::new(status, &body.to_string(), Duration::from_millis(5))
    }

    fn passed(checks: &Checks, response: &ClientResponse) -> Vec<bool> {
        checks.iter().map(|c| (c.predicate)(response)).collect()
    }

    #[test]
    fn predict_response_checks() {
        let valid = response(
            200,
            json!({"predictions": [[{"label": "POSITIVE", "score": 0.99}]]}),
        );
        assert_eq!(passed(&predict_checks(), &valid), vec![true, true, true]);

        // Labels must be strings and scores numbers.
        let wrong_types = response(200, json!({"predictions": [[{"label": 1, "score": "high"}]]}));
        assert_eq!(
            passed(&predict_checks(), &wrong_types),
            vec![true, true, false]
        );

        // An empty prediction list has no first label to inspect.
        let empty = response(200, json!({"predictions": []}));
        assert_eq!(passed(&predict_checks(), &empty), vec![true, true, false]);

        let error = ClientResponse::new(500, "Internal Server Error", Duration::ZERO);
        assert_eq!(passed(&predict_checks(), &error), vec![false, false, false]);
    }

    #[test]
    fn health_response_checks() {
        let healthy = response(200, json!({"status": "healthy", "model": "distilbert"}));
        assert_eq!(passed(&health_checks(), &healthy), vec![true, true]);

        let unhealthy = response(503, json!({"status": "loading"}));
        assert_eq!(passed(&health_checks(), &unhealthy), vec![false, false]);
    }

    #[test]
    fn typed_responses() {
        let body = serde_json::to_string(&BulkPredictResponse {
            predictions: vec![vec![Sentiment {
                label: "NEGATIVE".to_string(),
                score: 0.75,
            }]],
        })
        .unwrap();
        let parsed: BulkPredictResponse =
            ClientResponse::new(200, &body, Duration::ZERO).json().unwrap();
        assert_eq!(parsed.predictions[0][0].label, "NEGATIVE");
    }

    #[tokio::test]
    async fn iteration_records_grouped_metrics() {
        let (mut user, receiver) = user_with(StaticClient {
            status: 200,
            body: json!({"status": "healthy"}).to_string(),
            fail: false,
        });
        sentiment_analysis_api(&mut user).await.unwrap();
        assert_eq!(user.group(), None);

        let metrics: Vec<Metric> = receiver.drain().collect();
        assert!(metrics.iter().all(|m| m.tag("group") == Some(GROUP)));
        assert_eq!(metrics.iter().filter(|m| m.name == HTTP_REQS).count(), 2);
        let checks: Vec<&Metric> = metrics.iter().filter(|m| m.name == CHECKS).collect();
        assert_eq!(checks.len(), 5);
        assert_eq!(checks[0].tag("check"), Some("predict status is 200"));
        assert_eq!(checks[4].tag("check"), Some("health response shows healthy"));
    }
}
