//! Weighted request payload generation.
//!
//! Most requests reuse a small fixed set of texts, which a caching target can answer
//! cheaply. The rest draw a few texts at random from a larger pool to exercise the
//! uncached path. The split is controlled by the [`CacheRate`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::FlockError;

/// Texts sent with every cache-friendly request.
pub const FIXED_TEXTS: [&str; 3] = ["I love you!", "I hate you!", "I am a Kubernetes Cluster!"];

/// Pool of texts sampled for long-tail requests.
pub const SAMPLE_POOL: [&str; 20] = [
    "I love you!",
    "I hate you!",
    "I am a Kubernetes Cluster!",
    "I ran to the store",
    "The students are very good in this class",
    "Working on Saturday morning is brutal",
    "How much wood could a wood chuck chuck if a wood chuck could chuck wood?",
    "A Wood chuck would chuck as much wood as a wood chuck could chuck if a wood chuck could chuck wood",
    "Food is very tasty",
    "Welcome to the thunderdome",
    "This product exceeded my expectations",
    "Customer service was terrible",
    "I'm feeling neutral about this experience",
    "The quality is outstanding",
    "I would not recommend this to anyone",
    "Best purchase I've made this year",
    "Complete waste of money",
    "It works exactly as advertised",
    "I had a problem with the delivery",
    "The interface is intuitive and user-friendly",
];

/// How many texts a sampled payload contains.
pub const SAMPLE_SIZE: usize = 3;

/// Probability that a generated payload is the fixed one, always within `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct CacheRate(f64);
impl CacheRate {
    /// The rate as a plain float.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for CacheRate {
    fn default() -> Self {
        CacheRate(0.95)
    }
}

impl TryFrom<f64> for CacheRate {
    type Error = FlockError;

    fn try_from(rate: f64) -> Result<Self, Self::Error> {
        if (0.0..=1.0).contains(&rate) {
            Ok(CacheRate(rate))
        } else {
            Err(FlockError::InvalidOption {
                option: "--cache-rate".to_string(),
                value: rate.to_string(),
                detail: "The cache rate must be between 0 and 1.".to_string(),
            })
        }
    }
}

impl From<CacheRate> for f64 {
    fn from(rate: CacheRate) -> f64 {
        rate.0
    }
}

impl FromStr for CacheRate {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rate = s
            .trim()
            .parse::<f64>()
            .map_err(|e| FlockError::InvalidOption {
                option: "--cache-rate".to_string(),
                value: s.to_string(),
                detail: format!("The cache rate must be a number: {}", e),
            })?;
        CacheRate::try_from(rate)
    }
}

impl fmt::Display for CacheRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The texts of a single request, tagged with how they were chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadSpec {
    /// The cache-friendly fixed texts.
    Fixed(Vec<String>),
    /// Texts sampled at random from the pool.
    Sampled(Vec<String>),
}
impl PayloadSpec {
    /// The texts, in request order.
    pub fn texts(&self) -> &[String] {
        match self {
            PayloadSpec::Fixed(texts) | PayloadSpec::Sampled(texts) => texts,
        }
    }

    /// Returns `true` for the fixed payload.
    pub fn is_fixed(&self) -> bool {
        matches!(self, PayloadSpec::Fixed(_))
    }

    /// A short label suitable for tagging metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PayloadSpec::Fixed(_) => "fixed",
            PayloadSpec::Sampled(_) => "sampled",
        }
    }

    /// Serialize into the request body, `{"text": [...]}`.
    pub fn to_request_body(&self) -> Result<String, FlockError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    text: &'a [String],
}

impl Serialize for PayloadSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        RequestBody { text: self.texts() }.serialize(serializer)
    }
}

/// Builds [`PayloadSpec`]s from a fixed set and a sampling pool.
#[derive(Clone, Debug)]
pub struct PayloadGenerator {
    fixed: Vec<String>,
    pool: Vec<String>,
    sample_size: usize,
}
impl PayloadGenerator {
    /// Create a generator from custom texts.
    ///
    /// The sample size must be at least 1 and no larger than the pool.
    pub fn new(
        fixed: Vec<String>,
        pool: Vec<String>,
        sample_size: usize,
    ) -> Result<Self, FlockError> {
        if sample_size == 0 || sample_size > pool.len() {
            return Err(FlockError::InvalidOption {
                option: "sample_size".to_string(),
                value: sample_size.to_string(),
                detail: format!(
                    "The sample size must be between 1 and the pool size ({}).",
                    pool.len()
                ),
            });
        }
        Ok(PayloadGenerator {
            fixed,
            pool,
            sample_size,
        })
    }

    /// The texts available for sampling.
    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    /// Generate a payload.
    ///
    /// A value `r` is drawn uniformly from `[0, 1)`. When `r >= cache_rate` the pool is
    /// shuffled and the first few texts are returned, otherwise the fixed texts are.
    /// A rate of 1 therefore always returns the fixed payload, and a rate of 0 never
    /// does.
    ///
    /// # Example
    /// ```rust
    /// use flock::payload::{CacheRate, PayloadGenerator};
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let generator = PayloadGenerator::default();
    /// let mut rng = StdRng::seed_from_u64(42);
    ///
    /// let payload = generator.generate(CacheRate::try_from(1.0).unwrap(), &mut rng);
    /// assert!(payload.is_fixed());
    ///
    /// let payload = generator.generate(CacheRate::try_from(0.0).unwrap(), &mut rng);
    /// assert_eq!(payload.texts().len(), 3);
    /// ```
    pub fn generate<R: Rng>(&self, cache_rate: CacheRate, rng: &mut R) -> PayloadSpec {
        let r: f64 = rng.random();
        if r >= cache_rate.value() {
            PayloadSpec::Sampled(self.sample(rng))
        } else {
            PayloadSpec::Fixed(self.fixed.clone())
        }
    }

    // Fisher-Yates over indices, keeping the first `sample_size` in shuffled order.
    fn sample<R: Rng>(&self, rng: &mut R) -> Vec<String> {
        let mut indices: Vec<usize> = (0..self.pool.len()).collect();
        for i in (1..indices.len()).rev() {
            let j = rng.random_range(0..=i);
            indices.swap(i, j);
        }
        indices
            .iter()
            .take(self.sample_size)
            .map(|&i| self.pool[i].clone())
            .collect()
    }
}

impl Default for PayloadGenerator {
    fn default() -> Self {
        PayloadGenerator {
            fixed: FIXED_TEXTS.iter().map(|t| t.to_string()).collect(),
            pool: SAMPLE_POOL.iter().map(|t| t.to_string()).collect(),
            sample_size: SAMPLE_SIZE,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn rate(r: f64) -> CacheRate {
        CacheRate::try_from(r).unwrap()
    }

    #[test]
    fn cache_rate_extremes() {
        let generator = PayloadGenerator::default();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1_000 {
            assert!(generator.generate(rate(1.0), &mut rng).is_fixed());
        }
        for _ in 0..1_000 {
            assert!(!generator.generate(rate(0.0), &mut rng).is_fixed());
        }
    }

    #[test]
    fn cache_rate_proportion() {
        let generator = PayloadGenerator::default();
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 10_000;
        let fixed = (0..trials)
            .filter(|_| generator.generate(rate(0.95), &mut rng).is_fixed())
            .count();
        let fraction = fixed as f64 / trials as f64;
        assert!((fraction - 0.95).abs() < 0.02, "fraction was {}", fraction);
    }

    #[test]
    fn sampled_payloads() {
        let generator = PayloadGenerator::default();
        let pool: HashSet<&String> = generator.pool().iter().collect();
        let mut rng = StdRng::seed_from_u64(11);
        let mut orders = HashSet::new();
        for _ in 0..200 {
            let payload = generator.generate(rate(0.0), &mut rng);
            let texts = payload.texts();
            assert_eq!(texts.len(), 3);
            let distinct: HashSet<&String> = texts.iter().collect();
            assert_eq!(distinct.len(), 3);
            assert!(texts.iter().all(|t| pool.contains(t)));
            orders.insert(texts.to_vec());
        }
        // Selection and order vary between draws.
        assert!(orders.len() > 1);
    }

    #[test]
    fn seeded_generation_repeats() {
        let generator = PayloadGenerator::default();
        let mut first = StdRng::seed_from_u64(99);
        let mut second = StdRng::seed_from_u64(99);
        for _ in 0..50 {
            assert_eq!(
                generator.generate(rate(0.5), &mut first),
                generator.generate(rate(0.5), &mut second)
            );
        }
    }

    #[test]
    fn request_body() {
        let fixed = PayloadGenerator::default().generate(rate(1.0), &mut StdRng::seed_from_u64(0));
        assert_eq!(
            fixed.to_request_body().unwrap(),
            r#"{"text":["I love you!","I hate you!","I am a Kubernetes Cluster!"]}"#
        );
    }

    #[test]
    fn cache_rate_bounds() {
        assert!(CacheRate::try_from(-0.1).is_err());
        assert!(CacheRate::try_from(1.1).is_err());
        assert!(CacheRate::try_from(f64::NAN).is_err());
        assert_eq!("0.5".parse::<CacheRate>().unwrap().value(), 0.5);
        assert!("half".parse::<CacheRate>().is_err());
        assert_eq!(CacheRate::default().value(), 0.95);
    }

    #[test]
    fn invalid_generator() {
        assert!(PayloadGenerator::new(vec![], vec!["a".to_string()], 2).is_err());
        assert!(PayloadGenerator::new(vec![], vec!["a".to_string()], 0).is_err());
        assert!(PayloadGenerator::new(vec![], vec!["a".to_string()], 1).is_ok());
    }
}
