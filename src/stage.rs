//! Stage plan structures and functions.
//!
//! A load test is shaped by an ordered list of [`Stage`]s. Each stage lasts for a
//! duration and moves the number of virtual users from the previous stage's target
//! (or 0 for the first stage) toward its own target, ramping linearly when the two
//! differ and holding when they're equal.

use chrono::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::util;
use crate::FlockError;

/// A single stage of the load curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the stage lasts.
    pub duration: Duration,
    /// How many virtual users should be running at the end of the stage.
    pub target: usize,
}
impl Stage {
    /// Create a new stage.
    ///
    /// # Example
    /// ```rust
    /// use flock::stage::Stage;
    /// use std::time::Duration;
    ///
    /// let ramp_up = Stage::new(Duration::from_secs(30), 10);
    /// assert_eq!(ramp_up.target, 10);
    /// ```
    pub fn new(duration: Duration, target: usize) -> Self {
        Stage { duration, target }
    }
}

/// An ordered, non-empty list of [`Stage`]s.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    stages: Vec<Stage>,
}
impl StagePlan {
    /// Build a stage plan, failing if no stages are defined.
    pub fn new(stages: Vec<Stage>) -> Result<Self, FlockError> {
        if stages.is_empty() {
            return Err(FlockError::InvalidOption {
                option: "--stages".to_string(),
                value: "".to_string(),
                detail: "At least one stage must be defined.".to_string(),
            });
        }
        Ok(StagePlan { stages })
    }

    /// The stages, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// The most virtual users the plan ever asks for.
    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Returns `true` once every stage has run to completion.
    pub fn is_finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// The index of the stage running at `elapsed`, or `None` once the plan is finished.
    ///
    /// Zero-duration stages are never running, they only move the starting point of
    /// the following stage.
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            end += stage.duration;
            if elapsed < end {
                return Some(index);
            }
        }
        None
    }

    /// The number of virtual users that should be running at `elapsed`.
    ///
    /// Within a stage the target is linearly interpolated from the previous stage's
    /// target and rounded to the nearest integer. After the last stage it is 0.
    ///
    /// # Example
    /// ```rust
    /// use flock::stage::StagePlan;
    /// use std::time::Duration;
    ///
    /// let plan: StagePlan = "10,30s;10,5m;0,30s".parse().unwrap();
    /// assert_eq!(plan.target_at(Duration::from_secs(15)), 5);
    /// assert_eq!(plan.target_at(Duration::from_secs(60)), 10);
    /// assert_eq!(plan.target_at(Duration::from_secs(345)), 5);
    /// assert_eq!(plan.target_at(Duration::from_secs(360)), 0);
    /// ```
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut start = Duration::ZERO;
        let mut previous = 0;
        for stage in &self.stages {
            let end = start + stage.duration;
            if elapsed < end {
                let progress = (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                let from = previous as f64;
                let to = stage.target as f64;
                return (from + (to - from) * progress).round() as usize;
            }
            start = end;
            previous = stage.target;
        }
        0
    }

    /// Which way the curve is moving during the stage at `index`.
    pub(crate) fn action_for(&self, index: usize) -> StageAction {
        let previous = match index {
            0 => 0,
            _ => self.stages[index - 1].target,
        };
        match previous.cmp(&self.stages[index].target) {
            Ordering::Less => StageAction::Increasing,
            Ordering::Equal => StageAction::Maintaining,
            Ordering::Greater => StageAction::Decreasing,
        }
    }
}

/// Ramp to 10 users over 30 seconds, hold for 5 minutes, then ramp down over 30 seconds.
impl Default for StagePlan {
    fn default() -> Self {
        StagePlan {
            stages: vec![
                Stage::new(Duration::from_secs(30), 10),
                Stage::new(Duration::from_secs(300), 10),
                Stage::new(Duration::from_secs(30), 0),
            ],
        }
    }
}

/// Implement [`FromStr`] to convert `"target,timespan"` string formatted stage plans to
/// a [`StagePlan`].
///
/// The target is an integer number of virtual users. The time span can be specified as
/// an integer, indicating seconds, or with one or more of "h", "m", "s" and "ms", in that
/// order. Stages are separated by semicolons, white space is ignored.
impl FromStr for StagePlan {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r"^\s*(\d+)\s*,\s*(\d+|(\d+h)?(\d+m)?(\d+s)?(\d+ms)?)\s*$").map_err(
            |e| FlockError::InvalidOption {
                option: "--stages".to_string(),
                value: s.to_string(),
                detail: e.to_string(),
            },
        )?;
        let mut stages = Vec::new();
        for line in s.split(';') {
            let parsed = match re.captures(line) {
                Some(cap) => {
                    let target = cap[1].parse::<usize>().ok();
                    let duration = util::parse_timespan(&cap[2]).ok();
                    target.zip(duration)
                }
                None => None,
            };
            match parsed {
                Some((target, duration)) => stages.push(Stage::new(duration, target)),
                None => {
                    // Logger isn't initialized yet, provide helpful debug output.
                    eprintln!("ERROR: invalid `configuration.stages` value: '{}'", line);
                    eprintln!("  Expected format: --stages \"{{target}},{{timespan}};{{target}},{{timespan}}\"");
                    eprintln!("    {{target}} must be a non-negative integer, ie \"10\"");
                    eprintln!("    {{timespan}} can be integer seconds or \"30s\", \"5m\", \"1h30m\", \"500ms\", etc");
                    return Err(FlockError::InvalidOption {
                        option: "--stages".to_string(),
                        value: line.to_string(),
                        detail: "invalid `configuration.stages` value.".to_string(),
                    });
                }
            }
        }
        StagePlan::new(stages)
    }
}

impl fmt::Display for StagePlan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let stages: Vec<String> = self
            .stages
            .iter()
            .map(|s| format!("{},{}ms", s.target, s.duration.as_millis()))
            .collect();
        write!(f, "{}", stages.join(";"))
    }
}

/// The direction the load curve is moving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum StageAction {
    /// Virtual users are being launched.
    Increasing,
    /// The number of virtual users is held steady.
    Maintaining,
    /// Virtual users are being retired.
    Decreasing,
    /// The load test was canceled and all virtual users are being retired.
    Canceling,
    /// All stages completed and all virtual users exited.
    Finished,
}

/// A historical record of a change in direction of the load curve.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageHistory {
    /// What started happening.
    pub action: StageAction,
    /// When it started.
    pub timestamp: DateTime<Utc>,
    /// The number of active virtual users at that moment.
    pub users: usize,
}
impl StageHistory {
    pub(crate) fn step(action: StageAction, users: usize) -> StageHistory {
        StageHistory {
            action,
            timestamp: Utc::now(),
            users,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn default_curve() {
        let plan = StagePlan::default();
        assert_eq!(plan.total_duration(), secs(360));
        assert_eq!(plan.max_target(), 10);

        assert_eq!(plan.target_at(secs(0)), 0);
        // Mid-ramp.
        assert_eq!(plan.target_at(secs(15)), 5);
        assert_eq!(plan.target_at(secs(30)), 10);
        // Hold.
        assert_eq!(plan.target_at(secs(60)), 10);
        assert_eq!(plan.target_at(secs(329)), 10);
        // Ramp down begins at 330s, 335s is a sixth of the way down.
        assert_eq!(plan.target_at(secs(335)), 8);
        // Mid-ramp-down.
        assert_eq!(plan.target_at(secs(345)), 5);
        // Finished.
        assert_eq!(plan.target_at(secs(360)), 0);
        assert_eq!(plan.target_at(secs(3600)), 0);
        assert!(!plan.is_finished(secs(359)));
        assert!(plan.is_finished(secs(360)));
    }

    #[test]
    fn zero_duration_stage_jumps() {
        let plan: StagePlan = "20,0;20,10s;0,0".parse().unwrap();
        assert_eq!(plan.target_at(secs(0)), 20);
        assert_eq!(plan.target_at(secs(9)), 20);
        assert_eq!(plan.target_at(secs(10)), 0);
        assert_eq!(plan.stage_index_at(secs(0)), Some(1));
        assert_eq!(plan.stage_index_at(secs(10)), None);
    }

    #[test]
    fn stage_actions() {
        let plan = StagePlan::default();
        assert_eq!(plan.stage_index_at(secs(10)), Some(0));
        assert_eq!(plan.action_for(0), StageAction::Increasing);
        assert_eq!(plan.stage_index_at(secs(100)), Some(1));
        assert_eq!(plan.action_for(1), StageAction::Maintaining);
        assert_eq!(plan.stage_index_at(secs(340)), Some(2));
        assert_eq!(plan.action_for(2), StageAction::Decreasing);
    }

    #[test]
    fn parse_stages() {
        let plan: StagePlan = "10,30s;10,5m;0,30s".parse().unwrap();
        assert_eq!(plan, StagePlan::default());

        let plan: StagePlan = " 5 , 500ms ; 3,1m30s".parse().unwrap();
        assert_eq!(
            plan.stages(),
            &[
                Stage::new(Duration::from_millis(500), 5),
                Stage::new(secs(90), 3)
            ]
        );

        // The display form parses back to the same plan.
        let again: StagePlan = plan.to_string().parse().unwrap();
        assert_eq!(plan, again);
    }

    #[test]
    fn invalid_stages() {
        assert!("".parse::<StagePlan>().is_err());
        assert!("-1,30s".parse::<StagePlan>().is_err());
        assert!("10,-30s".parse::<StagePlan>().is_err());
        assert!("10".parse::<StagePlan>().is_err());
        assert!("10,30s;".parse::<StagePlan>().is_err());
        assert!("ten,30s".parse::<StagePlan>().is_err());
        assert!("10,30x".parse::<StagePlan>().is_err());
        assert!(StagePlan::new(Vec::new()).is_err());
    }
}
