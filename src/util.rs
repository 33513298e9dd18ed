//! Utility functions used by Flock, and available when writing load tests.

use regex::Regex;
use std::str::FromStr;
use std::time::{self, Duration};
use url::Url;

use crate::{FlockError, CANCELED};

/// Parse a string representing a time span and return it as a [`Duration`].
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", "s" and "ms", in that order, indicating
/// "hours", "minutes", "seconds" and "milliseconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, 500ms, 1s250ms, etc.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use flock::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s").unwrap(), Duration::from_secs(3_723));
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45").unwrap(), Duration::from_secs(45));
///
/// // Half a second.
/// assert_eq!(util::parse_timespan("500ms").unwrap(), Duration::from_millis(500));
///
/// // Invalid values are rejected.
/// assert!(util::parse_timespan("foo").is_err());
/// ```
pub fn parse_timespan(time_str: &str) -> Result<Duration, FlockError> {
    let time_str = time_str.trim();
    // If an integer is passed in, assume it's seconds
    if let Ok(t) = u64::from_str(time_str) {
        trace!("{} is integer: {} seconds", time_str, t);
        return Ok(Duration::from_secs(t));
    }

    // Otherwise use a regex to extract hours, minutes, seconds and milliseconds from string.
    let re = Regex::new(
        r"^((?P<hours>\d+)h)?((?P<minutes>\d+)m)?((?P<seconds>\d+)s)?((?P<millis>\d+)ms)?$",
    )
    .map_err(|e| invalid_timespan(time_str, &e.to_string()))?;
    let time_matches = match re.captures(time_str) {
        Some(c) if !time_str.is_empty() => c,
        _ => {
            return Err(invalid_timespan(
                time_str,
                "expected a format such as 30s, 5m, 1h30m or 500ms",
            ))
        }
    };
    let component = |name: &str| -> Result<u64, FlockError> {
        match time_matches.name(name) {
            Some(m) => u64::from_str(m.as_str()).map_err(|e| invalid_timespan(time_str, &e.to_string())),
            None => Ok(0),
        }
    };
    let hours = component("hours")?;
    let minutes = component("minutes")?;
    let seconds = component("seconds")?;
    let millis = component("millis")?;
    let total = Duration::from_secs(hours * 60 * 60 + minutes * 60 + seconds)
        + Duration::from_millis(millis);
    trace!(
        "{} hours {} minutes {} seconds {} milliseconds: {:?}",
        hours,
        minutes,
        seconds,
        millis,
        total
    );
    Ok(total)
}

fn invalid_timespan(value: &str, detail: &str) -> FlockError {
    FlockError::InvalidOption {
        option: "timespan".to_string(),
        value: value.to_string(),
        detail: format!("invalid timespan: {}", detail),
    }
}

/// Sleep for a specified duration, minus the time spent doing other things.
///
/// # Example
/// ```rust
/// use flock::util;
///
/// async fn loop_with_delay() {
///     loop {
///         // Start drift timer.
///         let mut drift_timer = tokio::time::Instant::now();
///
///         // Do other stuff, in this case sleep 250 milliseconds. This is
///         // the "drift" that will be subtracted from the sleep time later.
///         tokio::time::sleep(std::time::Duration::from_millis(250)).await;
///
///         // Sleep for 1 second minus the time spent doing other stuff.
///         drift_timer = util::sleep_minus_drift(
///             std::time::Duration::from_secs(1),
///             drift_timer,
///         ).await;
///
///         break;
///     }
/// }
/// ```
pub async fn sleep_minus_drift(
    duration: std::time::Duration,
    drift: tokio::time::Instant,
) -> tokio::time::Instant {
    match duration.checked_sub(drift.elapsed()) {
        Some(delay) if delay.as_nanos() > 0 => tokio::time::sleep(delay).await,
        _ => debug!("sleep_minus_drift: drift was greater than or equal to duration, not sleeping"),
    };
    tokio::time::Instant::now()
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes extra
/// the characters and replaces the last two with a double-period ellipsis.
///
/// # Example
/// ```rust
/// use flock::util;
///
/// // All but 7 characters are truncated, with ".." appended.
/// assert_eq!(util::truncate_string("this is a long string", 9), "this is..");
///
/// // All characters are returned as the string is less than 15 characters long.
/// assert_eq!(util::truncate_string("shorter string", 15), "shorter string");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length.saturating_sub(2)) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Determine if a timer expired, with second granularity.
///
/// If the timer was started more than `run_time` seconds ago return `true`, otherwise
/// return `false`. A `run_time` of 0 disables the timer.
pub fn timer_expired(started: time::Instant, run_time: usize) -> bool {
    run_time > 0 && started.elapsed().as_secs() >= run_time as u64
}

/// Determine if a timer expired, with millisecond granularity.
///
/// If the timer was started more than `elapsed` milliseconds ago return `true`,
/// otherwise return `false`.
pub fn ms_timer_expired(started: time::Instant, elapsed: usize) -> bool {
    elapsed > 0 && started.elapsed().as_millis() >= elapsed as u128
}

/// Convert optional string to f64, otherwise return None.
///
/// # Example
/// ```rust
/// use flock::util;
///
/// assert_eq!(util::get_float_from_string(Some("1".to_string())), Some(1.0));
/// assert_eq!(util::get_float_from_string(Some(".5".to_string())), Some(0.5));
/// assert_eq!(util::get_float_from_string(Some("1.1.1".to_string())), None);
/// assert_eq!(util::get_float_from_string(None), None);
/// ```
pub fn get_float_from_string(string: Option<String>) -> Option<f64> {
    match string {
        Some(s) => match s.trim().parse::<f64>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("failed to convert {} to float: {}", s, e);
                None
            }
        },
        None => None,
    }
}

/// Helper function to determine if a host can be parsed.
///
/// # Example
/// ```rust
/// use flock::util;
///
/// // Hostname is a valid URL.
/// assert_eq!(util::is_valid_host("http://localhost:8000").is_ok(), true);
///
/// // Protocol is required
/// assert_eq!(util::is_valid_host("localhost:8000/").is_ok(), false);
/// ```
pub fn is_valid_host(host: &str) -> Result<bool, FlockError> {
    let url = Url::parse(host).map_err(|parse_error| FlockError::InvalidHost {
        host: host.to_string(),
        detail: "Invalid host.".to_string(),
        parse_error,
    })?;
    if url.cannot_be_a_base() {
        return Err(FlockError::InvalidOption {
            option: "--host".to_string(),
            value: host.to_string(),
            detail: "Host must be usable as a base url, ie http://localhost:8000.".to_string(),
        });
    }
    Ok(true)
}

// Internal helper to configure the control-c handler. Shutdown cleanly on the first
// ctrl-c. Exit abruptly on the second ctrl-c.
pub(crate) fn setup_ctrlc_handler() {
    match ctrlc::set_handler(move || {
        // We've caught a ctrl-c, determine if it's the first time or an additional time.
        if CANCELED.read().map(|c| *c).unwrap_or(true) {
            warn!("caught another ctrl-c, exiting immediately...");
            std::process::exit(1);
        } else {
            warn!("caught ctrl-c, retiring all virtual users...");
            if let Ok(mut canceled) = CANCELED.write() {
                *canceled = true;
            }
        }
    }) {
        Ok(_) => (),
        Err(e) => {
            // When running in tests, reset CANCELED with each new test allowing testing
            // of the ctrl-c handler.
            if let Ok(mut canceled) = CANCELED.write() {
                *canceled = false;
            }
            info!("reset ctrl-c handler: {}", e);
        }
    }
}
