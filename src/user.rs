use std::time::{self, Duration};

use crate::metrics::{Metric, MetricValue, ITERATIONS, ITERATION_DURATION};
use crate::scenario::{Scenario, VirtualUser};
use crate::FlockError;

/// Commands the scheduler sends to running virtual users.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum UserCommand {
    /// Finish the current iteration, then exit.
    Exit,
}

// Never sleep more than 500 milliseconds, allowing a sleeping user to retire quickly.
const MAXIMUM_SLEEP_TIME: u128 = 500;

pub(crate) async fn user_main(
    thread_scenario: Scenario,
    mut thread_user: VirtualUser,
    thread_receiver: flume::Receiver<UserCommand>,
) {
    info!(
        "launching user {} from {}...",
        thread_user.id, thread_scenario.name
    );
    let think_time = thread_scenario
        .think_time
        .unwrap_or(thread_user.think_time);

    // Loop launching iterations until the scheduler tells us to stop.
    loop {
        if received_exit(&thread_receiver) {
            break;
        }

        let started = time::Instant::now();
        debug!(
            "[user {}]: launching {} iteration {} from {}",
            thread_user.id,
            thread_scenario.iteration.name,
            thread_user.iteration,
            thread_scenario.name
        );
        let result = (thread_scenario.iteration.function)(&mut thread_user).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(FlockError::MetricsUnavailable { detail }) => {
                error!(
                    "[user {}]: metrics are no longer being received, exiting: {}",
                    thread_user.id, detail
                );
                break;
            }
            Err(e) => {
                warn!(
                    "[user {}]: iteration {} failed: {}",
                    thread_user.id, thread_user.iteration, e
                );
                "error"
            }
        };

        // Sleep the think time, exiting early if retired.
        let retired = think(&thread_receiver, think_time, thread_user.id).await;

        thread_user.iteration += 1;
        if let Err(e) = record_iteration(&thread_user, &thread_scenario, status, started) {
            error!("[user {}]: {}, exiting", thread_user.id, e);
            break;
        }

        if retired {
            break;
        }

        // Without think time nothing above is guaranteed to suspend, so let the
        // scheduler and other users run.
        if think_time.is_zero() {
            tokio::task::yield_now().await;
        }
    }

    info!(
        "exiting user {} from {} after {} iterations...",
        thread_user.id, thread_scenario.name, thread_user.iteration
    );
}

// Record one completed iteration.
fn record_iteration(
    thread_user: &VirtualUser,
    thread_scenario: &Scenario,
    status: &str,
    started: time::Instant,
) -> Result<(), FlockError> {
    let tagged = |metric: Metric| {
        metric
            .with_tag("scenario", &thread_scenario.name)
            .with_tag("result", status)
    };
    thread_user.record(tagged(Metric::new(ITERATIONS, MetricValue::Counter(1.0))))?;
    thread_user.record(tagged(Metric::new(
        ITERATION_DURATION,
        MetricValue::duration(started.elapsed()),
    )))
}

// Sleep in slices of at most 500 ms, returns true if an Exit command arrived meanwhile.
async fn think(
    thread_receiver: &flume::Receiver<UserCommand>,
    think_time: Duration,
    user_id: usize,
) -> bool {
    let mut wait_time = think_time.as_millis();
    while wait_time > 0 {
        if received_exit(thread_receiver) {
            return true;
        }

        let sleep_duration = if wait_time > MAXIMUM_SLEEP_TIME {
            wait_time -= MAXIMUM_SLEEP_TIME;
            Duration::from_millis(MAXIMUM_SLEEP_TIME as u64)
        } else {
            let sleep_duration = Duration::from_millis(wait_time as u64);
            wait_time = 0;
            sleep_duration
        };

        trace!("user {} sleeping {:?} ...", user_id, sleep_duration);

        tokio::time::sleep(sleep_duration).await;
    }
    received_exit(thread_receiver)
}

// Determine if the scheduler has sent a UserCommand::Exit message, or went away.
fn received_exit(thread_receiver: &flume::Receiver<UserCommand>) -> bool {
    match thread_receiver.try_recv() {
        Ok(UserCommand::Exit) => true,
        Err(flume::TryRecvError::Disconnected) => true,
        Err(flume::TryRecvError::Empty) => false,
    }
}
