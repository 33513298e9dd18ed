//! The stage scheduler.
//!
//! Wakes every 100 ms, compares the number of active virtual users with the stage plan's
//! target for the elapsed time, and spawns or retires users to close the gap. Retired
//! users finish their current iteration before exiting, so in-flight requests are never
//! cut off. Between ticks it drains the metrics channel into the store.

use chrono::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

use crate::client::{ReqwestClient, RequestClient};
use crate::logger;
use crate::metrics::{Metric, MetricRecorder, MetricStore, MetricValue, VUS, VUS_MAX};
use crate::payload::CacheRate;
use crate::report::RunResult;
use crate::stage::{StageAction, StageHistory, StagePlan};
use crate::user::{self, UserCommand};
use crate::util;
use crate::{FlockError, LoadTest, CANCELED};

/// How often the scheduler wakes up.
const TICK: Duration = Duration::from_millis(100);

/// A running virtual user.
struct UserHandle {
    id: usize,
    sender: flume::Sender<UserCommand>,
    handle: JoinHandle<()>,
}

/// Internal state for a running load test.
pub(crate) struct RunState {
    /// Receives metrics from all virtual users.
    pub(crate) metrics_rx: flume::Receiver<Metric>,
    /// Cloned into every virtual user.
    recorder: MetricRecorder,
    /// Everything received so far.
    pub(crate) store: MetricStore,
    /// Active users, in spawn order. Retired last in, first out.
    active: Vec<UserHandle>,
    /// Users told to exit that may still be finishing an iteration.
    retiring: Vec<JoinHandle<()>>,
    /// How many users have been spawned, also the next user id.
    spawned: usize,
    /// Accounts for time spent working each tick, subtracted from the next sleep.
    drift_timer: tokio::time::Instant,
    /// Timer tracking when to display running metrics, if enabled.
    pub(crate) running_metrics_timer: std::time::Instant,
    /// When the first tick ran.
    pub(crate) started: std::time::Instant,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) history: Vec<StageHistory>,
    /// The index of the running stage, `None` before the first tick and once finished.
    stage: Option<usize>,
    /// Set once ctrl-c is caught.
    canceling: bool,
    /// Optional sender to the metrics log task, if enabled.
    pub(crate) logger_tx: Option<flume::Sender<Option<Metric>>>,
    logger_handle: Option<JoinHandle<Result<(), FlockError>>>,
    /// The last value recorded to the `vus` gauge.
    vus: Option<usize>,
    /// Metric names already warned about by the registry.
    pub(crate) unexpected_metrics: HashSet<String>,
    base_url: Url,
    client: Arc<dyn RequestClient>,
    cache_rate: CacheRate,
    think_time: Duration,
}

impl LoadTest {
    // Prepare everything needed before the first user is launched.
    async fn initialize_run(&self) -> Result<RunState, FlockError> {
        trace!("initialize_run");

        let base_url =
            Url::parse(&self.configuration.host).map_err(|parse_error| FlockError::InvalidHost {
                host: self.configuration.host.to_string(),
                detail: "Invalid host.".to_string(),
                parse_error,
            })?;

        // Use the configured client, otherwise build the default reqwest client.
        let client: Arc<dyn RequestClient> = match self.client.as_ref() {
            Some(client) => client.clone(),
            None => Arc::new(ReqwestClient::new(self.configuration.timeout()?)?),
        };

        // Create a single channel used to send metrics from all users to the scheduler.
        let (recorder, metrics_rx) = MetricRecorder::channel();

        // If enabled, spawn a metrics log task.
        let (logger_tx, logger_handle) = if self.configuration.metrics_log.is_empty() {
            (None, None)
        } else {
            let (logger_tx, logger_rx) = flume::unbounded();
            let handle = tokio::spawn(logger::logger_main(
                self.configuration.metrics_log.to_string(),
                self.configuration.metrics_format.unwrap_or_default(),
                logger_rx,
            ));
            (Some(logger_tx), Some(handle))
        };

        // Catch ctrl-c to allow clean shutdown to display metrics.
        util::setup_ctrlc_handler();

        let std_now = std::time::Instant::now();
        Ok(RunState {
            metrics_rx,
            recorder,
            store: MetricStore::new(),
            active: Vec::new(),
            retiring: Vec::new(),
            spawned: 0,
            drift_timer: tokio::time::Instant::now(),
            running_metrics_timer: std_now,
            started: std_now,
            started_at: Utc::now(),
            history: Vec::new(),
            stage: None,
            canceling: false,
            logger_tx,
            logger_handle,
            vus: None,
            unexpected_metrics: HashSet::new(),
            base_url,
            client,
            cache_rate: self.configuration.cache_rate.unwrap_or_default(),
            think_time: self.configuration.think_time()?,
        })
    }

    /// Run the stage plan to completion, returning the result of the run.
    pub(crate) async fn run(&mut self) -> Result<RunResult, FlockError> {
        let mut run_state = self.initialize_run().await?;
        let plan = self.configuration.stage_plan();

        run_state.recorder.record(Metric::new(
            VUS_MAX,
            MetricValue::Gauge(plan.max_target() as f64),
        ))?;
        info!(
            "running {} stages over {:?}, up to {} users...",
            plan.stages().len(),
            plan.total_duration(),
            plan.max_target()
        );

        loop {
            let elapsed = run_state.started.elapsed();

            // Gracefully wind down if ctrl-c is caught.
            if !run_state.canceling && CANCELED.read().map(|c| *c).unwrap_or(false) {
                run_state.canceling = true;
                run_state.stage = None;
                run_state.history.push(StageHistory::step(
                    StageAction::Canceling,
                    run_state.active.len(),
                ));
            }

            if !run_state.canceling {
                self.update_stage(&mut run_state, &plan, elapsed);
            }

            let target = if run_state.canceling {
                0
            } else {
                plan.target_at(elapsed)
            };
            self.adjust_users(&mut run_state, target)?;
            reap_retired(&mut run_state).await;

            // Record the vus gauge only when it changes.
            let active = run_state.active.len();
            if run_state.vus != Some(active) {
                run_state.vus = Some(active);
                run_state
                    .recorder
                    .record(Metric::new(VUS, MetricValue::Gauge(active as f64)))?;
            }

            // Regularly synchronize metrics.
            self.sync_metrics(&mut run_state, false).await?;

            if (run_state.canceling || plan.is_finished(elapsed)) && run_state.active.is_empty() {
                break;
            }

            run_state.drift_timer = util::sleep_minus_drift(TICK, run_state.drift_timer).await;
        }

        self.stop_run(run_state).await
    }

    // Record a history step every time the running stage changes.
    fn update_stage(&self, run_state: &mut RunState, plan: &StagePlan, elapsed: Duration) {
        let index = plan.stage_index_at(elapsed);
        if index == run_state.stage {
            return;
        }
        run_state.stage = index;
        if let Some(index) = index {
            let action = plan.action_for(index);
            let stage = plan.stages()[index];
            info!(
                "stage {}: {} to {} users over {:?}",
                index + 1,
                action,
                stage.target,
                stage.duration
            );
            run_state
                .history
                .push(StageHistory::step(action, run_state.active.len()));
        }
    }

    // Spawn or retire users until the number of active users matches the target.
    fn adjust_users(&self, run_state: &mut RunState, target: usize) -> Result<(), FlockError> {
        while run_state.active.len() < target {
            self.spawn_user(run_state)?;
        }
        while run_state.active.len() > target {
            if let Some(retired) = run_state.active.pop() {
                match retired.sender.send(UserCommand::Exit) {
                    Ok(_) => debug!("telling user {} to exit", retired.id),
                    Err(e) => info!("failed to tell user {} to exit: {}", retired.id, e),
                }
                run_state.retiring.push(retired.handle);
            }
        }
        Ok(())
    }

    fn spawn_user(&self, run_state: &mut RunState) -> Result<(), FlockError> {
        if self.scenarios.is_empty() {
            return Err(FlockError::NoScenarios {
                detail: "No scenarios are defined.".to_string(),
            });
        }
        let id = run_state.spawned;
        run_state.spawned += 1;

        // Scenarios are assigned to users round robin.
        let thread_scenario = self.scenarios[id % self.scenarios.len()].clone();

        // Each user gets its own rng, derived from the seed when configured.
        let rng = match self.configuration.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_os_rng(),
        };

        let thread_user = crate::scenario::VirtualUser::new(
            id,
            run_state.base_url.clone(),
            rng,
            run_state.cache_rate,
            run_state.think_time,
            run_state.client.clone(),
            run_state.recorder.clone(),
            self.payloads.clone(),
        );

        // Create a per-user channel allowing the scheduler to retire the user.
        let (sender, thread_receiver) = flume::unbounded();
        let handle = tokio::spawn(user::user_main(
            thread_scenario,
            thread_user,
            thread_receiver,
        ));
        run_state.active.push(UserHandle { id, sender, handle });
        Ok(())
    }

    // Wait for all users, collect the last metrics and build the result.
    async fn stop_run(&mut self, mut run_state: RunState) -> Result<RunResult, FlockError> {
        info!(
            "stopping after {} seconds, waiting for users to exit...",
            run_state.started.elapsed().as_secs()
        );

        // Take the handles out of the run state so they can be consumed by join_all().
        let retiring = std::mem::take(&mut run_state.retiring);
        for result in futures::future::join_all(retiring).await {
            if let Err(e) = result {
                warn!("user exited abnormally: {}", e);
            }
        }
        debug!("all users exited");
        run_state.history.push(StageHistory::step(StageAction::Finished, 0));

        // Ensure every metric sent by users is received.
        self.sync_metrics(&mut run_state, true).await?;

        // If the logger task is enabled, tell it to flush and exit.
        if let Some(logger_tx) = run_state.logger_tx.take() {
            if let Err(e) = logger_tx.send(None) {
                warn!("unexpected error telling logger task to exit: {}", e);
            }
        }
        if let Some(logger_handle) = run_state.logger_handle.take() {
            if let Err(e) = logger_handle.await? {
                warn!("failed to write metrics_log: {}", e);
            }
        }

        let result = RunResult::new(
            &run_state.store,
            &self.registry,
            self.evaluate_thresholds(&run_state.store),
            run_state.history,
            run_state.started_at,
        );

        if !self.configuration.no_print_metrics {
            result.print();
        }
        if !self.configuration.report_file.is_empty() {
            result.write_json(&self.configuration.report_file).await?;
        }

        for failure in result.failures() {
            warn!("threshold failed: {}", failure);
        }
        info!("verdict: {}", result.verdict);

        Ok(result)
    }
}

// Await retired users that already exited, leaving the rest to finish their iteration.
async fn reap_retired(run_state: &mut RunState) {
    let (finished, retiring): (Vec<JoinHandle<()>>, Vec<JoinHandle<()>>) =
        std::mem::take(&mut run_state.retiring)
            .into_iter()
            .partition(|handle| handle.is_finished());
    run_state.retiring = retiring;
    for handle in finished {
        if let Err(e) = handle.await {
            warn!("user exited abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::config::FlockConfiguration;
    use crate::metrics::{MetricSummary, HTTP_REQS, ITERATIONS, VUS, VUS_MAX};
    use crate::prelude::*;
    use crate::scenario::test::StaticClient;
    use crate::client::TransportError;
    use crate::stage::StageAction;
    use async_trait::async_trait;
    use gumdrop::Options;
    use serial_test::serial;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn health(user: &mut VirtualUser) -> IterationResult {
        let checks = Checks::new().add("status is 200", |r| r.status == 200);
        let response = user.get("/api/health").await?;
        user.check(&response, &checks)?;
        Ok(())
    }

    fn load_test(args: &[&str]) -> LoadTest {
        let configuration = FlockConfiguration::parse_args_default(args).unwrap();
        LoadTest::initialize_with_config(configuration)
            .unwrap()
            .register_scenario(Scenario::new("Health", iteration!(health)))
            .set_client(Arc::new(StaticClient {
                status: 200,
                body: "{}".to_string(),
                fail: false,
            }))
    }

    #[test]
    #[serial]
    fn follows_stage_plan() {
        let result = load_test(&[
            "--stages",
            "3,300ms;3,500ms;0,300ms",
            "--think-time",
            "50ms",
            "--no-print-metrics",
            "--quiet",
        ])
        .execute()
        .unwrap();

        let actions: Vec<StageAction> = result.history.iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![
                StageAction::Increasing,
                StageAction::Maintaining,
                StageAction::Decreasing,
                StageAction::Finished,
            ]
        );
        assert_eq!(
            result.metrics[VUS_MAX],
            MetricSummary::Gauge {
                value: 3.0,
                min: 3.0,
                max: 3.0
            }
        );
        match &result.metrics[VUS] {
            MetricSummary::Gauge { value, max, .. } => {
                assert_eq!(*value, 0.0);
                assert_eq!(*max, 3.0);
            }
            other => panic!("unexpected vus summary: {:?}", other),
        }
        assert!(matches!(
            result.metrics[HTTP_REQS],
            MetricSummary::Counter { count, .. } if count > 0
        ));
        assert!(matches!(
            result.metrics[ITERATIONS],
            MetricSummary::Counter { count, .. } if count > 0
        ));
        assert!(result.passed());
    }

    #[test]
    #[serial]
    fn zero_think_time_finishes() {
        // Users whose requests complete at once must not starve the scheduler.
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = load_test(&[
                "--stages",
                "10,0s;10,300ms",
                "--think-time",
                "0",
                "--no-print-metrics",
                "--quiet",
            ])
            .execute();
            let _ = tx.send(result);
        });
        let result = rx
            .recv_timeout(Duration::from_secs(20))
            .expect("run with zero think time didn't finish")
            .unwrap();
        match &result.metrics[VUS] {
            MetricSummary::Gauge { max, .. } => assert_eq!(*max, 10.0),
            other => panic!("unexpected vus summary: {:?}", other),
        }
        assert!(matches!(
            result.metrics[ITERATIONS],
            MetricSummary::Counter { count, .. } if count > 10
        ));
    }

    /// Remembers the body of every POST, keyed by the user id in the path.
    #[derive(Default)]
    struct RecordingClient {
        bodies: Mutex<BTreeMap<String, Vec<String>>>,
    }

    #[async_trait]
    impl RequestClient for RecordingClient {
        async fn post(
            &self,
            url: &str,
            body: String,
            _headers: &[(&str, &str)],
        ) -> Result<ClientResponse, TransportError> {
            if let Ok(mut bodies) = self.bodies.lock() {
                bodies.entry(url.to_string()).or_default().push(body);
            }
            Ok(ClientResponse::new(200, "{}", Duration::ZERO))
        }

        async fn get(&self, _url: &str) -> Result<ClientResponse, TransportError> {
            Ok(ClientResponse::new(200, "{}", Duration::ZERO))
        }
    }

    async fn predict(user: &mut VirtualUser) -> IterationResult {
        let payload = user.generate_payload();
        let path = format!("/predict/{}", user.id);
        user.post_json(&path, &payload).await?;
        Ok(())
    }

    // The first payloads each user sent, in user order.
    fn seeded_payloads(seed: &str) -> Vec<Vec<String>> {
        let client = Arc::new(RecordingClient::default());
        let configuration = FlockConfiguration::parse_args_default(&[
            "--stages",
            "4,0s;4,400ms",
            "--think-time",
            "20ms",
            "--cache-rate",
            "0",
            "--seed",
            seed,
            "--no-print-metrics",
            "--quiet",
        ])
        .unwrap();
        LoadTest::initialize_with_config(configuration)
            .unwrap()
            .register_scenario(Scenario::new("Predict", iteration!(predict)))
            .set_client(client.clone())
            .execute()
            .unwrap();

        let bodies = client.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 4);
        bodies
            .values()
            .map(|sent| {
                assert!(sent.len() >= 3);
                sent[..3].to_vec()
            })
            .collect()
    }

    #[test]
    #[serial]
    fn seeded_users_are_distinct() {
        let first = seeded_payloads("7");

        // Every user draws its own stream.
        for (i, a) in first.iter().enumerate() {
            for b in first.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }

        // The same seed replays the same streams, another seed doesn't.
        assert_eq!(first, seeded_payloads("7"));
        assert_ne!(first, seeded_payloads("8"));
    }
}
