use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::time::MissedTickBehavior;

use surge_http::{ClientConfig, UserClient};
use surge_trace::{Environment, ScenarioRecord, TraceStore};

use crate::config::Settings;
use crate::engine::{EngineError, RequestInterceptor};
use crate::scenario::Scenario;
use crate::user::VirtualUser;
use crate::util::random_duration;

/// How often the live looping-users gauge is logged during a run.
const GAUGE_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Shared, frozen state every virtual user carries through the run.
pub(crate) struct RunContext {
    pub(crate) settings: Settings,
    pub(crate) client_config: ClientConfig,
    pub(crate) interceptors: Arc<[RequestInterceptor]>,
    pub(crate) store: Arc<TraceStore>,
    pub(crate) gauge: LoopingUsersGauge,
}

/// Per-scenario count of currently looping users.
#[derive(Clone, Default)]
pub(crate) struct LoopingUsersGauge {
    counters: Arc<Mutex<HashMap<String, i64>>>,
}

impl LoopingUsersGauge {
    fn update(&self, key: &str, delta: i64) -> i64 {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = counters.entry(key.to_string()).or_insert(0);
        *counter += delta;
        *counter
    }

    pub(crate) fn inc(&self, key: &str) -> i64 {
        self.update(key, 1)
    }

    pub(crate) fn value(&self, key: &str) -> i64 {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.get(key).copied().unwrap_or(0)
    }
}

/// Decrements the gauge on every user-task exit path, so a user retiring at
/// the natural end of the window cannot leak an increment.
struct GaugeGuard {
    gauge: LoopingUsersGauge,
    key: String,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.update(&self.key, -1);
    }
}

fn scenario_records(scenarios: &[Arc<Scenario>]) -> BTreeMap<String, ScenarioRecord> {
    scenarios
        .iter()
        .map(|s| (s.title().to_string(), s.record()))
        .collect()
}

fn environment(run_start: SystemTime) -> Environment {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    Environment {
        hostname: host,
        start: run_start,
    }
}

fn finish_store(
    store: &TraceStore,
    run_start: SystemTime,
    scenarios: &[Arc<Scenario>],
) -> Result<(), surge_trace::store::Error> {
    store.finish(&environment(run_start), &scenario_records(scenarios))
}

/// Runs all non-ignored scenarios to completion, then flushes and closes
/// the trace store.
pub(crate) async fn execute(
    scenarios: Vec<Arc<Scenario>>,
    settings: Settings,
    interceptors: Arc<[RequestInterceptor]>,
    report_path: Option<&std::path::Path>,
) -> Result<(), EngineError> {
    let store = Arc::new(match report_path {
        Some(path) => TraceStore::create(path)?,
        None => TraceStore::disabled(),
    });
    let ctx = Arc::new(RunContext {
        client_config: settings.client_config(),
        settings,
        interceptors,
        store: store.clone(),
        gauge: LoopingUsersGauge::default(),
    });
    let run_start = SystemTime::now();

    // On interrupt: flush the scenario index and every step log, then leave
    // with a well-defined status.
    let signal_task = {
        let store = store.clone();
        let scenarios = scenarios.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::info!("interrupted, flushing trace store");
            match finish_store(&store, run_start, &scenarios) {
                Ok(()) => std::process::exit(0),
                Err(err) => {
                    tracing::error!(error = %err, "trace store teardown failed");
                    std::process::exit(1);
                }
            }
        })
    };

    let ticker_task = {
        let ctx = ctx.clone();
        let titles: Vec<String> = scenarios
            .iter()
            .filter(|s| !s.is_ignored())
            .map(|s| s.title().to_string())
            .collect();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(GAUGE_LOG_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first tick; the gauge is trivially zero.
            interval.tick().await;
            loop {
                interval.tick().await;
                for title in &titles {
                    tracing::info!(
                        scenario = %title,
                        looping_users = ctx.gauge.value(title),
                        "looping users"
                    );
                }
            }
        })
    };

    let mut handles = Vec::new();
    for scenario in &scenarios {
        if scenario.is_ignored() {
            continue;
        }
        tracing::info!(scenario = %scenario.title(), "running scenario");
        handles.push(tokio::spawn(scenario_task(scenario.clone(), ctx.clone())));
    }

    let mut first_failure: Option<EngineError> = None;
    for handle in handles {
        if let Err(err) = handle.await {
            first_failure.get_or_insert(EngineError::TaskFailed(err.to_string()));
        }
    }

    ticker_task.abort();
    let _ = ticker_task.await;
    signal_task.abort();
    let _ = signal_task.await;

    finish_store(&store, run_start, &scenarios)?;

    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// One scenario's execution task: waits out the start delay, then spawns
/// user tasks on the linear ramp-up cadence and joins them all.
async fn scenario_task(scenario: Arc<Scenario>, ctx: Arc<RunContext>) {
    scenario.reset_execution_count();
    let load = scenario.load().clone();

    tokio::time::sleep(random_duration(load.start_delay.min, load.start_delay.max)).await;

    let users = load.looping_users.max(1);
    let end = Instant::now() + load.ramp_up + load.plateau + load.ramp_down;
    let ramp_down_entry = end - load.ramp_down;
    // Each user retires at its personal cutoff, spreading the ramp-down
    // evenly over the window.
    let ramp_down_step = Duration::from_nanos((load.ramp_down.as_nanos() / users as u128) as u64);
    let ramp_up_pause = if users > 1 {
        Duration::from_nanos((load.ramp_up.as_nanos() / (users - 1) as u128) as u64)
    } else {
        Duration::ZERO
    };

    let mut handles = Vec::with_capacity(users as usize);
    for index in 1..=users {
        let cutoff = ramp_down_entry
            + Duration::from_nanos((ramp_down_step.as_nanos() as u64).saturating_mul(index));
        handles.push(tokio::spawn(user_task(
            scenario.clone(),
            ctx.clone(),
            index,
            end,
            cutoff,
        )));
        if index < users {
            tokio::time::sleep(ramp_up_pause).await;
        }
    }

    for handle in handles {
        if let Err(err) = handle.await {
            // A panicking user (e.g. a fatal trace-store write) takes the
            // whole run down; a cancelled task is merely noted.
            if err.is_panic() {
                std::panic::resume_unwind(err.into_panic());
            }
            tracing::error!(scenario = %scenario.title(), error = %err, "user task failed");
        }
    }
}

/// One virtual user's lifetime: loop the scenario runner until the shared
/// end or the personal ramp-down cutoff, whichever hits first.
async fn user_task(
    scenario: Arc<Scenario>,
    ctx: Arc<RunContext>,
    index: u64,
    end: Instant,
    cutoff: Instant,
) {
    let title: Arc<str> = Arc::from(scenario.title());
    let looping = ctx.gauge.inc(&title);
    tracing::debug!(scenario = %title, looping, user = index, "ramp-up: user joined");
    let _guard = GaugeGuard {
        gauge: ctx.gauge.clone(),
        key: title.to_string(),
    };

    let client = match UserClient::new(&ctx.client_config) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(scenario = %title, user = index, error = %err, "unable to build http client");
            return;
        }
    };
    let mut user = VirtualUser::new(title.clone(), index, client, ctx.clone());

    let load = scenario.load().clone();
    while Instant::now() < end {
        user.begin_loop(load.clear_cookie_jar_on_every_loop);
        scenario.run(&mut user).await;
        scenario.bump_execution_count();

        if Instant::now() > cutoff {
            user.disable();
            tracing::debug!(scenario = %title, user = index, "ramp-down: user retiring");
            break;
        }
        user.think_time_random(load.loop_delay.min, load.loop_delay.max)
            .await;
    }
}
