use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::run;
use crate::scenario::Scenario;
use crate::user::VirtualUser;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Hook invoked on every outgoing request before dispatch; may mutate it
/// (auth headers, tracing correlation ids).
pub type RequestInterceptor =
    Arc<dyn Fn(&VirtualUser, &mut reqwest::Request) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("scenario already exists '{0}'")]
    DuplicateScenario(String),

    #[error("scenario '{0}' must have at least one looping user")]
    NoLoopingUsers(String),

    #[error("scenario '{0}' has an invalid {1} interval (min greater than max)")]
    InvalidInterval(String, &'static str),

    #[error("trace store failure: {0}")]
    Trace(#[from] surge_trace::store::Error),

    #[error("scenario task failed: {0}")]
    TaskFailed(String),
}

/// The engine owns all process-wide run state: the scenario registry,
/// transport settings and the interceptor list. Populated before `run`,
/// frozen during it.
pub struct Engine {
    settings: Settings,
    scenarios: BTreeMap<String, Arc<Scenario>>,
    interceptors: Vec<RequestInterceptor>,
}

impl Engine {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            scenarios: BTreeMap::new(),
            interceptors: Vec::new(),
        }
    }

    /// Registers a scenario. Configuration problems are fatal here rather
    /// than surfacing mid-run: duplicate titles, a zero user count and
    /// reversed random intervals are all rejected.
    pub fn add_scenario(&mut self, scenario: Scenario) -> Result<()> {
        let title = scenario.title().to_string();
        if scenario.load().looping_users == 0 {
            return Err(EngineError::NoLoopingUsers(title));
        }
        if !scenario.load().start_delay.is_valid() {
            return Err(EngineError::InvalidInterval(title, "start delay"));
        }
        if !scenario.load().loop_delay.is_valid() {
            return Err(EngineError::InvalidInterval(title, "loop delay"));
        }
        if self.scenarios.contains_key(&title) {
            return Err(EngineError::DuplicateScenario(title));
        }
        self.scenarios.insert(title, Arc::new(scenario));
        Ok(())
    }

    pub fn add_request_interceptor(
        &mut self,
        interceptor: impl Fn(&VirtualUser, &mut reqwest::Request) + Send + Sync + 'static,
    ) {
        self.interceptors.push(Arc::new(interceptor));
    }

    /// Looks up a registered scenario, e.g. to read its execution count
    /// after a run.
    #[must_use]
    pub fn scenario(&self, title: &str) -> Option<&Arc<Scenario>> {
        self.scenarios.get(title)
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &Arc<Scenario>> {
        self.scenarios.values()
    }

    /// Executes all non-ignored scenarios under their load configs. With a
    /// report path the trace store is written there; without one the run is
    /// fire-and-forget.
    pub async fn run(&self, report_path: Option<&Path>) -> Result<()> {
        let scenarios: Vec<Arc<Scenario>> = self.scenarios.values().cloned().collect();
        let interceptors: Arc<[RequestInterceptor]> = self.interceptors.clone().into();
        run::execute(scenarios, self.settings.clone(), interceptors, report_path).await
    }
}
