use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

use surge_trace::{LoadConfig, ScenarioRecord};

use crate::user::VirtualUser;

/// The virtual-user program of a scenario.
///
/// Authored as a function taking the user handle and returning a boxed
/// future borrowing it:
///
/// ```ignore
/// fn checkout(user: &mut VirtualUser) -> BoxFuture<'_, ()> {
///     Box::pin(async move { /* steps */ })
/// }
/// ```
pub type ScenarioRunner =
    Arc<dyn for<'a> Fn(&'a mut VirtualUser) -> BoxFuture<'a, ()> + Send + Sync>;

/// A named, parameterized program each virtual user repeatedly executes.
/// Registered before the run and immutable afterwards, apart from the
/// atomically incremented execution count.
pub struct Scenario {
    title: String,
    description: String,
    runner: ScenarioRunner,
    load: LoadConfig,
    ignored: bool,
    execution_count: AtomicU64,
}

impl Scenario {
    pub fn new(
        title: impl Into<String>,
        runner: impl for<'a> Fn(&'a mut VirtualUser) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            runner: Arc::new(runner),
            load: LoadConfig::default(),
            ignored: false,
            execution_count: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_load(mut self, load: LoadConfig) -> Self {
        self.load = load;
        self
    }

    /// Keep the scenario registered (it still shows up in the index) but
    /// skip it during the run.
    #[must_use]
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn load(&self) -> &LoadConfig {
        &self.load
    }

    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// Completed user loops so far, across all users of this scenario.
    #[must_use]
    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_execution_count(&self) {
        self.execution_count.store(0, Ordering::Relaxed);
    }

    pub(crate) fn bump_execution_count(&self) {
        self.execution_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn run<'a>(&self, user: &'a mut VirtualUser) -> BoxFuture<'a, ()> {
        (self.runner)(user)
    }

    pub(crate) fn record(&self) -> ScenarioRecord {
        ScenarioRecord {
            title: self.title.clone(),
            description: self.description.clone(),
            load: self.load.clone(),
            ignored: self.ignored,
            execution_count: self.execution_count(),
        }
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("title", &self.title)
            .field("description", &self.description)
            .field("load", &self.load)
            .field("ignored", &self.ignored)
            .field("execution_count", &self.execution_count())
            .finish_non_exhaustive()
    }
}
