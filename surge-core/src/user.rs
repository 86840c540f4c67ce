use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use surge_http::UserClient;

use crate::run::RunContext;
use crate::step::Step;
use crate::util::random_duration;

/// One independent simulated client session.
///
/// A virtual user is exclusively owned by its spawning task; its HTTP
/// client and cookie jar are shared with nobody. The `data` map carries
/// user-defined state across loops of the same user.
pub struct VirtualUser {
    scenario: Arc<str>,
    current_user: u64,
    current_loop: u64,
    client: UserClient,
    disabled: bool,
    pub data: HashMap<String, serde_json::Value>,
    pub(crate) ctx: Arc<RunContext>,
}

impl VirtualUser {
    pub(crate) fn new(
        scenario: Arc<str>,
        current_user: u64,
        client: UserClient,
        ctx: Arc<RunContext>,
    ) -> Self {
        Self {
            scenario,
            current_user,
            current_loop: 0,
            client,
            disabled: false,
            data: HashMap::new(),
            ctx,
        }
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub(crate) fn scenario_title(&self) -> Arc<str> {
        self.scenario.clone()
    }

    /// This user's index within its scenario, `1..=N`.
    #[must_use]
    pub fn current_user(&self) -> u64 {
        self.current_user
    }

    /// The current loop iteration, starting at 1.
    #[must_use]
    pub fn current_loop(&self) -> u64 {
        self.current_loop
    }

    /// Set once the user's personal ramp-down cutoff has elapsed; all
    /// further builder, send and think-time operations become no-ops.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Pauses the user. No-op while disabled, so a retiring user falls
    /// through its remaining scenario body without artificial delays (this
    /// slightly shortens the effective ramp-down tail).
    pub async fn think_time(&self, duration: Duration) {
        if self.disabled {
            return;
        }
        tokio::time::sleep(duration).await;
    }

    /// Pauses the user for a uniformly random span of `[min, max)`.
    pub async fn think_time_random(&self, min: Duration, max: Duration) {
        if self.disabled {
            return;
        }
        tokio::time::sleep(random_duration(min, max)).await;
    }

    /// Begins a named unit of work producing one HTTP request.
    pub fn step(&mut self, name: impl Into<String>) -> Step<'_> {
        Step::new(self, name.into())
    }

    pub(crate) fn client(&self) -> &UserClient {
        &self.client
    }

    pub(crate) fn begin_loop(&mut self, clear_cookie_jar: bool) {
        self.current_loop += 1;
        if clear_cookie_jar {
            self.client.clear_cookie_jar();
        }
    }

    pub(crate) fn disable(&mut self) {
        self.disabled = true;
    }
}

impl std::fmt::Debug for VirtualUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUser")
            .field("scenario", &self.scenario)
            .field("current_user", &self.current_user)
            .field("current_loop", &self.current_loop)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}
