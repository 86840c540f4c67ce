use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// The four timing landmarks captured for every request.
///
/// `start` and `done` are stamped around the whole send (including the body
/// read); `wrote_request` and `got_first_response_byte` are stamped by the
/// client tracing hooks and stay unset when the request fails before
/// reaching that stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    pub start: Option<SystemTime>,
    pub wrote_request: Option<SystemTime>,
    pub got_first_response_byte: Option<SystemTime>,
    pub done: Option<SystemTime>,
}

impl Timestamps {
    /// Total request-response time (dispatch to end of body read).
    ///
    /// Returns `None` while either landmark is unset; negative spans clamp
    /// to zero.
    pub fn total_duration(&self) -> Option<Duration> {
        let (start, done) = (self.start?, self.done?);
        Some(done.duration_since(start).unwrap_or(Duration::ZERO))
    }

    /// Time to the first received response byte.
    ///
    /// With `after_request_sent` the span is measured from the end of the
    /// request write instead of from dispatch (a.k.a. time-after-request-sent).
    pub fn time_to_first_byte(&self, after_request_sent: bool) -> Option<Duration> {
        let first_byte = self.got_first_response_byte?;
        let from = if after_request_sent {
            self.wrote_request?
        } else {
            self.start?
        };
        Some(first_byte.duration_since(from).unwrap_or(Duration::ZERO))
    }
}

/// One persisted request observation. Written exactly once per archive call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepEntry {
    pub scenario: String,
    pub timestamps: Timestamps,
    pub timeout: bool,
    pub timeout_root_cause: String,
    pub error: bool,
    pub error_root_cause: String,
    pub assertion_failed: bool,
    pub assertion_failed_root_cause: String,
    pub status_code: Option<u16>,
    pub request_size: u64,
    pub response_size: u64,
}

/// Request outcome counters. The three failure categories are disjoint, so
/// successes are derived by subtraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub requests: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub errors: u64,
}

impl Counts {
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.requests
            .saturating_sub(self.failures)
            .saturating_sub(self.errors)
            .saturating_sub(self.timeouts)
    }

    #[must_use]
    pub fn success_percentage(&self) -> f64 {
        self.percentage_of(self.successes())
    }

    #[must_use]
    pub fn failure_percentage(&self) -> f64 {
        self.percentage_of(self.failures)
    }

    #[must_use]
    pub fn error_percentage(&self) -> f64 {
        self.percentage_of(self.errors)
    }

    #[must_use]
    pub fn timeout_percentage(&self) -> f64 {
        self.percentage_of(self.timeouts)
    }

    fn percentage_of(&self, count: u64) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        count as f64 / self.requests as f64 * 100.0
    }

    pub fn add(&mut self, other: Counts) {
        self.requests = self.requests.saturating_add(other.requests);
        self.timeouts = self.timeouts.saturating_add(other.timeouts);
        self.failures = self.failures.saturating_add(other.failures);
        self.errors = self.errors.saturating_add(other.errors);
    }
}

/// Host metadata written once to the scenario index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub hostname: String,
    pub start: SystemTime,
}

/// A uniformly random duration interval, `min ..= max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomInterval {
    pub min: Duration,
    pub max: Duration,
}

impl RandomInterval {
    #[must_use]
    pub fn fixed(d: Duration) -> Self {
        Self { min: d, max: d }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }
}

impl std::fmt::Display for RandomInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "random interval between {:?} and {:?}", self.min, self.max)
    }
}

/// Three-phase load shape for one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Random delay before the scenario's first user spawns.
    pub start_delay: RandomInterval,
    /// Target concurrency plateau.
    pub looping_users: u64,
    /// Random think-time between consecutive loops of the same user.
    pub loop_delay: RandomInterval,
    pub ramp_up: Duration,
    pub plateau: Duration,
    pub ramp_down: Duration,
    pub clear_cookie_jar_on_every_loop: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            start_delay: RandomInterval::default(),
            looping_users: 1,
            loop_delay: RandomInterval::default(),
            ramp_up: Duration::ZERO,
            plateau: Duration::ZERO,
            ramp_down: Duration::ZERO,
            clear_cookie_jar_on_every_loop: true,
        }
    }
}

/// The persisted view of a registered scenario (the runner itself is not
/// serializable and is omitted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub title: String,
    pub description: String,
    pub load: LoadConfig,
    pub ignored: bool,
    pub execution_count: u64,
}

/// A percentage threshold with the analyzer's verdict fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentageThreshold {
    pub percentage: f64,
    pub unmet: bool,
    pub actual_value: f64,
}

impl PercentageThreshold {
    #[must_use]
    pub fn new(percentage: f64) -> Self {
        Self {
            percentage,
            unmet: false,
            actual_value: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountThreshold {
    pub count: u64,
    pub unmet: bool,
    pub actual_value: u64,
}

impl CountThreshold {
    #[must_use]
    pub fn new(count: u64) -> Self {
        Self {
            count,
            unmet: false,
            actual_value: 0,
        }
    }
}

/// A `(percentile, duration)` pair: met when the observed percentile of the
/// sample stays within the duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileThreshold {
    pub percentile: f64,
    pub limit: Duration,
    pub unmet: bool,
    pub actual_value: Option<Duration>,
}

impl PercentileThreshold {
    #[must_use]
    pub fn new(percentile: f64, limit: Duration) -> Self {
        Self {
            percentile,
            limit,
            unmet: false,
            actual_value: None,
        }
    }
}

/// Cumulative byte total expected within `min ..= max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeThreshold {
    pub min: u64,
    pub max: u64,
    pub unmet: bool,
    pub actual_value: u64,
}

impl RangeThreshold {
    #[must_use]
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            min,
            max,
            unmet: false,
            actual_value: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusCodeThreshold {
    pub is_at_least: bool,
    pub status_code: u16,
    pub percentage: f64,
    pub unmet: bool,
    pub actual_value: f64,
}

/// Fraction of a failure category whose root cause matches a pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeMatchesThreshold {
    pub is_at_least: bool,
    pub pattern: String,
    pub percentage: f64,
    pub unmet: bool,
    pub actual_value: f64,
}

/// The declarative threshold bundle attached to a step.
///
/// All thresholds are additive; the value present at the time of a step's
/// first archive is the canonical one persisted to the step log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub success_percentage_at_least: Option<PercentageThreshold>,
    pub failure_percentage_at_most: Option<PercentageThreshold>,
    pub error_percentage_at_most: Option<PercentageThreshold>,
    pub timeout_percentage_at_most: Option<PercentageThreshold>,
    pub success_count_at_least: Option<CountThreshold>,
    pub failure_count_at_most: Option<CountThreshold>,
    pub error_count_at_most: Option<CountThreshold>,
    pub timeout_count_at_most: Option<CountThreshold>,
    pub total_request_response_time_percentile_limits: Vec<PercentileThreshold>,
    pub time_to_first_byte_percentile_limits: Vec<PercentileThreshold>,
    pub time_after_request_sent_percentile_limits: Vec<PercentileThreshold>,
    pub total_request_bytes_within: Option<RangeThreshold>,
    pub total_response_bytes_within: Option<RangeThreshold>,
    pub status_code_thresholds: Vec<StatusCodeThreshold>,
    pub failure_type_matches_thresholds: Vec<TypeMatchesThreshold>,
    pub error_type_matches_thresholds: Vec<TypeMatchesThreshold>,
    pub timeout_type_matches_thresholds: Vec<TypeMatchesThreshold>,
}

impl Expectation {
    /// The baseline every fresh step starts from: nothing is effectively
    /// constrained until the author tightens it.
    #[must_use]
    pub fn baseline() -> Self {
        Self {
            success_percentage_at_least: Some(PercentageThreshold::new(0.0)),
            failure_percentage_at_most: Some(PercentageThreshold::new(100.0)),
            error_percentage_at_most: Some(PercentageThreshold::new(100.0)),
            timeout_percentage_at_most: Some(PercentageThreshold::new(100.0)),
            ..Self::default()
        }
    }
}

/// Frequency map keyed by root-cause string.
pub type TypeFrequencies = HashMap<String, u64>;
