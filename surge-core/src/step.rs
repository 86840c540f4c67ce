use std::path::Path;
use std::time::Duration;

use http::Method;
use regex::Regex;

use surge_trace::model::{
    CountThreshold, PercentageThreshold, PercentileThreshold, RangeThreshold,
    StatusCodeThreshold, TypeMatchesThreshold,
};
use surge_trace::Expectation;

use crate::request::RequestBuilder;
use crate::user::VirtualUser;

fn is_valid_percentage(percentage: f64) -> bool {
    if !(0.0..=100.0).contains(&percentage) {
        tracing::warn!(percentage, "invalid percentage provided (expected between 0.0 and 100.0)");
        return false;
    }
    true
}

/// A named unit of work bound to one virtual-user invocation.
///
/// Carries the step's population expectation; thresholds are additive, and
/// the bundle present at the step's *first* archive is the canonical one
/// persisted to the step log (later changes are silently ignored for that
/// log).
pub struct Step<'u> {
    user: &'u mut VirtualUser,
    name: String,
    expectation: Expectation,
}

impl<'u> Step<'u> {
    pub(crate) fn new(user: &'u mut VirtualUser, name: String) -> Self {
        Self {
            user,
            name,
            expectation: Expectation::baseline(),
        }
    }

    /// Minimum success percentage expected over the step's population.
    #[must_use]
    pub fn expect_success_percentage_at_least(mut self, percentage: f64) -> Self {
        if is_valid_percentage(percentage) {
            self.expectation.success_percentage_at_least =
                Some(PercentageThreshold::new(percentage));
        }
        self
    }

    #[must_use]
    pub fn expect_failure_percentage_at_most(mut self, percentage: f64) -> Self {
        if is_valid_percentage(percentage) {
            self.expectation.failure_percentage_at_most =
                Some(PercentageThreshold::new(percentage));
        }
        self
    }

    #[must_use]
    pub fn expect_error_percentage_at_most(mut self, percentage: f64) -> Self {
        if is_valid_percentage(percentage) {
            self.expectation.error_percentage_at_most = Some(PercentageThreshold::new(percentage));
        }
        self
    }

    #[must_use]
    pub fn expect_timeout_percentage_at_most(mut self, percentage: f64) -> Self {
        if is_valid_percentage(percentage) {
            self.expectation.timeout_percentage_at_most =
                Some(PercentageThreshold::new(percentage));
        }
        self
    }

    #[must_use]
    pub fn expect_success_count_at_least(mut self, count: u64) -> Self {
        self.expectation.success_count_at_least = Some(CountThreshold::new(count));
        self
    }

    #[must_use]
    pub fn expect_failure_count_at_most(mut self, count: u64) -> Self {
        self.expectation.failure_count_at_most = Some(CountThreshold::new(count));
        self
    }

    #[must_use]
    pub fn expect_error_count_at_most(mut self, count: u64) -> Self {
        self.expectation.error_count_at_most = Some(CountThreshold::new(count));
        self
    }

    #[must_use]
    pub fn expect_timeout_count_at_most(mut self, count: u64) -> Self {
        self.expectation.timeout_count_at_most = Some(CountThreshold::new(count));
        self
    }

    /// Expect the given percentile of total request-response time to stay
    /// within `limit`. May be stacked for several percentiles.
    #[must_use]
    pub fn expect_total_request_response_time_percentile_limit(
        mut self,
        percentile: f64,
        limit: Duration,
    ) -> Self {
        if is_valid_percentage(percentile) {
            self.expectation
                .total_request_response_time_percentile_limits
                .push(PercentileThreshold::new(percentile, limit));
        }
        self
    }

    #[must_use]
    pub fn expect_time_to_first_byte_percentile_limit(
        mut self,
        percentile: f64,
        limit: Duration,
    ) -> Self {
        if is_valid_percentage(percentile) {
            self.expectation
                .time_to_first_byte_percentile_limits
                .push(PercentileThreshold::new(percentile, limit));
        }
        self
    }

    #[must_use]
    pub fn expect_time_after_request_sent_percentile_limit(
        mut self,
        percentile: f64,
        limit: Duration,
    ) -> Self {
        if is_valid_percentage(percentile) {
            self.expectation
                .time_after_request_sent_percentile_limits
                .push(PercentileThreshold::new(percentile, limit));
        }
        self
    }

    #[must_use]
    pub fn expect_total_request_bytes_within(mut self, min: u64, max: u64) -> Self {
        self.expectation.total_request_bytes_within = Some(RangeThreshold::new(min, max));
        self
    }

    #[must_use]
    pub fn expect_total_response_bytes_within(mut self, min: u64, max: u64) -> Self {
        self.expectation.total_response_bytes_within = Some(RangeThreshold::new(min, max));
        self
    }

    #[must_use]
    pub fn expect_status_code_percentage_at_least(mut self, status_code: u16, percentage: f64) -> Self {
        self.push_status_code_threshold(status_code, percentage, true);
        self
    }

    #[must_use]
    pub fn expect_status_code_percentage_at_most(mut self, status_code: u16, percentage: f64) -> Self {
        self.push_status_code_threshold(status_code, percentage, false);
        self
    }

    fn push_status_code_threshold(&mut self, status_code: u16, percentage: f64, is_at_least: bool) {
        self.expectation.status_code_thresholds.push(StatusCodeThreshold {
            is_at_least,
            status_code,
            percentage,
            unmet: false,
            actual_value: 0.0,
        });
    }

    /// Expect at least `percentage` of recorded failure root causes to
    /// match `pattern`.
    #[must_use]
    pub fn expect_failure_type_matches_percentage_at_least(
        mut self,
        pattern: &Regex,
        percentage: f64,
    ) -> Self {
        self.expectation
            .failure_type_matches_thresholds
            .push(type_matches(pattern, percentage, true));
        self
    }

    #[must_use]
    pub fn expect_failure_type_matches_percentage_at_most(
        mut self,
        pattern: &Regex,
        percentage: f64,
    ) -> Self {
        self.expectation
            .failure_type_matches_thresholds
            .push(type_matches(pattern, percentage, false));
        self
    }

    #[must_use]
    pub fn expect_error_type_matches_percentage_at_least(
        mut self,
        pattern: &Regex,
        percentage: f64,
    ) -> Self {
        self.expectation
            .error_type_matches_thresholds
            .push(type_matches(pattern, percentage, true));
        self
    }

    #[must_use]
    pub fn expect_error_type_matches_percentage_at_most(
        mut self,
        pattern: &Regex,
        percentage: f64,
    ) -> Self {
        self.expectation
            .error_type_matches_thresholds
            .push(type_matches(pattern, percentage, false));
        self
    }

    #[must_use]
    pub fn expect_timeout_type_matches_percentage_at_least(
        mut self,
        pattern: &Regex,
        percentage: f64,
    ) -> Self {
        self.expectation
            .timeout_type_matches_thresholds
            .push(type_matches(pattern, percentage, true));
        self
    }

    #[must_use]
    pub fn expect_timeout_type_matches_percentage_at_most(
        mut self,
        pattern: &Regex,
        percentage: f64,
    ) -> Self {
        self.expectation
            .timeout_type_matches_thresholds
            .push(type_matches(pattern, percentage, false));
        self
    }

    /// Starts building the step's request.
    #[must_use]
    pub fn request(self, method: Method, url: &str) -> RequestBuilder<'u> {
        RequestBuilder::from_step(self.user, self.name, self.expectation, method, url)
    }

    /// Builds the step's request from HTTP wire format. The raw request
    /// target is discarded in favor of `target_url`.
    #[must_use]
    pub fn request_raw(self, target_url: &str, raw: &[u8]) -> RequestBuilder<'u> {
        RequestBuilder::from_raw(self.user, self.name, self.expectation, target_url, raw)
    }

    /// Like [`Step::request_raw`], reading the wire-format request from a
    /// file.
    #[must_use]
    pub fn request_raw_from_file(self, target_url: &str, path: &Path) -> RequestBuilder<'u> {
        match std::fs::read(path) {
            Ok(raw) => RequestBuilder::from_raw(self.user, self.name, self.expectation, target_url, &raw),
            Err(err) => RequestBuilder::failed(
                self.user,
                self.name,
                self.expectation,
                target_url,
                format!("unable to read raw request file: {err}"),
            ),
        }
    }
}

fn type_matches(pattern: &Regex, percentage: f64, is_at_least: bool) -> TypeMatchesThreshold {
    TypeMatchesThreshold {
        is_at_least,
        pattern: pattern.as_str().to_string(),
        percentage,
        unmet: false,
        actual_value: 0.0,
    }
}
