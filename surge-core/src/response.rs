use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use regex::Regex;
use url::Url;

use surge_http::SendOutcome;
use surge_trace::{Expectation, StepEntry, Timestamps, TraceStore};

/// Serializes human-readable response dumps across all user tasks.
static PRINT_LOCK: Mutex<()> = Mutex::new(());

/// The observation produced by one step execution.
///
/// Exactly one of the three failure fields can be set: a transport deadline
/// breach (`timeout`), any other transport failure (`error`), or the first
/// failed assertion (`assertion_failed`). Once any of them is set, further
/// assertions short-circuit, which keeps the categories disjoint.
pub struct Response {
    scenario: Arc<str>,
    step_name: String,
    expectation: Expectation,
    store: Arc<TraceStore>,
    request_url: String,
    final_url: Option<Url>,
    status: Option<u16>,
    status_line: String,
    timestamps: Timestamps,
    timeout: Option<String>,
    error: Option<String>,
    assertion_failed: Option<String>,
    body: Bytes,
    request_size: u64,
    response_size: u64,
    archived: bool,
    disabled: bool,
}

impl Response {
    pub(crate) fn from_outcome(
        scenario: Arc<str>,
        step_name: String,
        expectation: Expectation,
        store: Arc<TraceStore>,
        request_url: String,
        outcome: SendOutcome,
    ) -> Self {
        let (timeout, error) = match &outcome.failure {
            Some(failure) if failure.is_timeout() => (Some(failure.root_cause()), None),
            Some(failure) => (None, Some(failure.root_cause())),
            None => (None, None),
        };

        Self {
            scenario,
            step_name,
            expectation,
            store,
            request_url,
            final_url: outcome.final_url,
            status: outcome.status,
            status_line: outcome.status_line,
            timestamps: outcome.timestamps,
            timeout,
            error,
            assertion_failed: None,
            body: outcome.body,
            request_size: outcome.request_size,
            response_size: outcome.response_size,
            archived: false,
            disabled: false,
        }
    }

    /// A request that could not even be built (bad URL, malformed raw
    /// request). Counted as an Error outcome with the build problem as its
    /// root cause.
    pub(crate) fn from_build_failure(
        scenario: Arc<str>,
        step_name: String,
        expectation: Expectation,
        store: Arc<TraceStore>,
        request_url: String,
        message: String,
    ) -> Self {
        tracing::error!(step = %step_name, error = %message, "unable to build request");
        let now = std::time::SystemTime::now();
        Self {
            scenario,
            step_name,
            expectation,
            store,
            request_url,
            final_url: None,
            status: None,
            status_line: String::new(),
            timestamps: Timestamps {
                start: Some(now),
                done: Some(now),
                ..Timestamps::default()
            },
            timeout: None,
            error: Some(message),
            assertion_failed: None,
            body: Bytes::new(),
            request_size: 0,
            response_size: 0,
            archived: false,
            disabled: false,
        }
    }

    /// The inert response handed to a disabled user, so retiring scenario
    /// code can finish its chain without special-casing.
    pub(crate) fn skeleton(
        scenario: Arc<str>,
        step_name: String,
        expectation: Expectation,
        store: Arc<TraceStore>,
    ) -> Self {
        Self {
            scenario,
            step_name,
            expectation,
            store,
            request_url: String::new(),
            final_url: None,
            status: None,
            status_line: String::new(),
            timestamps: Timestamps::default(),
            timeout: None,
            error: None,
            assertion_failed: None,
            body: Bytes::new(),
            request_size: 0,
            response_size: 0,
            archived: false,
            disabled: true,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Status line rendition, e.g. `200 OK`.
    #[must_use]
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    #[must_use]
    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    /// URL after redirects were followed.
    #[must_use]
    pub fn final_url(&self) -> Option<&Url> {
        self.final_url.as_ref()
    }

    #[must_use]
    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    #[must_use]
    pub fn total_duration(&self) -> Option<Duration> {
        self.timestamps.total_duration()
    }

    #[must_use]
    pub fn request_size(&self) -> u64 {
        self.request_size
    }

    #[must_use]
    pub fn response_size(&self) -> u64 {
        self.response_size
    }

    #[must_use]
    pub fn timeout(&self) -> Option<&str> {
        self.timeout.as_deref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The first failed assertion's message, if any.
    #[must_use]
    pub fn assertion_failed(&self) -> Option<&str> {
        self.assertion_failed.as_deref()
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.assertion_failed.is_some()
    }

    /// Whether any of the three failure kinds is set.
    #[must_use]
    pub fn considered_unsuccessful(&self) -> bool {
        self.assertion_failed.is_some() || self.error.is_some() || self.timeout.is_some()
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(step = %self.step_name, "{message}");
        self.assertion_failed = Some(message);
    }

    fn short_circuit(&self) -> bool {
        self.disabled || self.considered_unsuccessful()
    }

    /// Arbitrary predicate over the response. The closure returns the
    /// failure message and whether the assertion held.
    #[must_use]
    pub fn assert_with(mut self, assertion: impl FnOnce(&Response) -> (String, bool)) -> Self {
        if self.short_circuit() {
            return self;
        }
        let (message, ok) = assertion(&self);
        if !ok {
            self.mark_failed(format!("assertion of function on response failed {message}"));
        }
        self
    }

    #[must_use]
    pub fn assert_status_code(mut self, status: StatusCode) -> Self {
        if self.short_circuit() {
            return self;
        }
        let got = self.status.unwrap_or(0);
        if got != status.as_u16() {
            self.mark_failed(format!(
                "assertion of status code failed: got {got} want {}",
                status.as_u16()
            ));
        }
        self
    }

    /// Compares the full status line, e.g. `200 OK`.
    #[must_use]
    pub fn assert_status(mut self, status: &str) -> Self {
        if self.short_circuit() {
            return self;
        }
        if self.status_line != status {
            self.mark_failed(format!(
                "assertion of status failed: got {} want {status}",
                self.status_line
            ));
        }
        self
    }

    #[must_use]
    pub fn assert_body_matches(mut self, pattern: &Regex) -> Self {
        if self.short_circuit() {
            return self;
        }
        if !pattern.is_match(&self.body_text()) {
            self.mark_failed(format!(
                "assertion of body content failed (response body did not match expected regular expression): {}",
                pattern.as_str()
            ));
        }
        self
    }

    #[must_use]
    pub fn assert_body_contains(mut self, needle: &str) -> Self {
        if self.short_circuit() {
            return self;
        }
        if !self.body_text().contains(needle) {
            self.mark_failed(format!(
                "assertion of body content failed (response body did not contain expected value): {needle}"
            ));
        }
        self
    }

    #[must_use]
    pub fn assert_body_size_at_least(mut self, bytes: usize) -> Self {
        if self.short_circuit() {
            return self;
        }
        let length = self.body.len();
        if length < bytes {
            self.mark_failed(format!(
                "assertion of body size failed (response body was shorter than expected value): got {length} want >={bytes}"
            ));
        }
        self
    }

    #[must_use]
    pub fn assert_body_size_at_most(mut self, bytes: usize) -> Self {
        if self.short_circuit() {
            return self;
        }
        let length = self.body.len();
        if length > bytes {
            self.mark_failed(format!(
                "assertion of body size failed (response body was longer than expected value): got {length} want <={bytes}"
            ));
        }
        self
    }

    /// First capture group of the pattern's first match in the body.
    /// Side-effect-free: never touches the assertion state.
    #[must_use]
    pub fn extract_capture_group(&self, pattern: &Regex) -> Option<String> {
        let body = self.body_text();
        let captures = pattern.captures(&body)?;
        captures.get(1).map(|m| m.as_str().to_string())
    }

    /// String value at a JSON pointer path (e.g. `/user/name`) in the body.
    #[must_use]
    pub fn extract_string_from_json(&self, pointer: &str) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        value.pointer(pointer)?.as_str().map(String::from)
    }

    /// String-array value at a JSON pointer path in the body.
    #[must_use]
    pub fn extract_strings_from_json(&self, pointer: &str) -> Vec<String> {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(&self.body) else {
            return Vec::new();
        };
        let Some(array) = value.pointer(pointer).and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        array
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    }

    /// Persists this observation to the step log. At most once per
    /// response; the first archive for a step name also pins that step's
    /// canonical expectation.
    ///
    /// A trace-store write failure is fatal: the run's observations are no
    /// longer trustworthy once the log is broken.
    #[must_use]
    pub fn archive_stats(mut self) -> Self {
        if self.disabled || self.archived || !self.store.is_enabled() {
            return self;
        }
        let entry = self.step_entry();
        if let Err(err) = self.store.archive(&self.step_name, &self.expectation, &entry) {
            panic!("trace store write failed for step '{}': {err}", self.step_name);
        }
        self.archived = true;
        self
    }

    /// Writes a human block with the URL, status line and derived timings,
    /// serialized through the global print lock.
    #[must_use]
    pub fn print_stats<W: Write>(self, out: &mut W) -> Self {
        let _guard = PRINT_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = writeln!(out);
        let _ = writeln!(out, "------------------------------------------------------------------");
        let _ = writeln!(out, "{}", self.request_url);
        let _ = writeln!(out, "{}", self.status_line);
        let _ = writeln!(
            out,
            "Total-Duration: {}",
            render_duration(self.timestamps.total_duration())
        );
        let _ = writeln!(
            out,
            "Time-to-First-Byte: {}",
            render_duration(self.timestamps.time_to_first_byte(false))
        );
        let _ = writeln!(
            out,
            "Time-to-First-Byte (after Request-Sent): {}",
            render_duration(self.timestamps.time_to_first_byte(true))
        );
        let _ = writeln!(out, "------------------------------------------------------------------");
        let _ = writeln!(out);
        self
    }

    pub(crate) fn step_entry(&self) -> StepEntry {
        StepEntry {
            scenario: self.scenario.to_string(),
            timestamps: self.timestamps,
            timeout: self.timeout.is_some(),
            timeout_root_cause: self.timeout.clone().unwrap_or_default(),
            error: self.error.is_some(),
            error_root_cause: self.error.clone().unwrap_or_default(),
            assertion_failed: self.assertion_failed.is_some(),
            assertion_failed_root_cause: self.assertion_failed.clone().unwrap_or_default(),
            status_code: self.status,
            request_size: self.request_size,
            response_size: self.response_size,
        }
    }
}

fn render_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => format!("{d:?}"),
        None => "n/a".to_string(),
    }
}
