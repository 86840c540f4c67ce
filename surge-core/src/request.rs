use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use http::Method;
use url::Url;

use surge_http::{parse_raw_request, RawRequest};
use surge_trace::Expectation;

use crate::response::Response;
use crate::user::VirtualUser;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Fluent request construction for one step.
///
/// The builder is consumed by exactly one of the two send variants. A
/// disabled user or a deferred build problem (bad URL, unreadable raw
/// request) flows through the same chain: the former yields a skeleton
/// response, the latter an Error-classified one.
pub struct RequestBuilder<'u> {
    user: &'u mut VirtualUser,
    step_name: String,
    expectation: Expectation,
    disabled: bool,
    method: Method,
    url: Option<Url>,
    url_raw: String,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    form_params: Vec<(String, String)>,
    body: Option<Bytes>,
    raw: Option<RawRequest>,
    invalid: Option<String>,
}

impl<'u> RequestBuilder<'u> {
    pub(crate) fn from_step(
        user: &'u mut VirtualUser,
        step_name: String,
        expectation: Expectation,
        method: Method,
        url: &str,
    ) -> Self {
        let mut builder = Self::bare(user, step_name, expectation, url);
        if builder.disabled {
            return builder;
        }
        builder.method = method;
        builder.parse_url(url);
        builder
    }

    pub(crate) fn from_raw(
        user: &'u mut VirtualUser,
        step_name: String,
        expectation: Expectation,
        target_url: &str,
        raw: &[u8],
    ) -> Self {
        let mut builder = Self::bare(user, step_name, expectation, target_url);
        if builder.disabled {
            return builder;
        }
        builder.parse_url(target_url);
        match parse_raw_request(raw) {
            Ok(parsed) => {
                builder.method = parsed.method.clone();
                builder.raw = Some(parsed);
            }
            Err(err) => builder.invalid = Some(err.to_string()),
        }
        builder
    }

    pub(crate) fn failed(
        user: &'u mut VirtualUser,
        step_name: String,
        expectation: Expectation,
        url: &str,
        message: String,
    ) -> Self {
        let mut builder = Self::bare(user, step_name, expectation, url);
        if !builder.disabled {
            builder.invalid = Some(message);
        }
        builder
    }

    fn bare(
        user: &'u mut VirtualUser,
        step_name: String,
        expectation: Expectation,
        url: &str,
    ) -> Self {
        let disabled = user.is_disabled();
        Self {
            user,
            step_name,
            expectation,
            disabled,
            method: Method::GET,
            url: None,
            url_raw: url.to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
            form_params: Vec::new(),
            body: None,
            raw: None,
            invalid: None,
        }
    }

    fn parse_url(&mut self, url: &str) {
        match Url::parse(url) {
            Ok(parsed) => self.url = Some(parsed),
            Err(err) => self.invalid = Some(format!("invalid url '{url}': {err}")),
        }
    }

    /// Sets a header, replacing any earlier value for the same name.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if self.disabled {
            return self;
        }
        set_pair(&mut self.headers, key.into(), value.into());
        self
    }

    /// Sets an explicit request cookie (independent of the per-user jar,
    /// which keeps collecting received cookies automatically).
    #[must_use]
    pub fn cookie(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if self.disabled {
            return self;
        }
        set_pair(&mut self.cookies, key.into(), value.into());
        self
    }

    /// Sets a form parameter. The first one switches the request to
    /// `application/x-www-form-urlencoded` unless a content type was set.
    #[must_use]
    pub fn form_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if self.disabled {
            return self;
        }
        set_pair(&mut self.form_params, key.into(), value.into());
        if !has_pair(&self.headers, "content-type") && !self.raw_has_content_type() {
            set_pair(
                &mut self.headers,
                "Content-Type".to_string(),
                FORM_CONTENT_TYPE.to_string(),
            );
        }
        self
    }

    /// Sets a raw request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        if self.disabled {
            return self;
        }
        self.body = Some(body.into());
        self
    }

    fn raw_has_content_type(&self) -> bool {
        self.raw
            .as_ref()
            .is_some_and(|raw| raw.headers.contains_key(http::header::CONTENT_TYPE))
    }

    /// Dispatches with a network deadline; a breach on send or body read
    /// classifies the outcome as Timeout.
    pub async fn send_with_timeout(self, timeout: Duration) -> Response {
        self.dispatch(Some(timeout)).await
    }

    /// Dispatches without any deadline.
    pub async fn send_without_timeout(self) -> Response {
        self.dispatch(None).await
    }

    async fn dispatch(self, timeout: Option<Duration>) -> Response {
        let Self {
            user,
            step_name,
            expectation,
            disabled,
            method,
            url,
            url_raw,
            headers,
            cookies,
            form_params,
            body,
            raw,
            invalid,
        } = self;

        let scenario = user.scenario_title();
        let store = user.ctx.store.clone();

        if disabled {
            return Response::skeleton(scenario, step_name, expectation, store);
        }
        if let Some(message) = invalid {
            return Response::from_build_failure(scenario, step_name, expectation, store, url_raw, message);
        }
        let Some(url) = url else {
            return Response::from_build_failure(
                scenario,
                step_name,
                expectation,
                store,
                url_raw,
                "missing request url".to_string(),
            );
        };

        // Assemble headers: raw-request headers first, then builder
        // overrides on top.
        let mut header_map = match &raw {
            Some(raw) => raw.headers.clone(),
            None => HeaderMap::new(),
        };
        for (key, value) in &headers {
            let name = match HeaderName::from_bytes(key.as_bytes()) {
                Ok(name) => name,
                Err(err) => {
                    return Response::from_build_failure(
                        scenario,
                        step_name,
                        expectation,
                        store,
                        url_raw,
                        format!("invalid http header name '{key}': {err}"),
                    );
                }
            };
            let value = match HeaderValue::from_str(value) {
                Ok(value) => value,
                Err(err) => {
                    return Response::from_build_failure(
                        scenario,
                        step_name,
                        expectation,
                        store,
                        url_raw,
                        format!("invalid http header value for '{key}': {err}"),
                    );
                }
            };
            header_map.insert(name, value);
        }

        if !cookies.is_empty() {
            let joined = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            match HeaderValue::from_str(&joined) {
                Ok(value) => {
                    header_map.append(COOKIE, value);
                }
                Err(err) => {
                    return Response::from_build_failure(
                        scenario,
                        step_name,
                        expectation,
                        store,
                        url_raw,
                        format!("invalid cookie value: {err}"),
                    );
                }
            }
        }

        // Resolve the body: explicit form parameters win over a custom body.
        let resolved_body = if !form_params.is_empty() {
            if body.is_some() {
                tracing::warn!(step = %step_name, "custom body provided but form params win");
            }
            let mut encoder = url::form_urlencoded::Serializer::new(String::new());
            for (k, v) in &form_params {
                encoder.append_pair(k, v);
            }
            Bytes::from(encoder.finish())
        } else if let Some(body) = body {
            body
        } else {
            match &raw {
                Some(raw) => raw.body.clone(),
                None => Bytes::new(),
            }
        };

        let mut prepared =
            user.client()
                .prepare(method, url.clone(), header_map, resolved_body, timeout);

        // Registered interceptors may mutate the outgoing request.
        let interceptors = user.ctx.interceptors.clone();
        for interceptor in interceptors.iter() {
            interceptor(&*user, prepared.request_mut());
        }

        let settings = &user.ctx.settings;
        if settings.add_scenario_step_header {
            insert_diagnostic_header(
                prepared.headers_mut(),
                "scenario-step",
                &format!("{scenario}: {step_name}"),
            );
        }
        if settings.add_user_loop_header {
            insert_diagnostic_header(
                prepared.headers_mut(),
                "user-loop",
                &format!("{}/{}", user.current_user(), user.current_loop()),
            );
        }

        tracing::debug!(
            scenario = %scenario,
            user = user.current_user(),
            iteration = user.current_loop(),
            step = %step_name,
            "dispatching step request"
        );

        let outcome = user.client().send(prepared).await;
        Response::from_outcome(scenario, step_name, expectation, store, url_raw, outcome)
    }
}

fn insert_diagnostic_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(err) => tracing::warn!(header = name, error = %err, "diagnostic header value rejected"),
    }
}

fn set_pair(pairs: &mut Vec<(String, String)>, key: String, value: String) {
    match pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
        Some(existing) => existing.1 = value,
        None => pairs.push((key, value)),
    }
}

fn has_pair(pairs: &[(String, String)], key: &str) -> bool {
    pairs.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
}
