use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH};
use http::Method;
use url::Url;

use surge_trace::Timestamps;

use super::error::root_cause;
use super::estimate;
use super::jar::ClearableJar;
use super::{Error, Result};

/// Process-wide transport options applied to every per-user client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub skip_certificate_validation: bool,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

/// Timing landmarks stamped by the client's tracing hooks.
///
/// `wrote_request` is stamped when the request body stream is drained (the
/// transport polls the body to its end right after writing the head), and
/// `got_first_response_byte` when the response head arrives. Both are
/// set-once, so retries of the poll cannot move a landmark.
#[derive(Debug, Default)]
struct TimingHooks {
    wrote_request: OnceLock<SystemTime>,
    got_first_response_byte: OnceLock<SystemTime>,
}

impl TimingHooks {
    fn stamp_wrote_request(&self) {
        let _ = self.wrote_request.set(SystemTime::now());
    }

    fn stamp_got_first_response_byte(&self) {
        let _ = self.got_first_response_byte.set(SystemTime::now());
    }
}

/// A request ready for dispatch, with its tracing hooks installed.
///
/// Interceptors may mutate the inner request (headers, URL) before the send.
pub struct PreparedRequest {
    request: reqwest::Request,
    hooks: Arc<TimingHooks>,
    body_len: u64,
}

impl PreparedRequest {
    pub fn request_mut(&mut self) -> &mut reqwest::Request {
        &mut self.request
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.request.headers_mut()
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        self.request.url()
    }
}

/// The two transport-level failure kinds, disjoint by construction: a
/// deadline breach is a timeout, anything else is an error.
#[derive(Debug)]
pub enum TransportFailure {
    Timeout(reqwest::Error),
    Error(reqwest::Error),
}

impl TransportFailure {
    fn classify(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Error(err)
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    fn as_error(&self) -> &reqwest::Error {
        match self {
            Self::Timeout(err) | Self::Error(err) => err,
        }
    }

    /// Deepest cause in the failure's source chain; the stable key for
    /// failure-type histograms.
    #[must_use]
    pub fn root_cause(&self) -> String {
        root_cause(self.as_error())
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_error())
    }
}

/// Everything observed for one dispatched request.
#[derive(Debug)]
pub struct SendOutcome {
    pub timestamps: Timestamps,
    pub status: Option<u16>,
    /// Status line rendition, e.g. `200 OK`. Empty when no response arrived.
    pub status_line: String,
    /// URL after any redirects were followed.
    pub final_url: Option<Url>,
    pub body: Bytes,
    /// Estimated bytes sent (request line + headers + body).
    pub request_size: u64,
    /// Estimated bytes received (status line + headers + decompressed body).
    pub response_size: u64,
    pub failure: Option<TransportFailure>,
}

/// One virtual user's HTTP client: its own cookie jar and connection pool,
/// shared with nobody.
#[derive(Debug, Clone)]
pub struct UserClient {
    inner: reqwest::Client,
    jar: Arc<ClearableJar>,
}

impl UserClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let jar = Arc::new(ClearableJar::new());

        let mut builder = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true);

        if config.skip_certificate_validation {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(proxy) = &config.proxy {
            let parsed = reqwest::Proxy::all(proxy.as_str())
                .map_err(|_| Error::InvalidProxy(proxy.clone()))?;
            builder = builder.proxy(parsed);
        }
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        let inner = builder.build().map_err(Error::ClientBuild)?;
        Ok(Self { inner, jar })
    }

    /// Empties the user's cookie jar while keeping the connection pool.
    pub fn clear_cookie_jar(&self) {
        self.jar.clear();
    }

    /// Builds a dispatchable request with the timed body installed.
    ///
    /// Content-Length is always made explicit (from the actual body) so the
    /// wire framing stays deterministic with a streamed body.
    pub fn prepare(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Bytes,
        timeout: Option<Duration>,
    ) -> PreparedRequest {
        let hooks = Arc::new(TimingHooks::default());
        let body_len = body.len() as u64;

        let mut request = reqwest::Request::new(method, url);
        *request.headers_mut() = headers;
        request
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(body_len));
        *request.timeout_mut() = timeout;

        let stamp = hooks.clone();
        let chunks: Vec<std::result::Result<Bytes, std::convert::Infallible>> = if body.is_empty()
        {
            Vec::new()
        } else {
            vec![Ok(body)]
        };
        let tail = futures::stream::poll_fn(move |_cx| {
            stamp.stamp_wrote_request();
            std::task::Poll::Ready(
                Option::<std::result::Result<Bytes, std::convert::Infallible>>::None,
            )
        });
        let timed_body = futures::StreamExt::chain(futures::stream::iter(chunks), tail);
        *request.body_mut() = Some(reqwest::Body::wrap_stream(timed_body));

        PreparedRequest {
            request,
            hooks,
            body_len,
        }
    }

    /// Dispatches a prepared request, stamping `start` immediately before
    /// and `done` immediately after the body is fully read (or the failure
    /// returned). The body is buffered whole for assertions and size
    /// accounting; gzip responses arrive already decompressed.
    pub async fn send(&self, prepared: PreparedRequest) -> SendOutcome {
        let PreparedRequest {
            request,
            hooks,
            body_len,
        } = prepared;

        let request_size =
            estimate::request_head_bytes(request.method(), request.url(), request.headers(), body_len)
                .saturating_add(body_len);

        let mut timestamps = Timestamps {
            start: Some(SystemTime::now()),
            ..Timestamps::default()
        };

        let outcome = match self.inner.execute(request).await {
            Ok(response) => {
                hooks.stamp_got_first_response_byte();

                let status = response.status();
                let status_line = match status.canonical_reason() {
                    Some(reason) => format!("{} {reason}", status.as_u16()),
                    None => status.as_u16().to_string(),
                };
                let final_url = response.url().clone();
                let head_bytes = estimate::response_head_bytes(status.as_u16(), response.headers());

                match response.bytes().await {
                    Ok(body) => {
                        timestamps.done = Some(SystemTime::now());
                        SendOutcome {
                            timestamps,
                            status: Some(status.as_u16()),
                            status_line,
                            final_url: Some(final_url),
                            response_size: head_bytes.saturating_add(body.len() as u64),
                            body,
                            request_size,
                            failure: None,
                        }
                    }
                    Err(err) => {
                        timestamps.done = Some(SystemTime::now());
                        tracing::debug!(error = %err, "reading response body failed");
                        SendOutcome {
                            timestamps,
                            status: Some(status.as_u16()),
                            status_line,
                            final_url: Some(final_url),
                            response_size: head_bytes,
                            body: Bytes::new(),
                            request_size,
                            failure: Some(TransportFailure::classify(err)),
                        }
                    }
                }
            }
            Err(err) => {
                timestamps.done = Some(SystemTime::now());
                tracing::debug!(error = %err, "request dispatch failed");
                SendOutcome {
                    timestamps,
                    status: None,
                    status_line: String::new(),
                    final_url: None,
                    body: Bytes::new(),
                    request_size,
                    response_size: 0,
                    failure: Some(TransportFailure::classify(err)),
                }
            }
        };

        let mut outcome = outcome;
        outcome.timestamps.wrote_request = hooks.wrote_request.get().copied();
        outcome.timestamps.got_first_response_byte = hooks.got_first_response_byte.get().copied();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> UserClient {
        UserClient::new(&ClientConfig::default()).unwrap_or_else(|e| panic!("client: {e}"))
    }

    fn parse(url: &str) -> Url {
        Url::parse(url).unwrap_or_else(|e| panic!("url: {e}"))
    }

    #[test]
    fn prepare_makes_content_length_explicit() {
        let prepared = client().prepare(
            Method::POST,
            parse("http://example.com/submit"),
            HeaderMap::new(),
            Bytes::from_static(b"field=value"),
            None,
        );
        assert_eq!(
            prepared.request.headers().get(CONTENT_LENGTH),
            Some(&HeaderValue::from(11u64))
        );
    }

    #[test]
    fn prepare_sets_the_per_request_timeout() {
        let prepared = client().prepare(
            Method::GET,
            parse("http://example.com/"),
            HeaderMap::new(),
            Bytes::new(),
            Some(Duration::from_secs(4)),
        );
        assert_eq!(
            prepared.request.timeout().copied(),
            Some(Duration::from_secs(4))
        );
    }

    #[test]
    fn invalid_proxy_is_rejected_at_build_time() {
        let config = ClientConfig {
            proxy: Some("definitely not a url".to_string()),
            ..ClientConfig::default()
        };
        assert!(matches!(
            UserClient::new(&config),
            Err(Error::InvalidProxy(_))
        ));
    }
}
