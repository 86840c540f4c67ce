pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid proxy url: {0}")]
    InvalidProxy(String),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("failed to build http client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("malformed raw http request: {0}")]
    RawRequest(String),

    #[error("unable to read raw request file: {0}")]
    RawRequestFile(#[source] std::io::Error),
}

/// Deepest cause in an error's `source()` chain.
///
/// Low-level transport failures surface wrapped in several layers; keying
/// failure histograms by the innermost message makes identical root causes
/// aggregate into one bucket.
#[must_use]
pub fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
