use std::sync::{Arc, RwLock};

use http::HeaderValue;
use reqwest::cookie::{CookieStore, Jar};
use url::Url;

/// A per-user cookie jar that can be emptied between loops without
/// rebuilding the client (and so without dropping its connection pool).
///
/// All store operations delegate to the current inner jar; `clear` swaps in
/// a fresh one.
pub(crate) struct ClearableJar {
    inner: RwLock<Arc<Jar>>,
}

impl ClearableJar {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Jar::default())),
        }
    }

    pub(crate) fn clear(&self) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(Jar::default());
    }

    fn current(&self) -> Arc<Jar> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for ClearableJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClearableJar")
    }
}

impl CookieStore for ClearableJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.current().set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.current().cookies(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://example.com/").unwrap_or_else(|e| panic!("url: {e}"))
    }

    fn set(jar: &ClearableJar, header: &'static str) {
        let value = HeaderValue::from_static(header);
        let mut headers = std::iter::once(&value);
        jar.set_cookies(&mut headers, &url());
    }

    #[test]
    fn cookies_accumulate_until_cleared() {
        let jar = ClearableJar::new();
        assert!(jar.cookies(&url()).is_none());

        set(&jar, "session=abc");
        let header = match jar.cookies(&url()) {
            Some(h) => h,
            None => panic!("expected a cookie header"),
        };
        assert!(header.to_str().unwrap_or_default().contains("session=abc"));

        jar.clear();
        assert!(jar.cookies(&url()).is_none());

        // A cleared jar keeps working for new cookies.
        set(&jar, "session=def");
        assert!(jar.cookies(&url()).is_some());
    }
}
