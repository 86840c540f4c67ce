use http::header::{HeaderMap, CONTENT_LENGTH, HOST};
use http::Method;
use url::Url;

/// Estimate bytes sent on the wire for a request head: HTTP/1.1 request
/// line plus headers.
///
/// Headers the transport adds implicitly (Host, Content-Length) are counted
/// when missing so the accounting stays deterministic across clients.
#[must_use]
pub fn request_head_bytes(method: &Method, url: &Url, headers: &HeaderMap, body_len: u64) -> u64 {
    let mut bytes = request_line_bytes(method, url);

    for (name, value) in headers.iter() {
        bytes = bytes.saturating_add(header_bytes(name.as_str().len(), value.as_bytes().len()));
    }

    if !headers.contains_key(HOST) {
        if let Some(host) = host_header_value(url) {
            bytes = bytes.saturating_add(header_bytes("host".len(), host.len()));
        }
    }
    if body_len != 0 && !headers.contains_key(CONTENT_LENGTH) {
        bytes = bytes.saturating_add(header_bytes(
            "content-length".len(),
            body_len.to_string().len(),
        ));
    }

    // End-of-headers CRLF.
    bytes.saturating_add(2)
}

/// Estimate bytes received for a response head: HTTP/1.1 status line plus
/// headers (the reason phrase is ignored).
#[must_use]
pub fn response_head_bytes(status: u16, headers: &HeaderMap) -> u64 {
    // "HTTP/1.1 SP 200 CRLF"
    let mut bytes = ("HTTP/1.1".len() as u64)
        .saturating_add(1)
        .saturating_add(status.to_string().len() as u64)
        .saturating_add(2);
    for (name, value) in headers.iter() {
        bytes = bytes.saturating_add(header_bytes(name.as_str().len(), value.as_bytes().len()));
    }
    bytes.saturating_add(2)
}

fn request_line_bytes(method: &Method, url: &Url) -> u64 {
    let path_len = url.path().len() + url.query().map_or(0, |q| q.len() + 1);

    // "METHOD SP path SP HTTP/1.1 CRLF"
    (method.as_str().len() as u64)
        .saturating_add(1)
        .saturating_add(path_len as u64)
        .saturating_add(1)
        .saturating_add("HTTP/1.1".len() as u64)
        .saturating_add(2)
}

fn header_bytes(name_len: usize, value_len: usize) -> u64 {
    // "name: value\r\n"
    (name_len as u64)
        .saturating_add(2)
        .saturating_add(value_len as u64)
        .saturating_add(2)
}

fn host_header_value(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(url: &str) -> Url {
        Url::parse(url).unwrap_or_else(|e| panic!("url: {e}"))
    }

    #[test]
    fn request_head_counts_line_headers_and_implicit_host() {
        let url = parse("http://example.com/hello?x=1");
        let headers = HeaderMap::new();

        // "GET /hello?x=1 HTTP/1.1\r\n" = 25
        // "host: example.com\r\n" = 19
        // final CRLF = 2
        assert_eq!(request_head_bytes(&Method::GET, &url, &headers, 0), 46);
    }

    #[test]
    fn request_head_counts_implicit_content_length_for_bodies() {
        let url = parse("http://example.com/");
        let headers = HeaderMap::new();

        let without_body = request_head_bytes(&Method::POST, &url, &headers, 0);
        let with_body = request_head_bytes(&Method::POST, &url, &headers, 120);
        // "content-length: 120\r\n" = 21
        assert_eq!(with_body, without_body + 21);
    }

    #[test]
    fn explicit_host_is_not_double_counted() {
        let url = parse("http://example.com/");
        let mut headers = HeaderMap::new();
        headers.insert(HOST, http::HeaderValue::from_static("example.com"));

        let explicit = request_head_bytes(&Method::GET, &url, &headers, 0);
        let implicit = request_head_bytes(&Method::GET, &url, &HeaderMap::new(), 0);
        assert_eq!(explicit, implicit);
    }

    #[test]
    fn response_head_counts_status_line_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain"),
        );

        // "HTTP/1.1 200\r\n" = 14
        // "content-type: text/plain\r\n" = 26
        // final CRLF = 2
        assert_eq!(response_head_bytes(200, &headers), 42);
    }
}
