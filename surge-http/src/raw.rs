use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;

use super::{Error, Result};

/// A request parsed from HTTP/1.x wire format.
///
/// The request target is discarded: the caller supplies the URL the request
/// is replayed against. Parsed headers (including Host) are preserved
/// verbatim, the remainder of the input is the body.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Parses a buffered HTTP/1.x request: request line, header block, body.
pub fn parse_raw_request(input: &[u8]) -> Result<RawRequest> {
    let (head, body) = split_head(input)?;
    let text = std::str::from_utf8(head)
        .map_err(|_| Error::RawRequest("head is not valid utf-8".to_string()))?;

    let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));
    let request_line = lines
        .next()
        .ok_or_else(|| Error::RawRequest("missing request line".to_string()))?;

    let mut parts = request_line.split_ascii_whitespace();
    let method_raw = parts
        .next()
        .ok_or_else(|| Error::RawRequest("missing method".to_string()))?;
    let _target = parts
        .next()
        .ok_or_else(|| Error::RawRequest("missing request target".to_string()))?;
    let version = parts
        .next()
        .ok_or_else(|| Error::RawRequest("missing http version".to_string()))?;
    if !version.starts_with("HTTP/") {
        return Err(Error::RawRequest(format!("invalid http version: {version}")));
    }

    let method = Method::from_bytes(method_raw.as_bytes())
        .map_err(|_| Error::RawRequest(format!("invalid method: {method_raw}")))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::RawRequest(format!("invalid header line: {line}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())?;
        let value = HeaderValue::from_str(value.trim())?;
        headers.append(name, value);
    }

    Ok(RawRequest {
        method,
        headers,
        body: Bytes::copy_from_slice(body),
    })
}

/// Splits the input at the blank line ending the header block. Accepts bare
/// LF line endings as a convenience for hand-written fixture files.
fn split_head(input: &[u8]) -> Result<(&[u8], &[u8])> {
    if let Some(pos) = find(input, b"\r\n\r\n") {
        return Ok((&input[..pos], &input[pos + 4..]));
    }
    if let Some(pos) = find(input, b"\n\n") {
        // Normalization is left to the line splitter, which tolerates both.
        return Ok((&input[..pos], &input[pos + 2..]));
    }
    // No blank line: the whole input is the head, there is no body.
    Ok((input, &[]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
