//! # Batch Request Codec
//!
//! Google APIs accept several calls in one round trip as a `multipart/mixed` body,
//! each part being a serialized HTTP request. The response mirrors it: one
//! `application/http` part per call, carrying that call's own status line and body.
//!
//! Parts are tagged with `Content-ID: <item-N>`; the server answers with
//! `<response-item-N>`, which is how results are matched back to requests.

use rand::Rng;
use serde_json::Value;

use crate::gcp::error::ApiError;

const BOUNDARY_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// One logical call inside a batch.
#[derive(Debug, Clone)]
pub struct BatchPart {
    pub method: &'static str,
    /// Path relative to the API root, e.g. `/v1/projects/p/serviceAccounts`.
    pub path: String,
    pub body: Option<Value>,
}

/// Outcome of one call inside a batch.
#[derive(Debug)]
pub struct BatchItem {
    /// Position of the originating [`BatchPart`].
    pub index: usize,
    pub result: Result<Value, ApiError>,
}

/// Receives per-item outcomes of a batch call. The caller drains it once the
/// call has returned.
#[derive(Debug, Default)]
pub struct BatchCollector {
    items: Vec<BatchItem>,
}

impl BatchCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, index: usize, result: Result<Value, ApiError>) {
        self.items.push(BatchItem { index, result });
    }

    /// Removes and yields every recorded item in request order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, BatchItem> {
        self.items.sort_by_key(|it| it.index);
        self.items.drain(..)
    }
}

pub fn random_boundary<R: Rng + ?Sized>(rng: &mut R) -> String {
    let tail: String = (0..24)
        .map(|_| BOUNDARY_CHARS[rng.random_range(0..BOUNDARY_CHARS.len())] as char)
        .collect();
    format!("batch_{tail}")
}

pub fn content_type(boundary: &str) -> String {
    format!("multipart/mixed; boundary={boundary}")
}

/// Serializes `parts` into a `multipart/mixed` body.
pub fn encode(boundary: &str, parts: &[BatchPart]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        out.push_str(&format!("--{boundary}\r\n"));
        out.push_str("Content-Type: application/http\r\n");
        out.push_str("Content-Transfer-Encoding: binary\r\n");
        out.push_str(&format!("Content-ID: <item-{i}>\r\n\r\n"));
        out.push_str(&format!("{} {} HTTP/1.1\r\n", part.method, part.path));
        match &part.body {
            Some(body) => {
                let json = body.to_string();
                out.push_str("Content-Type: application/json\r\n");
                out.push_str(&format!("Content-Length: {}\r\n\r\n", json.len()));
                out.push_str(&json);
                out.push_str("\r\n");
            }
            None => out.push_str("\r\n"),
        }
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out
}

/// Extracts the boundary parameter from a `multipart/mixed` content type.
pub fn boundary_from_content_type(ct: &str) -> Option<String> {
    ct.split(';').skip(1).find_map(|param| {
        let (k, v) = param.trim().split_once('=')?;
        if k.trim().eq_ignore_ascii_case("boundary") {
            Some(v.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Parses a batch response body into one [`BatchItem`] per expected request.
///
/// Requests that got no part in the response are reported as failures so the
/// caller always sees `expected` items.
pub fn decode(body: &str, boundary: &str, expected: usize) -> Result<Vec<BatchItem>, ApiError> {
    let delimiter = format!("--{boundary}");
    let mut segments = body.split(delimiter.as_str());
    if segments.next().is_none() {
        return Err(ApiError::Batch("empty body".into()));
    }

    let mut items: Vec<BatchItem> = Vec::new();
    for (position, segment) in segments.enumerate() {
        if segment.starts_with("--") {
            break;
        }
        let segment = segment.trim_start_matches(['\r', '\n']);
        if segment.trim().is_empty() {
            continue;
        }
        let (outer_headers, inner) = split_head(segment)
            .ok_or_else(|| ApiError::Batch(format!("part {position} has no header block")))?;
        let index = header_value(outer_headers, "content-id")
            .and_then(parse_content_id)
            .unwrap_or(position);
        items.push(BatchItem {
            index,
            result: decode_inner(inner)?,
        });
    }

    for index in 0..expected {
        if !items.iter().any(|it| it.index == index) {
            items.push(BatchItem {
                index,
                result: Err(ApiError::Batch(format!("no response for item {index}"))),
            });
        }
    }
    items.sort_by_key(|it| it.index);
    Ok(items)
}

/// Parses the embedded HTTP response of one part.
fn decode_inner(inner: &str) -> Result<Result<Value, ApiError>, ApiError> {
    let (head, body) = split_head(inner).unwrap_or((inner, ""));
    let status_line = head
        .lines()
        .next()
        .ok_or_else(|| ApiError::Batch("missing status line".into()))?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ApiError::Batch(format!("bad status line: {status_line}")))?;

    let body = body.trim();
    if !(200..300).contains(&status) {
        return Ok(Err(ApiError::from_response(status, body)));
    }
    if body.is_empty() {
        return Ok(Ok(Value::Null));
    }
    Ok(serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string())))
}

/// Splits at the first blank line, accepting both CRLF and bare LF.
fn split_head(s: &str) -> Option<(&str, &str)> {
    let crlf = s.find("\r\n\r\n").map(|i| (i, 4));
    let lf = s.find("\n\n").map(|i| (i, 2));
    let (at, len) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&s[..at], &s[at + len..]))
}

fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// `<response-item-3>` -> 3
fn parse_content_id(id: &str) -> Option<usize> {
    let id = id.trim_start_matches('<').trim_end_matches('>');
    let id = id.strip_prefix("response-").unwrap_or(id);
    id.strip_prefix("item-")?.parse().ok()
}
