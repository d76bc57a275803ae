use crate::context::HttpRequest;
use crate::error::HttpError;
use crate::ids::RequestId;
use http::Method;
use may_minihttp::Request;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::{self, Read};
use tracing::{debug, info};

/// Parse the `Cookie` header into name/value pairs.
pub fn parse_cookies(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .get("cookie")
        .map(|c| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((name.to_string(), value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse urlencoded pairs into a JSON object.
///
/// Values are strings; a key given more than once collects its values into an array.
pub fn parse_urlencoded(raw: &[u8]) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in url::form_urlencoded::parse(raw) {
        let value = Value::String(v.into_owned());
        match out.get_mut(k.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                out.insert(k.into_owned(), value);
            }
        }
    }
    out
}

/// Split a request target into its path and parsed query string.
pub fn parse_query_params(target: &str) -> (&str, Map<String, Value>) {
    match target.split_once('?') {
        Some((path, query)) => (path, parse_urlencoded(query.as_bytes())),
        None => (target, Map::new()),
    }
}

/// Decode a body according to its content type.
///
/// JSON and urlencoded bodies are parsed; anything else (multipart included) is left for
/// middlewares to handle from the raw bytes and yields `Null`.
pub fn parse_body(content_type: Option<&str>, raw: &[u8]) -> Result<Value, HttpError> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match essence.as_deref() {
        Some("application/json") => serde_json::from_slice(raw)
            .map_err(|e| HttpError::bad_request("Invalid JSON body").with_source(e)),
        Some(ct) if ct.ends_with("+json") => serde_json::from_slice(raw)
            .map_err(|e| HttpError::bad_request("Invalid JSON body").with_source(e)),
        Some("application/x-www-form-urlencoded") => Ok(Value::Object(parse_urlencoded(raw))),
        _ => Ok(Value::Null),
    }
}

/// Assemble an [`HttpRequest`] from already-extracted transport parts.
pub fn build_request(
    method: &str,
    target: &str,
    headers: HashMap<String, String>,
    raw_body: Vec<u8>,
) -> Result<HttpRequest, HttpError> {
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| HttpError::bad_request(format!("Invalid method {method:?}")))?;
    let (path, query) = parse_query_params(target);
    let cookies = parse_cookies(&headers);
    let request_id = RequestId::from_header_or_new(headers.get("x-request-id").map(String::as_str));
    let body = parse_body(
        headers.get("content-type").map(String::as_str),
        &raw_body,
    )?;

    let mut request = HttpRequest::new(method, path);
    request.request_id = request_id;
    request.headers = headers;
    request.cookies = cookies;
    request.query = query;
    request.body = body;
    request.raw_body = raw_body;
    Ok(request)
}

/// Read a `may_minihttp` request into an [`HttpRequest`].
///
/// Bodies longer than `max_body_bytes` are rejected with 413 without being buffered in full.
pub fn parse_request(req: Request, max_body_bytes: usize) -> Result<HttpRequest, HttpError> {
    let method = req.method().to_string();
    let target = req.path().to_string();

    // R1: headers extracted (names lowercased)
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();
    debug!(header_count = headers.len(), "Headers extracted");

    let declared = headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<u64>().ok());
    let max = u64::try_from(max_body_bytes).unwrap_or(u64::MAX);
    let mut body = req.body();

    // Oversized bodies are drained so the connection stays usable for the 413 response.
    if let Some(declared) = declared.filter(|&d| d > max) {
        drain(&mut body, declared);
        return Err(HttpError::status(413));
    }

    // R2: body read, capped one byte past the limit
    let mut raw_body = Vec::new();
    body.by_ref()
        .take(max.saturating_add(1))
        .read_to_end(&mut raw_body)
        .map_err(|e| HttpError::bad_request("Failed to read request body").with_source(e))?;
    if raw_body.len() > max_body_bytes {
        drain(&mut body, u64::MAX);
        return Err(HttpError::status(413));
    }

    let request = build_request(&method, &target, headers, raw_body)?;

    // R3: request parsed
    info!(
        request_id = %request.request_id,
        method = %request.method,
        path = %request.path,
        query_params = request.query.len(),
        body_size_bytes = request.raw_body.len(),
        "HTTP request parsed"
    );
    Ok(request)
}

fn drain(body: &mut impl Read, at_most: u64) {
    match io::copy(&mut body.take(at_most), &mut io::sink()) {
        Ok(skipped) => debug!(skipped_bytes = skipped, "Oversized request body drained"),
        Err(err) => debug!(error = %err, "Failed to drain oversized request body"),
    }
}
