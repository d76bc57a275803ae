use crate::dispatcher::HandlerResponse;
use crate::error::reason_phrase;
use may_minihttp::Response;
use serde_json::Value;
use tracing::error;

/// Header slots in a `may_minihttp` response. `Server`, `Date` and `Content-Length` are written
/// by the transport and do not count.
pub const MAX_RESPONSE_HEADERS: usize = 16;

const TEXT_CONTENT_TYPE: &str = "Content-Type: text/plain; charset=utf-8";

/// Serialize the body: `Null` is empty, strings are written as-is, anything else as JSON.
pub fn encode_body(body: &Value) -> Result<Vec<u8>, serde_json::Error> {
    match body {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s.clone().into_bytes()),
        other => serde_json::to_vec(other),
    }
}

/// `Name: value` lines for `response`. String bodies without a content type get `text/plain`.
pub fn header_lines(response: &HandlerResponse) -> Vec<String> {
    let mut lines: Vec<String> = response
        .headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect();
    let has_content_type = response
        .headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
    if !has_content_type && matches!(response.body, Value::String(_)) {
        lines.push(TEXT_CONTENT_TYPE.to_string());
    }
    lines
}

/// Owned storage for the header lines of the response being encoded.
///
/// `may_minihttp` takes header lines as `&'static str` but copies them into its write buffer
/// as soon as the service call returns, before the connection's next request is served.
/// Lines therefore only have to live until the next [`HeaderLines::reset`].
#[derive(Debug, Default)]
pub(crate) struct HeaderLines {
    lines: Vec<Box<str>>,
}

impl HeaderLines {
    pub(crate) fn reset(&mut self) {
        self.lines.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lines.len()
    }

    #[allow(unsafe_code)]
    fn store(&mut self, line: String) -> &'static str {
        let line = line.into_boxed_str();
        let ptr: *const str = &*line;
        self.lines.push(line);
        // SAFETY: the boxed allocation does not move when `lines` grows and is freed only by
        // `reset` or drop. The service resets once per call, after the transport has encoded
        // the previous response.
        unsafe { &*ptr }
    }
}

/// Write a pipeline response to the transport.
///
/// Header lines are kept in `lines`, which must not be reset before the transport has encoded
/// `res`.
pub(crate) fn write_handler_response(
    res: &mut Response,
    response: &HandlerResponse,
    lines: &mut HeaderLines,
) {
    let body = match encode_body(&response.body) {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, status = response.status, "Failed to serialize response body");
            res.status_code(500, reason_phrase(500));
            return;
        }
    };

    let mut all = header_lines(response);
    if all.len() > MAX_RESPONSE_HEADERS {
        let dropped: Vec<String> = all
            .drain(MAX_RESPONSE_HEADERS..)
            .filter_map(|line| line.split_once(':').map(|(name, _)| name.to_string()))
            .collect();
        error!(
            status = response.status,
            limit = MAX_RESPONSE_HEADERS,
            dropped = ?dropped,
            "Response has more headers than the transport can write"
        );
    }

    res.status_code(usize::from(response.status), reason_phrase(response.status));
    for line in all {
        res.header(lines.store(line));
    }
    res.body_vec(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::REQUEST_ID_HEADER;
    use serde_json::json;

    #[test]
    fn test_encode_body() {
        assert!(encode_body(&Value::Null).unwrap().is_empty());
        assert_eq!(encode_body(&json!("hi")).unwrap(), b"hi");
        assert_eq!(encode_body(&json!({ "a": 1 })).unwrap(), br#"{"a":1}"#);
    }

    #[test]
    fn test_every_header_is_written() {
        let mut resp = HandlerResponse::json(201, json!({}));
        resp.set_header(REQUEST_ID_HEADER, "01J0000000000000000000000".to_string());
        resp.set_header("location", "/api/users/1".to_string());
        let lines = header_lines(&resp);
        assert!(lines.contains(&"content-type: application/json".to_string()));
        assert!(lines.contains(&"x-request-id: 01J0000000000000000000000".to_string()));
        assert!(lines.contains(&"location: /api/users/1".to_string()));
    }

    #[test]
    fn test_string_body_defaults_to_text() {
        let resp = HandlerResponse::new(200, Default::default(), json!("pong"));
        assert_eq!(header_lines(&resp), [TEXT_CONTENT_TYPE]);

        let mut resp = HandlerResponse::new(200, Default::default(), json!("<p/>"));
        resp.set_header("Content-Type", "text/html".to_string());
        assert_eq!(header_lines(&resp), ["Content-Type: text/html"]);
    }

    #[test]
    fn test_header_storage_is_not_bounded_by_distinct_values() {
        let mut lines = HeaderLines::default();
        for i in 0..2048 {
            let line = lines.store(format!("set-cookie: session={i}"));
            assert_eq!(line, format!("set-cookie: session={i}"));
            if i % 16 == 15 {
                lines.reset();
            }
        }
        assert_eq!(lines.len(), 0);
        assert_eq!(lines.store("location: /api/users/1".to_string()), "location: /api/users/1");
    }
}
