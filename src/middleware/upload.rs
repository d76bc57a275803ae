//! `multipart/form-data` extraction for upload markers.

use serde_json::{Map, Value};
use tracing::debug;

use super::{Middleware, MiddlewareResult};
use crate::context::{RequestContext, UploadedFile};
use crate::error::HttpError;

/// How many files the upload field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Exactly one file, attached as `request.file`.
    Single,
    /// Any number of files, attached as `request.files`.
    Multiple,
}

/// Parses a multipart body and attaches the files of one field to the request.
///
/// Text fields are merged into the request body object. Requests that are not multipart pass
/// through untouched. Files sent under other field names are left for other upload markers.
#[derive(Debug, Clone)]
pub struct UploadMiddleware {
    field: String,
    mode: UploadMode,
    name: String,
}

impl UploadMiddleware {
    pub fn single(field: impl Into<String>) -> Self {
        Self::new(field.into(), UploadMode::Single)
    }

    pub fn multiple(field: impl Into<String>) -> Self {
        Self::new(field.into(), UploadMode::Multiple)
    }

    fn new(field: String, mode: UploadMode) -> Self {
        let name = format!("Upload<{field}>");
        Self { field, mode, name }
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[must_use]
    pub fn mode(&self) -> UploadMode {
        self.mode
    }
}

impl Middleware for UploadMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn before(&self, ctx: &RequestContext) -> MiddlewareResult {
        let mut request = ctx.request.lock();
        let Some(boundary) = request.content_type().and_then(multipart_boundary) else {
            return Ok(None);
        };
        let parts = parse_multipart(&request.raw_body, &boundary)
            .ok_or_else(|| HttpError::bad_request("Malformed multipart body"))?;

        let mut files = Vec::new();
        let mut fields = Map::new();
        for part in parts {
            match part.file_name {
                Some(file_name) if part.name == self.field => files.push(UploadedFile {
                    field_name: part.name,
                    file_name,
                    content_type: part.content_type,
                    data: part.data,
                }),
                Some(_) => {}
                None => {
                    let text = String::from_utf8_lossy(&part.data).into_owned();
                    fields.insert(part.name, Value::String(text));
                }
            }
        }

        if self.mode == UploadMode::Single && files.len() > 1 {
            return Err(HttpError::bad_request("Unexpected field"));
        }

        debug!(
            request_id = %request.request_id,
            field = %self.field,
            file_count = files.len(),
            text_fields = fields.len(),
            "Multipart body parsed"
        );

        match &mut request.body {
            Value::Object(body) => body.extend(fields),
            body => *body = Value::Object(fields),
        }
        match self.mode {
            UploadMode::Single => request.file = files.pop(),
            UploadMode::Multiple if !files.is_empty() => request.files = Some(files),
            UploadMode::Multiple => {}
        }
        Ok(None)
    }
}

#[derive(Debug)]
struct Part {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

/// Boundary parameter of a `multipart/form-data` content type.
fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.find_map(|p| {
        let (k, v) = p.trim().split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| v.trim().trim_matches('"').to_string())
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn parse_multipart(body: &[u8], boundary: &str) -> Option<Vec<Part>> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut separator = b"\r\n".to_vec();
    separator.extend_from_slice(&delimiter);

    let mut parts = Vec::new();
    let mut pos = find(body, &delimiter, 0)? + delimiter.len();
    loop {
        let rest = body.get(pos..)?;
        if rest.starts_with(b"--") {
            return Some(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return None;
        }
        pos += 2;
        let header_end = find(body, b"\r\n\r\n", pos)?;
        let headers = String::from_utf8_lossy(&body[pos..header_end]);
        let content_start = header_end + 4;
        let content_end = find(body, &separator, content_start)?;
        parts.push(parse_part(&headers, body[content_start..content_end].to_vec())?);
        pos = content_end + separator.len();
    }
}

fn parse_part(headers: &str, data: Vec<u8>) -> Option<Part> {
    let mut name = None;
    let mut file_name = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((k, v)) = param.trim().split_once('=') else {
                    continue;
                };
                let v = v.trim().trim_matches('"').to_string();
                match k.trim() {
                    "name" => name = Some(v),
                    "filename" => file_name = Some(v),
                    _ => {}
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }
    Some(Part {
        name: name?,
        file_name,
        content_type,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HttpRequest;
    use http::Method;
    use serde_json::json;

    const BOUNDARY: &str = "XyZ";

    fn multipart(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
        let mut out = String::new();
        for (name, file, content) in parts {
            out.push_str(&format!("--{BOUNDARY}\r\n"));
            match file {
                Some(f) => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\nContent-Type: text/plain\r\n\r\n"
                )),
                None => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            out.push_str(content);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{BOUNDARY}--\r\n"));
        out.into_bytes()
    }

    fn ctx(body: Vec<u8>) -> RequestContext {
        RequestContext::new(HttpRequest::new(Method::POST, "/upload").with_raw_body(
            &format!("multipart/form-data; boundary={BOUNDARY}"),
            body,
        ))
    }

    #[test]
    fn test_single_file_and_text_fields() {
        let ctx = ctx(multipart(&[
            ("title", None, "holiday"),
            ("avatar", Some("me.png"), "PNGDATA"),
        ]));
        UploadMiddleware::single("avatar").before(&ctx).unwrap();

        let req = ctx.request.lock();
        let file = req.file.as_ref().unwrap();
        assert_eq!(file.file_name, "me.png");
        assert_eq!(file.data, b"PNGDATA");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(req.body, json!({ "title": "holiday" }));
    }

    #[test]
    fn test_multiple_files() {
        let ctx = ctx(multipart(&[
            ("docs", Some("a.txt"), "A"),
            ("docs", Some("b.txt"), "B"),
        ]));
        UploadMiddleware::multiple("docs").before(&ctx).unwrap();
        let names: Vec<_> = ctx
            .request
            .lock()
            .files
            .clone()
            .unwrap()
            .into_iter()
            .map(|f| f.file_name)
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }

    #[test]
    fn test_single_rejects_second_file() {
        let ctx = ctx(multipart(&[
            ("avatar", Some("a.png"), "A"),
            ("avatar", Some("b.png"), "B"),
        ]));
        let err = UploadMiddleware::single("avatar").before(&ctx).unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_non_multipart_passes_through() {
        let ctx = RequestContext::new(
            HttpRequest::new(Method::POST, "/upload").with_json(json!({ "a": 1 })),
        );
        assert!(UploadMiddleware::single("avatar").before(&ctx).unwrap().is_none());
        assert!(ctx.request.lock().file.is_none());
        assert_eq!(ctx.request.lock().body, json!({ "a": 1 }));
    }

    #[test]
    fn test_malformed_body_is_400() {
        let ctx = ctx(b"--XyZ\r\nno header end".to_vec());
        assert_eq!(
            UploadMiddleware::single("avatar").before(&ctx).unwrap_err().status,
            400
        );
    }

    #[test]
    fn test_boundary_parsing() {
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=\"abc\"").as_deref(),
            Some("abc")
        );
        assert_eq!(multipart_boundary("application/json"), None);
    }
}
