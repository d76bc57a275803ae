#![allow(dead_code)]

use routemark::{HandlerResponse, HttpRequest};
use serde_json::{json, Value};

pub mod test_server {
    use std::net::{SocketAddr, TcpListener};
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    /// A free local port, released before returning.
    pub fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Parsed raw HTTP/1.1 response.
    pub struct RawResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl RawResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    /// Send one request with `Connection: close` and read the whole response.
    pub fn send_request(addr: SocketAddr, method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> RawResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
        for (k, v) in headers {
            req.push_str(&format!("{k}: {v}\r\n"));
        }
        req.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
        stream.write_all(req.as_bytes()).unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if response_complete(&buf) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        parse_response(&buf)
    }

    fn split_head(buf: &[u8]) -> Option<(usize, usize)> {
        let end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
        let head = String::from_utf8_lossy(&buf[..end]);
        let length = head
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.trim().eq_ignore_ascii_case("content-length").then(|| v.trim().parse().ok())?
            })
            .unwrap_or(0);
        Some((end + 4, length))
    }

    fn response_complete(buf: &[u8]) -> bool {
        split_head(buf).is_some_and(|(start, len)| buf.len() >= start + len)
    }

    fn parse_response(buf: &[u8]) -> RawResponse {
        let (start, len) = split_head(buf).expect("incomplete response");
        let head = String::from_utf8_lossy(&buf[..start - 4]).to_string();
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .expect("status line");
        let headers = lines
            .filter_map(|l| {
                let (k, v) = l.split_once(':')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        let end = (start + len).min(buf.len());
        let body = String::from_utf8_lossy(&buf[start..end]).to_string();
        RawResponse { status, headers, body }
    }
}

/// `GET` request for `path`.
pub fn get(path: &str) -> HttpRequest {
    HttpRequest::new(::http::Method::GET, path)
}

/// `POST` request for `path` with a JSON body.
pub fn post_json(path: &str, body: Value) -> HttpRequest {
    HttpRequest::new(::http::Method::POST, path).with_json(body)
}

/// Success envelope for `data`.
pub fn envelope(status: u16, data: Value) -> Value {
    json!({ "data": data, "statusCode": status })
}

pub fn assert_status(resp: &HandlerResponse, status: u16) {
    assert_eq!(resp.status, status, "unexpected response body: {}", resp.body);
}
