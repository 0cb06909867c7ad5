//! HTTP/1.1 request-line and header parsing (spec §4.7, §6 wire format).
//!
//! Grounded directly on the wire-parsing loop in the teacher's `std:http`
//! native module: request-line splitting, header folding into a
//! lowercase-keyed map, and a `Content-Length`-driven body read.

use crate::error::{HttpError, HttpResult};
use rustc_hash::FxHashMap;
use std::io::{BufRead, BufReader, Read};
use std::net::TcpStream;

/// A fully parsed HTTP/1.1 request.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// Request method (`GET`, `POST`, ...), as written on the wire.
    pub method: String,
    /// Path component, not including the query string.
    pub path: String,
    /// Raw query string (everything after `?`), empty if absent.
    pub query: String,
    /// Header names lower-cased, values as written.
    pub headers: FxHashMap<String, String>,
    /// Request body bytes, `Content-Length` long.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Reset to an empty request, reusing the allocation backing `headers`
    /// and `body`. Used when recycling a pooled `RequestContext`.
    pub fn clear(&mut self) {
        self.method.clear();
        self.path.clear();
        self.query.clear();
        self.headers.clear();
        self.body.clear();
    }
}

/// Read and parse one HTTP/1.1 request from `stream`.
///
/// Blocking: reads the request line, then headers until the empty CRLF
/// line, then exactly `Content-Length` body bytes (0 if absent).
pub fn parse_request(stream: &TcpStream) -> HttpResult<HttpRequest> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request = HttpRequest::default();

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    if request_line.trim().is_empty() {
        return Err(HttpError::MalformedRequest("empty request line".to_string()));
    }
    let parts: Vec<&str> = request_line.trim_end().splitn(3, ' ').collect();
    if parts.len() < 2 {
        return Err(HttpError::MalformedRequest(request_line.trim().to_string()));
    }
    request.method = parts[0].to_string();
    let full_path = parts[1].to_string();
    match full_path.find('?') {
        Some(idx) => {
            request.path = full_path[..idx].to_string();
            request.query = full_path[idx + 1..].to_string();
        }
        None => request.path = full_path,
    }

    let mut content_length: usize = 0;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let idx = trimmed
            .find(':')
            .ok_or_else(|| HttpError::MalformedRequest(format!("header missing ':': {trimmed}")))?;
        let key = trimmed[..idx].trim().to_lowercase();
        let value = trimmed[idx + 1..].trim().to_string();
        if key == "content-length" {
            content_length = value
                .parse()
                .map_err(|_| HttpError::InvalidContentLength(value.clone()))?;
        }
        request.headers.insert(key, value);
    }

    if content_length > 0 {
        request.body.resize(content_length, 0);
        reader.read_exact(&mut request.body)?;
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    fn roundtrip(raw: &'static [u8]) -> HttpRequest {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = thread::spawn(move || {
            let mut client = TcpStream::connect(addr).unwrap();
            client.write_all(raw).unwrap();
        });
        let (server_stream, _) = listener.accept().unwrap();
        let request = parse_request(&server_stream).unwrap();
        writer.join().unwrap();
        request
    }

    #[test]
    fn parses_method_path_and_query() {
        let request = roundtrip(b"GET /users/7?active=1 HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/users/7");
        assert_eq!(request.query, "active=1");
    }

    #[test]
    fn folds_headers_to_lowercase_keys() {
        let request = roundtrip(b"GET / HTTP/1.1\r\nX-Request-Id: abc\r\n\r\n");
        assert_eq!(request.header("x-request-id"), Some("abc"));
        assert_eq!(request.header("X-REQUEST-ID"), Some("abc"));
    }

    #[test]
    fn reads_body_by_content_length() {
        let request = roundtrip(b"POST /items HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(request.body, b"hello");
    }

    #[test]
    fn missing_content_length_means_empty_body() {
        let request = roundtrip(b"GET / HTTP/1.1\r\n\r\n");
        assert!(request.body.is_empty());
    }
}
