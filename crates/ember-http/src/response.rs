//! Response assembly: status line, auto-computed `Content-Length`, headers,
//! body (spec §4.7 step 5, §6 wire format).

/// A response under construction by a route handler.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs, in insertion order. `Content-Length` is
    /// added automatically at serialization time and must not be set here.
    pub headers: Vec<(String, String)>,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A `200 OK` response with an empty body.
    pub fn ok() -> Self {
        Self { status: 200, headers: Vec::new(), body: Vec::new() }
    }

    /// A response with the given status and no body.
    pub fn with_status(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Vec::new() }
    }

    /// A `text/plain` response body.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut response = Self::with_status(status);
        response.body = body.into().into_bytes();
        response.headers.push(("Content-Type".to_string(), "text/plain; charset=utf-8".to_string()));
        response
    }

    /// An `application/json` response body (caller supplies already-encoded
    /// JSON text).
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        let mut response = Self::with_status(status);
        response.body = body.into().into_bytes();
        response.headers.push(("Content-Type".to_string(), "application/json".to_string()));
        response
    }

    /// An `application/octet-stream` response body.
    pub fn bytes(status: u16, body: Vec<u8>) -> Self {
        let mut response = Self::with_status(status);
        response.body = body;
        response.headers.push(("Content-Type".to_string(), "application/octet-stream".to_string()));
        response
    }

    /// Append a header. Last write for a given name wins at the wire level,
    /// same as PHP's `header()`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serialize to the bytes written back to the client: status line,
    /// headers (with `Content-Length` inserted), a blank line, then body.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, status_text(self.status)).as_bytes());
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"Connection: close\r\n\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Canonical reason phrase for a status code, `"Unknown"` for anything not
/// named here.
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_status_line_and_content_length() {
        let response = HttpResponse::text(200, "hi");
        let bytes = response.serialize();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn unknown_status_gets_unknown_reason_phrase() {
        assert_eq!(status_text(799), "Unknown");
    }

    #[test]
    fn custom_headers_are_preserved_in_order() {
        let response = HttpResponse::ok().with_header("X-A", "1").with_header("X-B", "2");
        let text = String::from_utf8(response.serialize()).unwrap();
        let a_pos = text.find("X-A").unwrap();
        let b_pos = text.find("X-B").unwrap();
        assert!(a_pos < b_pos);
    }
}
