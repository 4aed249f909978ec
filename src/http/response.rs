use std::collections::HashMap;

use bytes::Bytes;

use crate::dispatch::Context;

/// Standard reason phrase for a numeric status, empty when unknown.
///
/// # Example
///
/// ```
/// # use junction::http::response::reason_phrase;
/// assert_eq!(reason_phrase(200), "OK");
/// assert_eq!(reason_phrase(404), "Not Found");
/// ```
pub fn reason_phrase(status: u16) -> &'static str {
    ::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// A complete HTTP/1 response ready to be serialized.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(200)
///     .header("Content-Type", "application/json")
///     .body("{}")
///     .build();
/// ```
pub struct ResponseBuilder {
    status: u16,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header from the body size unless one is present,
    /// except for 1xx and 204 responses, which carry no body.
    pub fn build(mut self) -> Response {
        let bodiless = self.status < 200 || self.status == 204;
        let has_length = self
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("Content-Length"));
        if !bodiless && !has_length {
            self.headers
                .insert("Content-Length".to_string(), self.body.len().to_string());
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Response built from the status, headers and body a request left on
    /// its context.
    pub fn from_context(ctx: &Context, keep_alive: bool) -> Self {
        ResponseBuilder::new(ctx.status)
            .headers(&ctx.response_headers)
            .header("Connection", if keep_alive { "keep-alive" } else { "close" })
            .body(ctx.response_body.to_bytes())
            .build()
    }

    pub fn bad_request() -> Self {
        ResponseBuilder::new(400)
            .header("Connection", "close")
            .body("400 Bad Request")
            .build()
    }

    pub fn service_unavailable() -> Self {
        ResponseBuilder::new(503)
            .header("Connection", "close")
            .body("503 Service Unavailable")
            .build()
    }

    /// `101 Switching Protocols` completing a WebSocket handshake.
    pub fn switching_protocols(accept: &str) -> Self {
        ResponseBuilder::new(101)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Accept", accept)
            .build()
    }
}
