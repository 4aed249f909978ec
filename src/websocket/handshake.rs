use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::http::request::Request;

/// Fixed GUID appended to the client key (RFC 6455, section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
///
/// # Example
///
/// ```
/// # use junction::websocket::handshake::accept_key;
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Accept value for an upgrade request, or `None` when the key is missing or
/// is not a base64-encoded 16-byte nonce.
pub fn accept_for(request: &Request) -> Option<String> {
    let key = request.header("Sec-WebSocket-Key")?.trim();
    match STANDARD.decode(key) {
        Ok(nonce) if nonce.len() == 16 => Some(accept_key(key)),
        _ => None,
    }
}
