//! Small string helpers used by the handshake and URL handling, grounded in
//! the original library's own trimming/prefix/URL-rewriting utilities.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::random;
use sha1::{Digest, Sha1};

pub(crate) const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

pub(crate) fn generate_websocket_key() -> String {
    let random_bytes: [u8; 16] = random();
    BASE64_STANDARD.encode(random_bytes)
}

/// Case-insensitive `needle` prefix check, used when matching header names
/// off the wire (`Sec-WebSocket-Accept:` vs `sec-websocket-accept:`, etc).
pub(crate) fn has_prefix_ci(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

/// Trims leading/trailing ASCII whitespace, matching HTTP header-value
/// trimming rules (RFC 7230 OWS).
pub(crate) fn trim_ows(s: &str) -> &str {
    s.trim_matches(|c: char| c == ' ' || c == '\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_value_matches_rfc_example() {
        // RFC 6455 section 1.3 worked example.
        let accept = generate_websocket_accept_value("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn prefix_check_is_case_insensitive() {
        assert!(has_prefix_ci("Sec-WebSocket-Accept: abc", "sec-websocket-accept:"));
        assert!(!has_prefix_ci("Sec-WebSocket-Key: abc", "sec-websocket-accept:"));
    }

}
