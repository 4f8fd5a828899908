//! Engine configuration (component 4.I / ambient §10).
//!
//! `WebSocketConfig` is plain data — it carries no TLS/transport state, since
//! the sans-IO core never opens a socket. The transport adapter (`connect`)
//! holds its own connection-level settings (the target URL, TLS roots)
//! separately and only borrows this struct for the handshake headers and
//! engine limits.

use crate::error::WebSocketError;

/// Header names the handshake request must own exclusively — letting a
/// caller override them through `extra_headers` would let a misconfigured
/// client send a broken or contradictory upgrade request.
const DISALLOWED_HEADERS: &[&str] = &["connection", "upgrade", "expect", "transfer-encoding"];
const DISALLOWED_PREFIX: &str = "sec-websocket-";

/// How the default fragment reassembler hands data messages to the
/// application: glued back into one buffer, or left as individual
/// fragments via `on_fragment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentMode {
    Reassemble,
    Raw,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Largest application payload (reassembled message, or a single block
    /// send) the engine will accept before failing with
    /// `AppDataLengthTooLong`. Small by design — callers that need more
    /// raise it explicitly rather than the engine assuming they do.
    pub max_payload_size: usize,

    /// How many HTTP redirects the handshake will follow before giving up.
    /// `0` disables redirect following entirely.
    pub max_redirects: u8,

    /// Emit `log::debug!`/`log::trace!` diagnostics for every state
    /// transition (close bitset changes, queue drains, fragment bounds).
    pub verbose: bool,

    /// Send `Expect: 101` with the handshake request, for proxies that
    /// hold the request until they see it.
    pub expect: bool,

    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in preference order.
    pub websocket_protocols: Vec<String>,

    /// Extra headers to send on the handshake request, checked against
    /// `DISALLOWED_HEADERS`/`DISALLOWED_PREFIX` by `validate_extra_headers`
    /// before a `Session`/connection is ever built.
    pub extra_headers: Vec<(String, String)>,

    /// Whether the default reassembler runs the same incremental UTF-8
    /// validator over a reassembled text message that the block-send path
    /// runs before sending one. Defaults to `true`: symmetric validation is
    /// the safer default, even though leaving it off shaves a streaming
    /// pass over large, known-good payloads.
    pub validate_reassembled_text: bool,

    /// Answer an inbound PING with a PONG automatically, without involving
    /// `WebSocketHandler::on_ping`.
    pub auto_pong: bool,

    /// Answer an inbound CLOSE by queuing an echoing CLOSE automatically,
    /// without waiting for the application to call `close()`.
    pub auto_close: bool,

    /// How data messages reach the application.
    pub fragment_mode: FragmentMode,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_payload_size: 1024,
            max_redirects: 5,
            verbose: false,
            expect: false,
            websocket_protocols: Vec::new(),
            extra_headers: Vec::new(),
            validate_reassembled_text: true,
            auto_pong: true,
            auto_close: true,
            fragment_mode: FragmentMode::Reassemble,
        }
    }
}

/// Rejects any header in `extra_headers` that the handshake request must
/// control itself (`Connection`, `Upgrade`, `Expect`, `Transfer-Encoding`,
/// or anything in the `Sec-WebSocket-*` family).
pub fn validate_extra_headers(headers: &[(String, String)]) -> Result<(), WebSocketError> {
    for (name, _) in headers {
        let lower = name.to_ascii_lowercase();
        if DISALLOWED_HEADERS.contains(&lower.as_str()) || lower.starts_with(DISALLOWED_PREFIX) {
            return Err(WebSocketError::InvalidOptions);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_values() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_payload_size, 1024);
        assert!(config.validate_reassembled_text);
        assert!(config.auto_pong);
    }

    #[test]
    fn rejects_reserved_handshake_headers() {
        let err = validate_extra_headers(&[("Connection".into(), "keep-alive".into())]).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidOptions));
        let err = validate_extra_headers(&[("Sec-WebSocket-Key".into(), "x".into())]).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidOptions));
    }

    #[test]
    fn allows_ordinary_headers() {
        assert!(validate_extra_headers(&[("Authorization".into(), "Bearer xyz".into())]).is_ok());
    }
}
