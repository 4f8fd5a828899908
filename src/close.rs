//! Close handshake orchestration (component 4.H): the close-state bitset,
//! close-code validity tables, and close-frame body normalization.

use crate::error::WebSocketError;

/// Tracks progress through the close handshake. The connection is fully
/// closed only once both `SENT` and `RECEIVED` are set; `QUEUED` exists so
/// a close already waiting in the send queue isn't queued a second time.
/// A plain bitset rather than a dependency: four flags don't earn one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloseState(u8);

impl CloseState {
    pub const RECEIVED: CloseState = CloseState(0b0001);
    pub const QUEUED: CloseState = CloseState(0b0010);
    pub const SENT: CloseState = CloseState(0b0100);
    pub const CLOSED: CloseState = CloseState(0b1000);

    pub fn empty() -> Self {
        CloseState(0)
    }

    pub fn contains(&self, flag: CloseState) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn insert(&mut self, flag: CloseState) {
        self.0 |= flag.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_terminal(&self) -> bool {
        self.contains(CloseState::SENT) && self.contains(CloseState::RECEIVED)
    }
}

impl std::ops::BitOrAssign for CloseState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Status codes the client will accept from the server in a received CLOSE
/// frame, per the protocol's own literal enumeration (not every code a
/// server could plausibly send is considered valid here — notably 1011 is
/// accepted from a server but never offered when the client itself closes).
pub fn is_valid_from_server(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// Status codes the client itself is allowed to close with.
pub fn is_valid_to_send(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1010 | 3000..=4999)
}

/// Builds the close-frame payload (2-byte code + optional UTF-8 reason),
/// rejecting codes the client isn't allowed to originate and reasons that
/// would push the frame over the control-payload limit.
pub fn normalize_close_body(code: u16, reason: &str) -> Result<Vec<u8>, WebSocketError> {
    if !is_valid_to_send(code) {
        return Err(WebSocketError::InvalidCloseReasonCode(code as i32));
    }
    normalize_close_body_unchecked(code, reason)
}

/// Builds a close-frame payload for the engine's own closes (abnormal
/// closure / internal error) rather than an application-requested one.
/// These originate from `WebSocketError::as_close_code`, not from caller
/// input, so the code is taken as given instead of run through
/// `is_valid_to_send` — notably 1011 must still reach the wire here even
/// though a caller-originated close is never allowed to send it.
pub fn normalize_close_body_engine(code: u16, reason: &str) -> Result<Vec<u8>, WebSocketError> {
    normalize_close_body_unchecked(code, reason)
}

fn normalize_close_body_unchecked(code: u16, reason: &str) -> Result<Vec<u8>, WebSocketError> {
    crate::utf8::validate_complete(reason.as_bytes())?;

    let mut body = Vec::with_capacity(2 + reason.len());
    body.extend_from_slice(&code.to_be_bytes());
    body.extend_from_slice(reason.as_bytes());

    if body.len() > crate::frame::CONTROL_PAYLOAD_MAX {
        return Err(WebSocketError::AppDataLengthTooLong);
    }

    Ok(body)
}

/// Why a received close frame is itself malformed, paired with the
/// protocol-error response the engine auto-queues once the application has
/// been told about it via `on_close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseProtocolError {
    InvalidPayloadLength,
    InvalidCode,
    InvalidUtf8,
}

impl CloseProtocolError {
    pub fn response(&self) -> (u16, &'static str) {
        match self {
            CloseProtocolError::InvalidPayloadLength => (1002, "invalid close payload length"),
            CloseProtocolError::InvalidCode => (1002, "invalid close reason"),
            CloseProtocolError::InvalidUtf8 => (1007, "invalid close reason"),
        }
    }
}

/// A received close-frame body, parsed as far as possible even when it
/// turns out to be malformed — `on_close` still fires with whatever code
/// could be recovered before the engine reacts to `protocol_error`.
pub struct ParsedClose {
    pub code: Option<u16>,
    pub reason: String,
    pub protocol_error: Option<CloseProtocolError>,
}

/// Parses a received close-frame payload into its code (if any) and reason.
/// An empty payload is valid (RFC 6455 7.1.5: "no status code present").
/// Never fails outright: a malformed body still yields a `ParsedClose` so
/// the caller can report it via `on_close` before reacting to
/// `protocol_error`.
pub fn parse_close_body(payload: &[u8]) -> ParsedClose {
    if payload.is_empty() {
        return ParsedClose { code: None, reason: String::new(), protocol_error: None };
    }
    if payload.len() < 2 {
        return ParsedClose {
            code: None,
            reason: String::new(),
            protocol_error: Some(CloseProtocolError::InvalidPayloadLength),
        };
    }

    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if !is_valid_from_server(code) {
        return ParsedClose {
            code: Some(code),
            reason: String::new(),
            protocol_error: Some(CloseProtocolError::InvalidCode),
        };
    }

    match String::from_utf8(payload[2..].to_vec()) {
        Ok(reason) => ParsedClose { code: Some(code), reason, protocol_error: None },
        Err(_) => ParsedClose {
            code: Some(code),
            reason: String::new(),
            protocol_error: Some(CloseProtocolError::InvalidUtf8),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_requires_both_sent_and_received() {
        let mut state = CloseState::empty();
        assert!(!state.is_terminal());
        state |= CloseState::SENT;
        assert!(!state.is_terminal());
        state |= CloseState::RECEIVED;
        assert!(state.is_terminal());
    }

    #[test]
    fn both_directions_accept_1010() {
        assert!(is_valid_from_server(1010));
        assert!(is_valid_to_send(1010));
    }

    #[test]
    fn from_server_accepts_1011_to_send_does_not() {
        assert!(is_valid_from_server(1011));
        assert!(!is_valid_to_send(1011));
    }

    #[test]
    fn rejects_reserved_and_unassigned_codes() {
        assert!(!is_valid_to_send(1004));
        assert!(!is_valid_to_send(1005));
        assert!(!is_valid_to_send(2999));
    }

    #[test]
    fn normalizes_code_and_reason_into_one_payload() {
        let body = normalize_close_body(1000, "bye").unwrap();
        assert_eq!(&body[..2], &1000u16.to_be_bytes());
        assert_eq!(&body[2..], b"bye");
    }

    #[test]
    fn empty_close_payload_parses_as_no_code() {
        let parsed = parse_close_body(&[]);
        assert_eq!(parsed.code, None);
        assert_eq!(parsed.reason, "");
        assert!(parsed.protocol_error.is_none());
    }

    #[test]
    fn parses_code_and_reason_from_server() {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"done");
        let parsed = parse_close_body(&payload);
        assert_eq!(parsed.code, Some(1000));
        assert_eq!(parsed.reason, "done");
        assert!(parsed.protocol_error.is_none());
    }

    #[test]
    fn invalid_close_code_still_yields_the_code_for_on_close() {
        let payload = 1004u16.to_be_bytes().to_vec();
        let parsed = parse_close_body(&payload);
        assert_eq!(parsed.code, Some(1004));
        assert_eq!(parsed.protocol_error, Some(CloseProtocolError::InvalidCode));
        assert_eq!(parsed.protocol_error.unwrap().response(), (1002, "invalid close reason"));
    }

    #[test]
    fn single_byte_payload_is_invalid_length_not_a_panic() {
        let parsed = parse_close_body(&[0x03]);
        assert_eq!(parsed.code, None);
        assert_eq!(parsed.protocol_error, Some(CloseProtocolError::InvalidPayloadLength));
    }
}
