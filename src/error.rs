use httparse::Error as HttpParseError;
use pki_types::InvalidDnsNameError;
use std::io;
use url::ParseError;

use thiserror::Error;

/// Every fallible surface of the engine funnels into this enum. Variants are
/// grouped the way the component design groups them: caller-argument errors,
/// wire/protocol errors, resource errors, and transport/handshake errors.
#[derive(Error, Debug)]
pub enum WebSocketError {
    // -- caller-argument errors -------------------------------------------
    #[error("bad function argument: {0}")]
    BadFunctionArgument(&'static str),

    #[error("invalid send/stream options")]
    InvalidOptions,

    #[error("data frame sent out of stream continuity order")]
    StreamContinuityIssue,

    #[error("application payload exceeds the configured/protocol length limit")]
    AppDataLengthTooLong,

    #[error("invalid close reason code: {0}")]
    InvalidCloseReasonCode(i32),

    // -- resource errors ---------------------------------------------------
    #[error("memory pool exhausted")]
    OutOfMemory,

    // -- protocol / wire errors ---------------------------------------------
    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("reserved header bits must be zero")]
    ReservedBitsSet,

    #[error("frame length encoding is not minimal")]
    NonMinimalLength,

    #[error("64-bit payload length has the high bit set")]
    UnsupportedIntegerSize,

    #[error("control frame is fragmented or exceeds 125 bytes")]
    InvalidControlFrame,

    #[error("mask bit does not match the expected direction")]
    MaskDirection,

    #[error("invalid UTF-8 in a text message or close reason")]
    InvalidUtf8,

    // -- handshake / transport errors ---------------------------------------
    #[error("the server did not accept the websocket upgrade")]
    HandshakeRejected,

    #[error("Sec-WebSocket-Accept did not match the expected value")]
    InvalidAcceptKey,

    #[error("unexpected HTTP status line during handshake: {0}")]
    UnexpectedStatusLine(String),

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("{source}")]
    UrlParseError {
        #[from]
        source: ParseError,
    },

    #[error("websocket URL has no host")]
    UrlNoHost,

    #[error("unsupported URL scheme (expected ws:// or wss://)")]
    InvalidSchemeUrl,

    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    #[error("{source}")]
    IoError {
        #[from]
        source: io::Error,
    },

    // -- terminal / internal ------------------------------------------------
    #[error("the connection is already closed")]
    ClosedConnection,

    #[error("internal engine error: {0}")]
    InternalError(&'static str),
}

impl WebSocketError {
    /// Maps a structural/engine error onto the close code the connection
    /// should report, mirroring the taxonomy in the error handling design:
    /// protocol errors close with 1002, UTF-8 errors close with 1007,
    /// everything else that reaches the wire closes with 1011.
    pub fn as_close_code(&self) -> u16 {
        match self {
            WebSocketError::InvalidUtf8 => 1007,
            WebSocketError::InvalidOpcode(_)
            | WebSocketError::ReservedBitsSet
            | WebSocketError::NonMinimalLength
            | WebSocketError::UnsupportedIntegerSize
            | WebSocketError::InvalidControlFrame
            | WebSocketError::MaskDirection => 1002,
            _ => 1011,
        }
    }
}
