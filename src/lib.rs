//! A sans-IO client-side WebSocket (RFC 6455) protocol engine.
//!
//! The engine in [`session`] owns no socket and performs no I/O of its own:
//! it is handed inbound bytes and handshake response headers, and it hands
//! back outbound bytes for a transport to write. [`connect`] is the
//! optional batteries-included tokio transport that drives the engine over
//! a real `TcpStream`/TLS stream, the same way this codebase's original
//! async client drove its own frame reader/writer over a socket.
//!
//! Start with [`connect::connect_async`] for the common case, or build a
//! [`session::Session`] directly to drive the protocol engine over your own
//! transport.

pub mod close;
pub mod config;
pub mod connect;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod pool;
pub mod reassemble;
pub mod receive;
pub mod send;
pub mod session;
pub mod utf8;
mod utils;

pub use config::WebSocketConfig;
pub use error::WebSocketError;
pub use session::{CloseIntent, HandlerResult, Outbound, Session, WebSocketHandler};
