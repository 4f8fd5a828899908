//! Ties the sans-IO pieces together into one `Session`: receive engine,
//! send queue, memory pool, and close orchestration, driven entirely by
//! `receive`/`pull_outbound` calls from a transport (component 4.I).
//!
//! Handler callbacks never see a full `&mut Session` — only the disjoint
//! `Outbound` view onto the parts they're allowed to touch. That isn't a
//! convenience; it's what makes the old "don't destroy the session while
//! a callback is still running" hazard impossible to hit by construction:
//! nothing a callback holds can reach `Session::destroy`, so there is no
//! depth counter or pending-destroy flag to get wrong (see `destroy` below
//! and the Open Question resolution in DESIGN.md).

use crate::close::{self, CloseState};
use crate::config::{FragmentMode, WebSocketConfig};
use crate::error::WebSocketError;
use crate::frame::OpCode;
use crate::pool::Pool;
use crate::reassemble::{ReassembledMessage, Reassembler};
use crate::receive::{ReceiveEngine, ReceiveEvent};
use crate::send::{Priority, SendQueue};
use crate::utf8::Utf8Validator;
use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// What a handler wants to happen to the connection after it returns an
/// error from a callback. Mirrors the close-on-non-zero-return behavior,
/// but as a typed value instead of an overloaded integer: `None` asks for
/// the default abnormal-closure code, `Some` requests a specific one.
#[derive(Debug, Clone)]
pub struct CloseIntent {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseIntent {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        CloseIntent { code: Some(code), reason: reason.into() }
    }
}

impl Default for CloseIntent {
    fn default() -> Self {
        CloseIntent { code: None, reason: String::new() }
    }
}

pub type HandlerResult = Result<(), CloseIntent>;

/// Callbacks the application implements to react to inbound traffic.
/// Every method has a default no-op body except none are required, since
/// most applications only care about a handful of these.
pub trait WebSocketHandler {
    fn on_connect(&mut self, _outbound: &mut Outbound) -> HandlerResult {
        Ok(())
    }

    fn on_text(&mut self, _text: &str, _outbound: &mut Outbound) -> HandlerResult {
        Ok(())
    }

    fn on_binary(&mut self, _data: &[u8], _outbound: &mut Outbound) -> HandlerResult {
        Ok(())
    }

    /// Fires only when `FragmentMode::Raw` is configured, once per
    /// fragment rather than once per reassembled message.
    fn on_fragment(&mut self, _is_text: bool, _data: &[u8], _is_final: bool, _outbound: &mut Outbound) -> HandlerResult {
        Ok(())
    }

    fn on_ping(&mut self, _payload: &[u8], _outbound: &mut Outbound) -> HandlerResult {
        Ok(())
    }

    fn on_pong(&mut self, _payload: &[u8], _outbound: &mut Outbound) -> HandlerResult {
        Ok(())
    }

    fn on_close(&mut self, _code: Option<u16>, _reason: &str, _outbound: &mut Outbound) -> HandlerResult {
        Ok(())
    }
}

/// Tracks the FIRST/LAST continuity of an application-driven stream send,
/// independent of whatever the receive side is doing with inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboundStream {
    None,
    Text,
    Binary,
}

/// The only handle to engine state a handler callback ever receives.
/// Borrows exactly the parts of `Session` a callback is allowed to
/// mutate — never the `ReceiveEngine` or `Reassembler` driving the call.
pub struct Outbound<'a> {
    send_queue: &'a mut SendQueue,
    pool: &'a mut Pool,
    close_state: &'a mut CloseState,
    config: &'a WebSocketConfig,
    rng: &'a mut StdRng,
    outbound_stream: &'a mut OutboundStream,
}

impl<'a> Outbound<'a> {
    fn mask_key(&mut self) -> [u8; 4] {
        self.rng.random()
    }

    pub fn send_text(&mut self, text: &str) -> Result<(), WebSocketError> {
        crate::utf8::validate_complete(text.as_bytes())?;
        let max = self.config.max_payload_size;
        let close_state = *self.close_state;
        self.send_queue.send_fragmented(self.pool, close_state, OpCode::Text, text.as_bytes(), max, || self.rng.random())
    }

    pub fn send_binary(&mut self, data: &[u8]) -> Result<(), WebSocketError> {
        let max = self.config.max_payload_size;
        let close_state = *self.close_state;
        self.send_queue.send_fragmented(self.pool, close_state, OpCode::Binary, data, max, || self.rng.random())
    }

    /// Stream-based send: the caller declares FIRST/LAST explicitly instead
    /// of handing over one block to be chunked automatically. Enforces the
    /// same continuity rule the receive side enforces on inbound frames:
    /// FIRST only starts a stream when none is active, non-FIRST only
    /// continues one that is.
    pub fn send_stream_text(&mut self, first: bool, last: bool, text: &str) -> Result<(), WebSocketError> {
        self.send_stream(first, last, true, text.as_bytes())
    }

    pub fn send_stream_binary(&mut self, first: bool, last: bool, data: &[u8]) -> Result<(), WebSocketError> {
        self.send_stream(first, last, false, data)
    }

    fn send_stream(&mut self, first: bool, last: bool, is_text: bool, payload: &[u8]) -> Result<(), WebSocketError> {
        if payload.len() > self.config.max_payload_size {
            return Err(WebSocketError::AppDataLengthTooLong);
        }

        let opcode = match (*self.outbound_stream, first) {
            (OutboundStream::None, true) => {
                if is_text {
                    OpCode::Text
                } else {
                    OpCode::Binary
                }
            }
            (OutboundStream::None, false) => return Err(WebSocketError::StreamContinuityIssue),
            (_, true) => return Err(WebSocketError::StreamContinuityIssue),
            (_, false) => OpCode::Continuation,
        };

        if is_text {
            // Each call validates only what it was handed: a multi-byte
            // character split across two `send_stream_text` calls will be
            // rejected here, per the documented contract — pre-validate
            // the whole message yourself if you can't guarantee chunk
            // boundaries land on character boundaries.
            Utf8Validator::new().feed(payload, last)?;
        }

        let key = self.mask_key();
        self.send_queue.send_data(self.pool, *self.close_state, last, opcode, payload, key)?;

        *self.outbound_stream = if last {
            OutboundStream::None
        } else if is_text {
            OutboundStream::Text
        } else {
            OutboundStream::Binary
        };
        Ok(())
    }

    pub fn ping(&mut self, payload: &[u8]) -> Result<(), WebSocketError> {
        let key = self.mask_key();
        self.send_queue
            .send_control(self.pool, *self.close_state, OpCode::Ping, payload, key, Priority::Normal)
    }

    /// Pongs jump the queue ahead of whatever data send is already in
    /// flight, so a peer's liveness check is never stuck behind a large
    /// fragmented message.
    pub fn pong(&mut self, payload: &[u8]) -> Result<(), WebSocketError> {
        let key = self.mask_key();
        self.send_queue
            .send_control(self.pool, *self.close_state, OpCode::Pong, payload, key, Priority::Urgent)
    }

    /// Queues a close frame. `urgent` jumps it ahead of whatever's already
    /// queued, matching the original's negative-code-means-urgent
    /// convention — expressed here as an explicit flag instead of
    /// overloading the sign of the code.
    pub fn close(&mut self, code: u16, reason: &str, urgent: bool) -> Result<(), WebSocketError> {
        let body = close::normalize_close_body(code, reason)?;
        self.enqueue_close(code, reason, &body, urgent)
    }

    /// Queues a close frame for a close the engine itself decided on
    /// (inbound protocol error, handler-rejected message, internal error),
    /// as opposed to one an application requested via [`Self::close`].
    /// Codes like 1011 are legitimate here even though `close` itself would
    /// reject them, since `is_valid_to_send` only bounds what a caller may
    /// originate.
    pub(crate) fn close_engine(&mut self, code: u16, reason: &str, urgent: bool) -> Result<(), WebSocketError> {
        let body = close::normalize_close_body_engine(code, reason)?;
        self.enqueue_close(code, reason, &body, urgent)
    }

    fn enqueue_close(&mut self, code: u16, reason: &str, body: &[u8], urgent: bool) -> Result<(), WebSocketError> {
        let priority = if urgent { Priority::Urgent } else { Priority::Normal };
        let key = self.mask_key();
        self.send_queue
            .send_control(self.pool, *self.close_state, OpCode::Close, body, key, priority)?;
        self.close_state.insert(CloseState::QUEUED);
        debug!("close({code}, {reason:?}) queued, urgent={urgent}");
        Ok(())
    }
}

/// What the transport should do after a `pull_outbound` call, mirroring
/// the `(buf, maxlen) -> n_written | PAUSE | EOF` transport contract of
/// §6: a transport loop matches on this instead of re-deriving pause/EOF
/// from a sentinel return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// `n` bytes were written into the caller's buffer.
    Data(usize),
    /// Nothing queued right now; the transport should wait to be unpaused
    /// (a subsequent send/ping/pong/close call) rather than busy-poll.
    Paused,
    /// Both sides have sent a close frame (or the close handshake
    /// otherwise reached its terminal state): no further bytes will ever
    /// be produced, the transport should shut down its write half.
    Eof,
}

pub struct Session {
    receive: ReceiveEngine,
    reassembler: Reassembler,
    send_queue: SendQueue,
    pool: Pool,
    close_state: CloseState,
    config: WebSocketConfig,
    rng: StdRng,
    outbound_stream: OutboundStream,
}

impl Session {
    pub fn new(config: WebSocketConfig) -> Self {
        let max_payload = config.max_payload_size;
        Session {
            receive: ReceiveEngine::new(max_payload),
            reassembler: Reassembler::new(),
            send_queue: SendQueue::new(),
            pool: Pool::new(
                crate::frame::CONTROL_FRAME_MAX,
                16,
                max_payload + crate::frame::FRAME_HEADER_MAX,
                16,
            ),
            close_state: CloseState::empty(),
            config,
            rng: StdRng::seed_from_u64(rand::rng().random()),
            outbound_stream: OutboundStream::None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close_state.is_terminal()
    }

    fn outbound(&mut self) -> Outbound<'_> {
        Outbound {
            send_queue: &mut self.send_queue,
            pool: &mut self.pool,
            close_state: &mut self.close_state,
            config: &self.config,
            rng: &mut self.rng,
            outbound_stream: &mut self.outbound_stream,
        }
    }

    /// Feeds inbound bytes through the receive engine, dispatching
    /// handler callbacks for each resulting event. Returns how many bytes
    /// were consumed, matching `ReceiveEngine::push`'s contract.
    pub fn receive<H: WebSocketHandler>(&mut self, input: &[u8], handler: &mut H) -> Result<usize, WebSocketError> {
        if self.close_state.is_terminal() {
            return Err(WebSocketError::ClosedConnection);
        }

        let mut events = Vec::new();
        let consumed = match self.receive.push(input, &mut self.close_state, &mut events) {
            Ok(n) => n,
            Err(err) => {
                warn!("inbound protocol error, closing: {err}");
                let code = err.as_close_code();
                let mut outbound = self.outbound();
                if let Err(close_err) = outbound.close_engine(code, "", true) {
                    warn!("failed to queue engine close({code}): {close_err}");
                }
                return Err(err);
            }
        };
        trace!("receive consumed {consumed} bytes, {} events", events.len());

        for event in events {
            let intent = self.dispatch(event, handler)?;
            if let Some(intent) = intent {
                let mut outbound = self.outbound();
                let code = intent.code.unwrap_or(1011);
                if let Err(close_err) = outbound.close_engine(code, &intent.reason, true) {
                    warn!("failed to queue engine close({code}): {close_err}");
                }
            }
        }

        if self.config.auto_close
            && self.close_state.contains(CloseState::RECEIVED)
            && !self.close_state.contains(CloseState::QUEUED)
        {
            debug!("auto-closing in response to a received close frame");
            let mut outbound = self.outbound();
            let _ = outbound.close(1000, "", false);
        }

        Ok(consumed)
    }

    fn dispatch<H: WebSocketHandler>(
        &mut self,
        event: ReceiveEvent,
        handler: &mut H,
    ) -> Result<Option<CloseIntent>, WebSocketError> {
        match event {
            ReceiveEvent::Ping(payload) => {
                if self.config.auto_pong {
                    let mut outbound = self.outbound();
                    let _ = outbound.pong(&payload);
                }
                let mut outbound = self.outbound();
                Ok(handler.on_ping(&payload, &mut outbound).err())
            }
            ReceiveEvent::Pong(payload) => {
                let mut outbound = self.outbound();
                Ok(handler.on_pong(&payload, &mut outbound).err())
            }
            ReceiveEvent::Close { code, reason, protocol_error } => {
                debug!("received close code={code:?} reason={reason:?}");
                let mut outbound = self.outbound();
                let handler_intent = handler.on_close(code, &reason, &mut outbound).err();
                if let Some(protocol_error) = protocol_error {
                    let (resp_code, resp_reason) = protocol_error.response();
                    warn!("malformed close frame from server, responding with {resp_code}");
                    return Ok(Some(CloseIntent { code: Some(resp_code), reason: resp_reason.to_string() }));
                }
                Ok(handler_intent)
            }
            ReceiveEvent::DataChunk { is_text, data, is_final } => match self.config.fragment_mode {
                FragmentMode::Raw => {
                    let mut outbound = self.outbound();
                    Ok(handler.on_fragment(is_text, &data, is_final, &mut outbound).err())
                }
                FragmentMode::Reassemble => {
                    let message = self.reassembler.push_chunk(
                        is_text,
                        &data,
                        is_final,
                        self.config.validate_reassembled_text,
                    )?;
                    match message {
                        None => Ok(None),
                        Some(ReassembledMessage::Text(text)) => {
                            let mut outbound = self.outbound();
                            Ok(handler.on_text(&text, &mut outbound).err())
                        }
                        Some(ReassembledMessage::Binary(data)) => {
                            let mut outbound = self.outbound();
                            Ok(handler.on_binary(&data, &mut outbound).err())
                        }
                    }
                }
            },
        }
    }

    /// Drains as many outbound bytes as fit in `out`, spanning multiple
    /// frames or stopping partway through one as needed (component 4.F's
    /// drain contract). The transport should keep calling this — after
    /// writing whatever it returns — until it sees `Paused` or `Eof`.
    pub fn pull_outbound(&mut self, out: &mut [u8]) -> PullOutcome {
        if self.close_state.is_terminal() {
            return PullOutcome::Eof;
        }

        let outcome = self.send_queue.drain(&mut self.pool, out);
        if outcome.close_sent {
            self.close_state.insert(CloseState::SENT);
            debug!("close frame fully drained, CLOSE_SENT set");
            if self.close_state.is_terminal() {
                self.close_state.insert(CloseState::CLOSED);
                debug!("both sides closed, connection terminal");
            }
        }

        if outcome.written > 0 {
            PullOutcome::Data(outcome.written)
        } else if self.close_state.is_terminal() {
            PullOutcome::Eof
        } else {
            PullOutcome::Paused
        }
    }

    pub fn close_now(&mut self, code: u16, reason: &str, urgent: bool) -> Result<(), WebSocketError> {
        self.outbound().close(code, reason, urgent)
    }

    pub fn send_text(&mut self, text: &str) -> Result<(), WebSocketError> {
        self.outbound().send_text(text)
    }

    pub fn send_binary(&mut self, data: &[u8]) -> Result<(), WebSocketError> {
        self.outbound().send_binary(data)
    }

    pub fn send_stream_text(&mut self, first: bool, last: bool, text: &str) -> Result<(), WebSocketError> {
        self.outbound().send_stream_text(first, last, text)
    }

    pub fn send_stream_binary(&mut self, first: bool, last: bool, data: &[u8]) -> Result<(), WebSocketError> {
        self.outbound().send_stream_binary(first, last, data)
    }

    pub fn ping(&mut self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.outbound().ping(payload)
    }

    pub fn pong(&mut self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.outbound().pong(payload)
    }

    /// Consumes and drops the session. There is no reentrancy hazard to
    /// guard against here (see the module doc comment): a handler callback
    /// only ever holds `&mut Outbound`, which cannot reach `Session`
    /// itself, so `destroy` can never be called while a dispatch for this
    /// same session is still on the stack.
    pub fn destroy(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHandler {
        texts: Vec<String>,
    }

    impl WebSocketHandler for RecordingHandler {
        fn on_text(&mut self, text: &str, _outbound: &mut Outbound) -> HandlerResult {
            self.texts.push(text.to_string());
            Ok(())
        }
    }

    fn wire_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + payload.len());
        out.push((if fin { 0x80 } else { 0 }) | opcode.as_u8());
        let len = payload.len();
        if len <= 125 {
            out.push(len as u8);
        } else if len <= 65535 {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    fn wire_text_frame(payload: &[u8]) -> Vec<u8> {
        wire_frame(true, OpCode::Text, payload)
    }

    #[test]
    fn receiving_a_text_frame_invokes_on_text() {
        let mut session = Session::new(WebSocketConfig::default());
        let mut handler = RecordingHandler { texts: Vec::new() };
        let wire = wire_text_frame(b"hello");
        session.receive(&wire, &mut handler).unwrap();
        assert_eq!(handler.texts, vec!["hello".to_string()]);
    }

    #[test]
    fn queued_outbound_text_round_trips_through_pull() {
        let mut session = Session::new(WebSocketConfig::default());
        session.send_text("hi").unwrap();
        let mut out = [0u8; 64];
        match session.pull_outbound(&mut out) {
            PullOutcome::Data(n) => assert!(n > 2),
            other => panic!("expected data, got {other:?}"),
        }
        assert_eq!(session.pull_outbound(&mut out), PullOutcome::Paused);
    }

    #[test]
    fn auto_pong_queues_a_response_without_handler_involvement() {
        let mut session = Session::new(WebSocketConfig::default());
        struct Quiet;
        impl WebSocketHandler for Quiet {}
        let mut handler = Quiet;

        let out = wire_frame(true, OpCode::Ping, &[]);

        session.receive(&out, &mut handler).unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(session.pull_outbound(&mut buf), PullOutcome::Data(_)));
    }

    #[test]
    fn interleaved_ping_does_not_disturb_fragmented_text_reassembly() {
        let mut session = Session::new(WebSocketConfig::default());
        let mut handler = RecordingHandler { texts: Vec::new() };

        let frame1 = wire_frame(false, OpCode::Text, b"hel");
        let ping = wire_frame(true, OpCode::Ping, b"ping");
        let frame2 = wire_frame(true, OpCode::Continuation, b"lo");

        // Feed byte-by-byte to exercise the header/payload accumulation
        // paths, not just whole-frame pushes.
        for byte in frame1.iter().chain(ping.iter()).chain(frame2.iter()) {
            session.receive(std::slice::from_ref(byte), &mut handler).unwrap();
        }

        assert_eq!(handler.texts, vec!["hello".to_string()]);

        // The auto-pong for the interleaved PING should be queued, echoing
        // the same payload.
        let mut out = [0u8; 64];
        let outcome = session.pull_outbound(&mut out);
        assert!(matches!(outcome, PullOutcome::Data(_)));
    }

    #[test]
    fn stream_send_enforces_first_last_continuity() {
        let mut session = Session::new(WebSocketConfig::default());
        assert!(session.send_stream_text(false, false, "oops").is_err());
        session.send_stream_text(true, false, "hel").unwrap();
        // A second FIRST while a stream is active is a continuity error.
        assert!(session.send_stream_text(true, false, "lo").is_err());
        session.send_stream_text(false, true, "lo").unwrap();
        // The stream is closed now; FIRST is required again.
        assert!(session.send_stream_text(false, true, "x").is_err());
    }

    #[test]
    fn close_then_send_is_rejected() {
        let mut session = Session::new(WebSocketConfig::default());
        session.close_now(1000, "bye", false).unwrap();
        let err = session.send_text("too late").unwrap_err();
        assert!(matches!(err, WebSocketError::ClosedConnection));
    }

    #[test]
    fn pull_outbound_reports_eof_once_both_sides_have_closed() {
        let mut session = Session::new(WebSocketConfig::default());
        session.close_now(1000, "bye", false).unwrap();

        let mut out = [0u8; 64];
        // Drains the close frame itself and sets CLOSE_SENT.
        assert!(matches!(session.pull_outbound(&mut out), PullOutcome::Data(_)));

        struct Quiet;
        impl WebSocketHandler for Quiet {}
        let mut body = 1000u16.to_be_bytes().to_vec();
        body.extend_from_slice(b"bye");
        let wire = wire_frame(true, OpCode::Close, &body);
        session.receive(&wire, &mut Quiet).unwrap();

        assert!(session.is_closed());
        assert_eq!(session.pull_outbound(&mut out), PullOutcome::Eof);
    }
}
