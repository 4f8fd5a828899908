//! Inbound frame processing (component 4.E): a 3-phase state machine that
//! consumes bytes as they arrive rather than requiring a whole frame to be
//! buffered up front — header accumulation, then either control-payload
//! accumulation (bounded, buffered) or data-payload streaming (handed to
//! the caller as it arrives).

use crate::close::{self, CloseProtocolError, CloseState};
use crate::error::WebSocketError;
use crate::frame::{self, Direction, FrameHeader, OpCode};
use crate::utf8::Utf8Validator;

/// Bits tracking what kind of data message is currently being streamed,
/// so a CONTINUATION frame's payload is attributed to the right message
/// type and interior UTF-8 validation state survives across fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    None,
    Text,
    Binary,
}

enum Phase {
    Header { buf: Vec<u8> },
    ControlPayload { header: FrameHeader, buf: Vec<u8> },
    DataPayload { header: FrameHeader, remaining: u64 },
}

/// One event the receive engine reports back to its driver per call to
/// `push`. Multiple events can result from a single `push` if enough bytes
/// arrived to finish more than one frame — the driver should keep calling
/// `push`/`poll_event` until it gets `None` back.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveEvent {
    /// A chunk of a data message's payload, already unmasked. `is_final`
    /// marks the last chunk of the last fragment.
    DataChunk { is_text: bool, data: Vec<u8>, is_final: bool },
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// `protocol_error` is set when the close body itself was malformed —
    /// `code`/`reason` still carry whatever could be recovered so the
    /// handler sees `on_close` before the engine reacts by queuing the
    /// matching protocol-error response.
    Close { code: Option<u16>, reason: String, protocol_error: Option<CloseProtocolError> },
}

pub struct ReceiveEngine {
    phase: Phase,
    stream_kind: StreamKind,
    utf8: Utf8Validator,
    message_len: usize,
    max_payload_size: usize,
}

impl ReceiveEngine {
    pub fn new(max_payload_size: usize) -> Self {
        ReceiveEngine {
            phase: Phase::Header { buf: Vec::with_capacity(frame::FRAME_HEADER_MAX) },
            stream_kind: StreamKind::None,
            utf8: Utf8Validator::new(),
            message_len: 0,
            max_payload_size,
        }
    }

    /// Feeds `input` through the state machine, appending any resulting
    /// events (in wire order) to `events`. Returns the number of bytes of
    /// `input` consumed — the driver should discard that much from its
    /// buffer and keep the rest for the next call.
    pub fn push(
        &mut self,
        input: &[u8],
        close_state: &mut CloseState,
        events: &mut Vec<ReceiveEvent>,
    ) -> Result<usize, WebSocketError> {
        let mut consumed = 0;

        loop {
            match &mut self.phase {
                Phase::Header { buf } => {
                    let need = frame::FRAME_HEADER_MAX.saturating_sub(buf.len()).min(input.len() - consumed);
                    buf.extend_from_slice(&input[consumed..consumed + need]);

                    match frame::decode_header(buf) {
                        Ok(frame::DecodeOutcome::NeedMore(_)) => {
                            consumed += need;
                            if need == 0 {
                                return Ok(consumed);
                            }
                            continue;
                        }
                        Ok(frame::DecodeOutcome::Decoded { header, consumed: header_len }) => {
                            frame::validate_header(&header, Direction::ServerToClient)?;
                            // `buf` may contain bytes beyond the header
                            // (start of payload); roll `consumed` back to
                            // only what the header itself needed.
                            let overread = buf.len() - header_len;
                            consumed -= overread;
                            self.begin_payload(header)?;
                        }
                        Err(err) => return Err(err),
                    }
                }
                Phase::ControlPayload { header, buf } => {
                    let remaining = header.payload_len as usize - buf.len();
                    let take = remaining.min(input.len() - consumed);
                    buf.extend_from_slice(&input[consumed..consumed + take]);
                    consumed += take;

                    if buf.len() < header.payload_len as usize {
                        return Ok(consumed);
                    }

                    let opcode = header.opcode;
                    let payload = std::mem::take(buf);
                    self.finish_control(opcode, payload, close_state, events)?;
                    self.phase = Phase::Header { buf: Vec::with_capacity(frame::FRAME_HEADER_MAX) };
                }
                Phase::DataPayload { header, remaining } => {
                    let take = (*remaining as usize).min(input.len() - consumed);
                    let chunk = &input[consumed..consumed + take];

                    self.message_len += chunk.len();
                    if self.message_len > self.max_payload_size {
                        return Err(WebSocketError::AppDataLengthTooLong);
                    }

                    let is_text = self.stream_kind == StreamKind::Text;
                    let fin = header.fin;
                    *remaining -= take as u64;
                    let frame_done = *remaining == 0;
                    consumed += take;

                    if is_text {
                        self.utf8.feed(chunk, fin && frame_done)?;
                    }

                    if !chunk.is_empty() || (frame_done && fin) {
                        events.push(ReceiveEvent::DataChunk {
                            is_text,
                            data: chunk.to_vec(),
                            is_final: fin && frame_done,
                        });
                    }

                    if !frame_done {
                        return Ok(consumed);
                    }

                    if fin {
                        self.stream_kind = StreamKind::None;
                        self.message_len = 0;
                        self.utf8 = Utf8Validator::new();
                    }
                    self.phase = Phase::Header { buf: Vec::with_capacity(frame::FRAME_HEADER_MAX) };
                }
            }
        }
    }

    fn begin_payload(&mut self, header: FrameHeader) -> Result<(), WebSocketError> {
        if header.opcode.is_control() {
            self.phase = Phase::ControlPayload { header, buf: Vec::new() };
            return Ok(());
        }

        match header.opcode {
            OpCode::Text => self.stream_kind = StreamKind::Text,
            OpCode::Binary => self.stream_kind = StreamKind::Binary,
            OpCode::Continuation => {
                if self.stream_kind == StreamKind::None {
                    return Err(WebSocketError::StreamContinuityIssue);
                }
            }
            _ => unreachable!("control opcodes handled above"),
        }

        let remaining = header.payload_len;
        self.phase = Phase::DataPayload { header, remaining };
        Ok(())
    }

    fn finish_control(
        &mut self,
        opcode: OpCode,
        payload: Vec<u8>,
        close_state: &mut CloseState,
        events: &mut Vec<ReceiveEvent>,
    ) -> Result<(), WebSocketError> {
        match opcode {
            OpCode::Ping => events.push(ReceiveEvent::Ping(payload)),
            OpCode::Pong => events.push(ReceiveEvent::Pong(payload)),
            OpCode::Close => {
                let parsed = close::parse_close_body(&payload);
                close_state.insert(CloseState::RECEIVED);
                events.push(ReceiveEvent::Close {
                    code: parsed.code,
                    reason: parsed.reason,
                    protocol_error: parsed.protocol_error,
                });
            }
            _ => unreachable!("only control opcodes reach finish_control"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a server-to-client (unmasked) wire frame directly, rather than
    /// going through `frame::encode_header` — that function always writes a
    /// 4-byte masking key (the engine only ever encodes client frames), so
    /// reusing it here and then clearing the mask bit would leave those 4
    /// key bytes sitting in the stream ahead of the real payload.
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

    #[test]
    fn single_text_frame_produces_one_final_chunk() {
        let mut engine = ReceiveEngine::new(1024);
        let mut close_state = CloseState::empty();
        let wire = wire_frame(true, OpCode::Text, b"hi");

        let mut events = Vec::new();
        let consumed = engine.push(&wire, &mut close_state, &mut events).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(
            events[0],
            ReceiveEvent::DataChunk { is_text: true, data: b"hi".to_vec(), is_final: true }
        );
    }

    #[test]
    fn fragmented_message_streams_each_chunk() {
        let mut engine = ReceiveEngine::new(1024);
        let mut close_state = CloseState::empty();

        let frame1 = wire_frame(false, OpCode::Text, b"hel");
        let frame2 = wire_frame(true, OpCode::Continuation, b"lo");

        let mut events = Vec::new();
        engine.push(&frame1, &mut close_state, &mut events).unwrap();
        engine.push(&frame2, &mut close_state, &mut events).unwrap();

        assert_eq!(events.len(), 2);
        assert!(!matches!(events[0], ReceiveEvent::DataChunk { is_final: true, .. }));
        assert!(matches!(events[1], ReceiveEvent::DataChunk { is_final: true, .. }));
    }

    #[test]
    fn continuation_without_a_start_frame_is_an_error() {
        let mut engine = ReceiveEngine::new(1024);
        let mut close_state = CloseState::empty();
        let wire = wire_frame(true, OpCode::Continuation, b"oops");

        let mut events = Vec::new();
        let err = engine.push(&wire, &mut close_state, &mut events).unwrap_err();
        assert!(matches!(err, WebSocketError::StreamContinuityIssue));
    }

    #[test]
    fn partial_header_across_two_calls_is_assembled() {
        let mut engine = ReceiveEngine::new(1024);
        let mut close_state = CloseState::empty();
        let wire = wire_frame(true, OpCode::Text, b"hi");

        let mut events = Vec::new();
        let consumed = engine.push(&wire[..1], &mut close_state, &mut events).unwrap();
        assert_eq!(consumed, 1);
        assert!(events.is_empty());

        let consumed2 = engine.push(&wire[1..], &mut close_state, &mut events).unwrap();
        assert_eq!(consumed2, wire.len() - 1);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn close_frame_records_received_state_and_code() {
        let mut engine = ReceiveEngine::new(1024);
        let mut close_state = CloseState::empty();
        let mut body = 1000u16.to_be_bytes().to_vec();
        body.extend_from_slice(b"done");
        let wire = wire_frame(true, OpCode::Close, &body);

        let mut events = Vec::new();
        engine.push(&wire, &mut close_state, &mut events).unwrap();
        assert!(close_state.contains(CloseState::RECEIVED));
        assert_eq!(
            events[0],
            ReceiveEvent::Close { code: Some(1000), reason: "done".to_string(), protocol_error: None }
        );
    }

    #[test]
    fn invalid_close_code_still_reports_on_close_before_protocol_error() {
        let mut engine = ReceiveEngine::new(1024);
        let mut close_state = CloseState::empty();
        let body = 1004u16.to_be_bytes().to_vec();
        let wire = wire_frame(true, OpCode::Close, &body);

        let mut events = Vec::new();
        engine.push(&wire, &mut close_state, &mut events).unwrap();
        assert!(close_state.contains(CloseState::RECEIVED));
        match &events[0] {
            ReceiveEvent::Close { code, protocol_error, .. } => {
                assert_eq!(*code, Some(1004));
                assert_eq!(*protocol_error, Some(CloseProtocolError::InvalidCode));
            }
            other => panic!("expected a close event, got {other:?}"),
        }
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut engine = ReceiveEngine::new(4);
        let mut close_state = CloseState::empty();
        let wire = wire_frame(true, OpCode::Text, b"too long");

        let mut events = Vec::new();
        let err = engine.push(&wire, &mut close_state, &mut events).unwrap_err();
        assert!(matches!(err, WebSocketError::AppDataLengthTooLong));
    }

    #[test]
    fn dangling_utf8_is_rejected_even_when_the_final_frame_is_empty() {
        let mut engine = ReceiveEngine::new(1024);
        let mut close_state = CloseState::empty();

        // 0xE4 alone is a valid lead byte of a 3-byte sequence that never
        // completes. The first frame carries it and is non-final; the
        // second frame is final but has a zero-length payload, so the
        // dangling sequence can only be caught by validating on `is_final`
        // even when the last chunk handed to the validator is empty.
        let frame1 = wire_frame(false, OpCode::Text, &[0xE4]);
        let frame2 = wire_frame(true, OpCode::Continuation, &[]);

        let mut events = Vec::new();
        engine.push(&frame1, &mut close_state, &mut events).unwrap();
        let err = engine.push(&frame2, &mut close_state, &mut events).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidUtf8));
    }
}
