//! Outbound queue and frame-send logic (component 4.F), grounded in the
//! original's linked list of pending buffers — reimplemented here as a
//! `VecDeque`, which is the natural Rust shape for "append at the tail,
//! drain from the head, occasionally splice something in near the front."
//!
//! Each queued frame is encoded in full (header + mask + masked payload)
//! into its pool block at enqueue time, with a `sent` cursor tracking how
//! much of it has already been handed to the transport. That lets
//! [`SendQueue::drain`] serve a transport buffer smaller than a frame
//! across multiple calls without re-deriving the masking key each time —
//! the mask is fixed for the lifetime of a frame, never regenerated
//! mid-send.

use crate::close::CloseState;
use crate::error::WebSocketError;
use crate::frame::{self, Direction, OpCode};
use crate::pool::{Pool, PoolHandle};
use std::collections::VecDeque;

/// A single frame waiting to go out: the fully encoded wire bytes (header,
/// mask, masked payload) sitting in a pool block, plus how much of it has
/// already been copied into a transport buffer.
struct QueuedFrame {
    opcode: OpCode,
    handle: PoolHandle,
    total_len: usize,
    sent: usize,
}

/// How urgently a frame should be queued. Everything goes to the tail
/// except pongs and urgent closes, which should jump ahead of a large data
/// send already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Urgent,
}

/// What happened while draining the queue into a transport buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Bytes copied into the caller's buffer.
    pub written: usize,
    /// Set once a close frame has been fully copied out during this call —
    /// the caller should set `CLOSE_SENT` and discard anything still queued.
    pub close_sent: bool,
}

pub struct SendQueue {
    queue: VecDeque<QueuedFrame>,
}

impl Default for SendQueue {
    fn default() -> Self {
        SendQueue { queue: VecDeque::new() }
    }
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Encodes `fin|opcode|payload` under `masking_key` into a scratch
    /// buffer, hands it to the pool, and inserts it per `priority`.
    fn enqueue(
        &mut self,
        pool: &mut Pool,
        fin: bool,
        opcode: OpCode,
        payload: &[u8],
        masking_key: [u8; 4],
        priority: Priority,
        is_control: bool,
    ) -> Result<(), WebSocketError> {
        let mut header = [0u8; frame::FRAME_HEADER_MAX];
        let header_len = frame::encode_header(fin, opcode, masking_key, payload.len(), &mut header)
            .ok_or(WebSocketError::AppDataLengthTooLong)?;

        let mut wire = Vec::with_capacity(header_len + payload.len());
        wire.extend_from_slice(&header[..header_len]);
        wire.extend_from_slice(payload);
        frame::mask_payload(&mut wire[header_len..], masking_key);

        let handle = if is_control {
            pool.alloc_control(&wire)?
        } else {
            pool.alloc_data(&wire)?
        };

        let frame = QueuedFrame { opcode, handle, total_len: wire.len(), sent: 0 };
        match priority {
            Priority::Normal => self.queue.push_back(frame),
            Priority::Urgent => {
                let insert_at = match self.queue.front() {
                    Some(head) if head.sent > 0 => 1,
                    _ => 0,
                };
                self.queue.insert(insert_at.min(self.queue.len()), frame);
            }
        }
        Ok(())
    }

    /// Queues a control frame (ping, pong, or close). Blocked only once a
    /// close has already been queued — a second control frame queued after
    /// a close would never be sent anyway, since draining the close frame
    /// discards the rest of the queue. Grounded in the asymmetric gating
    /// between control and data sends: control frames check only
    /// `CLOSE_QUEUED`, where data frames check the whole close state.
    pub fn send_control(
        &mut self,
        pool: &mut Pool,
        close_state: CloseState,
        opcode: OpCode,
        payload: &[u8],
        masking_key: [u8; 4],
        priority: Priority,
    ) -> Result<(), WebSocketError> {
        if close_state.contains(CloseState::QUEUED) {
            return Err(WebSocketError::ClosedConnection);
        }
        if payload.len() > frame::CONTROL_PAYLOAD_MAX {
            return Err(WebSocketError::AppDataLengthTooLong);
        }
        self.enqueue(pool, true, opcode, payload, masking_key, priority, true)
    }

    /// Queues one data frame (a fragment of a larger message, or a whole
    /// message sent in one block). Blocked by ANY close-state bit: once the
    /// close handshake has started in either direction, no new application
    /// data may enter the queue.
    pub fn send_data(
        &mut self,
        pool: &mut Pool,
        close_state: CloseState,
        fin: bool,
        opcode: OpCode,
        payload: &[u8],
        masking_key: [u8; 4],
    ) -> Result<(), WebSocketError> {
        if !close_state.is_empty() {
            return Err(WebSocketError::ClosedConnection);
        }
        self.enqueue(pool, fin, opcode, payload, masking_key, Priority::Normal, false)
    }

    /// Splits `payload` into `max_frame_size`-sized chunks and queues them
    /// as a fragmented message: first fragment carries `opcode`, the rest
    /// carry `Continuation`, and only the last sets `fin`. `keys` supplies
    /// one fresh masking key per frame.
    pub fn send_fragmented(
        &mut self,
        pool: &mut Pool,
        close_state: CloseState,
        opcode: OpCode,
        payload: &[u8],
        max_frame_size: usize,
        mut keys: impl FnMut() -> [u8; 4],
    ) -> Result<(), WebSocketError> {
        if !close_state.is_empty() {
            return Err(WebSocketError::ClosedConnection);
        }
        if payload.is_empty() {
            return self.enqueue(pool, true, opcode, &[], keys(), Priority::Normal, false);
        }

        let chunks: Vec<&[u8]> = payload.chunks(max_frame_size.max(1)).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let frame_opcode = if i == 0 { opcode } else { OpCode::Continuation };
            self.enqueue(pool, i == last, frame_opcode, chunk, keys(), Priority::Normal, false)?;
        }
        Ok(())
    }

    /// Discards everything still queued, freeing their pool blocks. Called
    /// once a close frame has been fully drained: nothing queued after a
    /// close is ever sent.
    pub fn drain_discard(&mut self, pool: &mut Pool) {
        while let Some(frame) = self.queue.pop_front() {
            pool.free(frame.handle);
        }
    }

    /// Copies as many queued bytes as fit into `out`, spanning multiple
    /// frames if `out` has room, and stopping partway through a frame if it
    /// doesn't. Frees a frame's pool block as soon as it's been fully
    /// copied out; a close frame fully copied out ends the drain for this
    /// call (`close_sent` is set) even if `out` still has room, since the
    /// queue contract guarantees nothing legitimate follows a close.
    pub fn drain(&mut self, pool: &mut Pool, out: &mut [u8]) -> DrainOutcome {
        let mut written = 0;
        let mut close_sent = false;

        while written < out.len() {
            let Some(frame) = self.queue.front_mut() else { break };
            let wire = pool.payload(&frame.handle);
            let remaining = wire.len() - frame.sent;
            let take = remaining.min(out.len() - written);
            out[written..written + take].copy_from_slice(&wire[frame.sent..frame.sent + take]);
            frame.sent += take;
            written += take;

            if frame.sent < frame.total_len {
                break;
            }

            let done = self.queue.pop_front().expect("front just matched");
            let was_close = done.opcode == OpCode::Close;
            pool.free(done.handle);

            if was_close {
                close_sent = true;
                self.drain_discard(pool);
                break;
            }
        }

        DrainOutcome { written, close_sent }
    }
}

pub fn validate_send_direction(header: &frame::FrameHeader) -> Result<(), WebSocketError> {
    frame::validate_header(header, Direction::ClientToServer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [1, 2, 3, 4];

    #[test]
    fn data_frame_blocked_once_close_state_is_set() {
        let mut pool = Pool::new(128, 4, 4096, 4);
        let mut queue = SendQueue::new();
        let err = queue
            .send_data(&mut pool, CloseState::QUEUED, true, OpCode::Text, b"hi", KEY)
            .unwrap_err();
        assert!(matches!(err, WebSocketError::ClosedConnection));
    }

    #[test]
    fn control_frame_allowed_unless_close_already_queued() {
        let mut pool = Pool::new(128, 4, 4096, 4);
        let mut queue = SendQueue::new();
        // CLOSE_SENT alone doesn't block a control frame (e.g. a pong).
        queue
            .send_control(&mut pool, CloseState::SENT, OpCode::Pong, b"", KEY, Priority::Normal)
            .unwrap();
        assert!(!queue.is_empty());
    }

    #[test]
    fn fragmented_message_marks_first_and_last_correctly() {
        let mut pool = Pool::new(128, 4, 4096, 4);
        let mut queue = SendQueue::new();
        let mut n = 0u8;
        queue
            .send_fragmented(&mut pool, CloseState::empty(), OpCode::Text, b"hello world", 4, || {
                n += 1;
                [n, n, n, n]
            })
            .unwrap();
        assert_eq!(queue.queue.len(), 3);
        assert_eq!(queue.queue[0].opcode, OpCode::Text);
        assert_eq!(queue.queue[1].opcode, OpCode::Continuation);
        assert_eq!(queue.queue[2].opcode, OpCode::Continuation);
    }

    #[test]
    fn drain_copies_a_whole_small_frame_in_one_call() {
        let mut pool = Pool::new(128, 4, 4096, 4);
        let mut queue = SendQueue::new();
        queue
            .send_control(&mut pool, CloseState::empty(), OpCode::Ping, b"hi", KEY, Priority::Normal)
            .unwrap();

        let mut out = [0u8; 64];
        let outcome = queue.drain(&mut pool, &mut out);
        assert!(outcome.written > 2);
        assert!(!outcome.close_sent);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_spans_a_frame_across_multiple_small_buffers() {
        let mut pool = Pool::new(128, 4, 4096, 4);
        let mut queue = SendQueue::new();
        queue
            .send_data(&mut pool, CloseState::empty(), true, OpCode::Text, b"hello world", KEY)
            .unwrap();

        let mut collected = Vec::new();
        let mut out = [0u8; 3];
        loop {
            let outcome = queue.drain(&mut pool, &mut out);
            if outcome.written == 0 {
                break;
            }
            collected.extend_from_slice(&out[..outcome.written]);
        }
        // header (2) + payload (11) = 13 bytes total, reassembled across several 3-byte reads.
        assert_eq!(collected.len(), 13);
        assert!(queue.is_empty());
    }

    #[test]
    fn draining_a_close_frame_discards_anything_queued_after_it() {
        let mut pool = Pool::new(128, 4, 4096, 4);
        let mut queue = SendQueue::new();
        queue
            .send_control(&mut pool, CloseState::empty(), OpCode::Close, &[], KEY, Priority::Normal)
            .unwrap();
        // Invariant violation in a test double only: nothing should normally
        // be enqueued after a close, but drain must still cope defensively.
        queue
            .send_control(&mut pool, CloseState::empty(), OpCode::Ping, b"x", KEY, Priority::Normal)
            .unwrap();

        let mut out = [0u8; 64];
        let outcome = queue.drain(&mut pool, &mut out);
        assert!(outcome.close_sent);
        assert!(queue.is_empty());
    }

    #[test]
    fn urgent_insert_jumps_ahead_of_normal_but_not_a_partially_sent_head() {
        let mut pool = Pool::new(128, 8, 4096, 8);
        let mut queue = SendQueue::new();
        queue
            .send_data(&mut pool, CloseState::empty(), true, OpCode::Text, b"head-frame-payload", KEY)
            .unwrap();
        queue
            .send_data(&mut pool, CloseState::empty(), true, OpCode::Text, b"normal", KEY)
            .unwrap();

        // Partially drain the head frame so `sent > 0`.
        let mut out = [0u8; 3];
        queue.drain(&mut pool, &mut out);

        queue
            .send_control(&mut pool, CloseState::empty(), OpCode::Pong, b"urgent", KEY, Priority::Urgent)
            .unwrap();

        assert_eq!(queue.queue[0].opcode, OpCode::Text);
        assert_eq!(queue.queue[1].opcode, OpCode::Pong);
        assert_eq!(queue.queue[2].opcode, OpCode::Text);
    }
}
