//! Default fragment reassembler (component 4.G): glues a run of
//! `ReceiveEvent::DataChunk` events back into one complete message, for
//! callers that would rather get `on_text`/`on_binary` than track
//! fragments themselves via `on_fragment`.

use crate::error::WebSocketError;
use crate::utf8::Utf8Validator;

pub enum ReassembledMessage {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Default)]
pub struct Reassembler {
    buf: Vec<u8>,
    is_text: bool,
    validator: Utf8Validator,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one chunk. When `is_final`, returns the completed message.
    /// `validate_text` controls whether a second incremental UTF-8 pass
    /// runs over the already-per-frame-validated text (see
    /// `WebSocketConfig::validate_reassembled_text`).
    pub fn push_chunk(
        &mut self,
        is_text: bool,
        data: &[u8],
        is_final: bool,
        validate_text: bool,
    ) -> Result<Option<ReassembledMessage>, WebSocketError> {
        if self.buf.is_empty() {
            self.is_text = is_text;
            self.validator = Utf8Validator::new();
        }

        self.buf.extend_from_slice(data);

        if is_text && validate_text {
            self.validator.feed(data, is_final)?;
        }

        if !is_final {
            return Ok(None);
        }

        let buf = std::mem::take(&mut self.buf);
        let message = if self.is_text {
            let text = String::from_utf8(buf).map_err(|_| WebSocketError::InvalidUtf8)?;
            ReassembledMessage::Text(text)
        } else {
            ReassembledMessage::Binary(buf)
        };
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_text_across_three_chunks() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.push_chunk(true, b"hel", false, true).unwrap().is_none());
        assert!(reassembler.push_chunk(true, b"l", false, true).unwrap().is_none());
        let message = reassembler.push_chunk(true, b"o", true, true).unwrap().unwrap();
        match message {
            ReassembledMessage::Text(text) => assert_eq!(text, "hello"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn reassembles_binary_without_utf8_checks() {
        let mut reassembler = Reassembler::new();
        let message = reassembler.push_chunk(false, &[0xFF, 0x00], true, true).unwrap().unwrap();
        match message {
            ReassembledMessage::Binary(data) => assert_eq!(data, vec![0xFF, 0x00]),
            _ => panic!("expected binary"),
        }
    }

    #[test]
    fn disabling_validation_skips_the_incremental_utf8_pass() {
        let mut reassembler = Reassembler::new();
        // An isolated trailing byte of a multi-byte sequence would fail
        // streaming validation, but with validate_text off we never feed
        // the validator and only check validity (implicitly, via
        // String::from_utf8) once the message is complete.
        let result = reassembler.push_chunk(true, b"ok", true, false).unwrap();
        assert!(matches!(result, Some(ReassembledMessage::Text(ref s)) if s == "ok"));
    }
}
