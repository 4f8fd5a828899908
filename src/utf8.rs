//! Streaming UTF-8 validation (component 4.B, RFC 3629), so the receive
//! engine can reject invalid text as each chunk arrives instead of
//! buffering a whole message first.
//!
//! Lead-byte rejects 0xC0 and 0xC1 outright (overlong 2-byte encodings):
//! a valid 2-byte sequence only ever starts with 0xC2-0xDF.

use crate::error::WebSocketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    /// Expect `remaining` more continuation bytes; `min`/`max` bound the
    /// second byte to rule out overlong encodings and surrogate halves.
    Continuation { remaining: u8, min: u8, max: u8 },
    /// Mid-sequence but past the constrained second byte.
    Trailing { remaining: u8 },
}

/// Carries UTF-8 decode state across chunk boundaries.
#[derive(Debug, Clone, Copy)]
pub struct Utf8Validator {
    state: State,
}

impl Default for Utf8Validator {
    fn default() -> Self {
        Utf8Validator { state: State::Start }
    }
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk through the validator. `is_final` marks whether more
    /// bytes may follow in a later call: a dangling partial sequence at the
    /// end of a non-final chunk is fine (more continuation bytes may be on
    /// the way); the same dangling sequence at the end of the final chunk
    /// is an error.
    pub fn feed(&mut self, chunk: &[u8], is_final: bool) -> Result<(), WebSocketError> {
        for &byte in chunk {
            self.state = match self.state {
                State::Start => {
                    if byte < 0x80 {
                        State::Start
                    } else if (0xC2..=0xDF).contains(&byte) {
                        State::Trailing { remaining: 1 }
                    } else if byte == 0xE0 {
                        State::Continuation { remaining: 2, min: 0xA0, max: 0xBF }
                    } else if (0xE1..=0xEC).contains(&byte) || (0xEE..=0xEF).contains(&byte) {
                        State::Continuation { remaining: 2, min: 0x80, max: 0xBF }
                    } else if byte == 0xED {
                        // Excludes the surrogate range D800-DFFF.
                        State::Continuation { remaining: 2, min: 0x80, max: 0x9F }
                    } else if byte == 0xF0 {
                        State::Continuation { remaining: 3, min: 0x90, max: 0xBF }
                    } else if (0xF1..=0xF3).contains(&byte) {
                        State::Continuation { remaining: 3, min: 0x80, max: 0xBF }
                    } else if byte == 0xF4 {
                        // Excludes code points above U+10FFFF.
                        State::Continuation { remaining: 3, min: 0x80, max: 0x8F }
                    } else {
                        return Err(WebSocketError::InvalidUtf8);
                    }
                }
                State::Continuation { remaining, min, max } => {
                    if byte < min || byte > max {
                        return Err(WebSocketError::InvalidUtf8);
                    }
                    if remaining == 1 {
                        State::Start
                    } else {
                        State::Trailing { remaining: remaining - 1 }
                    }
                }
                State::Trailing { remaining } => {
                    if !(0x80..=0xBF).contains(&byte) {
                        return Err(WebSocketError::InvalidUtf8);
                    }
                    if remaining == 1 {
                        State::Start
                    } else {
                        State::Trailing { remaining: remaining - 1 }
                    }
                }
            };
        }

        if is_final && self.state != State::Start {
            return Err(WebSocketError::InvalidUtf8);
        }

        Ok(())
    }
}

/// Convenience one-shot validator for a complete, non-streamed buffer.
pub fn validate_complete(data: &[u8]) -> Result<(), WebSocketError> {
    Utf8Validator::new().feed(data, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ascii_and_multibyte_text() {
        assert!(validate_complete("hello world".as_bytes()).is_ok());
        assert!(validate_complete("héllo 世界".as_bytes()).is_ok());
    }

    #[test]
    fn rejects_overlong_two_byte_lead() {
        // 0xC0 0x80 would overlong-encode NUL.
        let err = validate_complete(&[0xC0, 0x80]).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidUtf8));
        let err = validate_complete(&[0xC1, 0x81]).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidUtf8));
    }

    #[test]
    fn rejects_surrogate_halves() {
        // ED A0 80 would encode U+D800, a lone surrogate.
        let err = validate_complete(&[0xED, 0xA0, 0x80]).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidUtf8));
    }

    #[test]
    fn streaming_split_mid_sequence_is_accepted() {
        let text = "日本語".as_bytes();
        let mut validator = Utf8Validator::new();
        validator.feed(&text[..1], false).unwrap();
        validator.feed(&text[1..], true).unwrap();
    }

    #[test]
    fn dangling_sequence_at_final_chunk_is_rejected() {
        let mut validator = Utf8Validator::new();
        // 0xE4 alone is a valid prefix of a 3-byte sequence, but never completed.
        let err = validator.feed(&[0xE4], true).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidUtf8));
    }

    #[test]
    fn dangling_sequence_mid_stream_is_fine_until_final() {
        let mut validator = Utf8Validator::new();
        validator.feed(&[0xE4], false).unwrap();
    }
}
