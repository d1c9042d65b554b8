// =============================================================================
// FIX wire framer — inbound byte buffer to validated frames
// =============================================================================
//
// Accumulates TLS read chunks and cuts them into complete messages. A frame
// is accepted only when the declared body length is in range, the full
// trailer has arrived and the checksum matches. Framing and checksum
// failures are fatal for the connection: the session must disconnect and
// reconnect rather than resynchronise on a corrupt stream.
// =============================================================================

use thiserror::Error;

use super::message::{checksum, FixMessage, SOH};

/// Upper bound on a single message; anything larger is a corrupt length field.
const MAX_MESSAGE_SIZE: usize = 65_536;
/// `10=NNN<SOH>`
const TRAILER_LEN: usize = 7;
/// Minimum SendingTime length (`YYYYMMDD-HH:MM:SS`).
const MIN_SENDING_TIME_LEN: usize = 17;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("body length {0} out of range")]
    BodyLengthOutOfRange(i64),
    #[error("checksum mismatch: transmitted {transmitted}, computed {computed}")]
    ChecksumMismatch { transmitted: u32, computed: u32 },
    #[error("SendingTime missing or malformed: {0:?}")]
    MalformedSendingTime(String),
    #[error("SendingTime regression: {current:?} < {previous:?}")]
    SendingTimeRegression { current: String, previous: String },
}

pub struct InboundFramer {
    buf: Vec<u8>,
    last_sending_time: String,
}

impl InboundFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(16 * 1024),
            last_sending_time: String::new(),
        }
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract every complete frame currently buffered. Any framing or
    /// checksum failure is terminal: the buffer is dropped and the caller
    /// must tear the connection down.
    pub fn next_frames(&mut self) -> Result<Vec<Vec<u8>>, FrameError> {
        let mut frames = Vec::new();

        loop {
            // Resynchronise on the next message start, discarding noise.
            let Some(start) = find(&self.buf, b"8=FIX") else {
                self.buf.clear();
                break;
            };
            if start > 0 {
                self.buf.drain(..start);
            }

            let Some(len_pos) = find(&self.buf, b"9=") else {
                break;
            };
            let Some(len_end) = find_from(&self.buf, SOH, len_pos) else {
                break;
            };

            let len_str = String::from_utf8_lossy(&self.buf[len_pos + 2..len_end]);
            let body_length: i64 = match len_str.parse() {
                Ok(n) => n,
                Err(_) => {
                    // Unparseable length: skip this fragment and resync.
                    self.buf.drain(..len_end + 1);
                    continue;
                }
            };
            if body_length < 0 || body_length as usize > MAX_MESSAGE_SIZE {
                self.buf.clear();
                return Err(FrameError::BodyLengthOutOfRange(body_length));
            }

            let body_start = len_end + 1;
            let total = body_start + body_length as usize + TRAILER_LEN;
            if self.buf.len() < total {
                break; // wait for more bytes
            }

            let frame: Vec<u8> = self.buf[..total].to_vec();
            self.validate_checksum(&frame)?;
            self.buf.drain(..total);
            frames.push(frame);
        }

        Ok(frames)
    }

    fn validate_checksum(&mut self, frame: &[u8]) -> Result<(), FrameError> {
        let cs_pos = frame.len() - TRAILER_LEN;
        debug_assert_eq!(&frame[cs_pos..cs_pos + 3], b"10=");

        let transmitted: u32 = std::str::from_utf8(&frame[cs_pos + 3..cs_pos + 6])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(FrameError::ChecksumMismatch { transmitted: 0, computed: 0 })?;
        let computed = checksum(&frame[..cs_pos]) as u32;

        if transmitted != computed {
            self.buf.clear();
            return Err(FrameError::ChecksumMismatch { transmitted, computed });
        }
        Ok(())
    }

    /// Tag-52 validation: present, plausibly long, and non-regressing against
    /// the last accepted value. Fixed-width UTC timestamps compare correctly
    /// as strings.
    pub fn validate_sending_time(&mut self, msg: &FixMessage) -> Result<(), FrameError> {
        let st = msg
            .get(super::message::tags::SENDING_TIME)
            .unwrap_or_default();
        if st.len() < MIN_SENDING_TIME_LEN {
            return Err(FrameError::MalformedSendingTime(st.to_string()));
        }
        if !self.last_sending_time.is_empty() && st < self.last_sending_time.as_str() {
            return Err(FrameError::SendingTimeRegression {
                current: st.to_string(),
                previous: self.last_sending_time.clone(),
            });
        }
        self.last_sending_time = st.to_string();
        Ok(())
    }

    /// Drop buffered bytes and SendingTime history (reconnect path).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.last_sending_time.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

fn find_from(haystack: &[u8], byte: u8, from: usize) -> Option<usize> {
    haystack[from..].iter().position(|&b| b == byte).map(|p| p + from)
}
