//! Codec for encoding and decoding control messages.
//!
//! Frame format: one UTF-8 JSON object per line.
//! ```text
//! {"cmd":"set_srtlatency","data":120}\n
//! {"cmd":"keepalive","ch":2}\n
//! ```
//! There is no length prefix, so a single read may carry zero, one or many
//! complete lines plus a partial tail. [`CommandDecoder`] keeps the tail
//! buffered until the rest of the line arrives.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{is_known_tag, Command, LINE_TERMINATOR, MAX_LINE_LENGTH};

/// Encode a command into one newline-terminated line.
pub fn encode_command(cmd: &Command) -> Result<Bytes, ProtocolError> {
    let json = serde_json::to_vec(cmd).map_err(|e| ProtocolError::EncodeError(e.to_string()))?;

    let mut out = BytesMut::with_capacity(json.len() + 1);
    out.put_slice(&json);
    out.put_u8(LINE_TERMINATOR);
    Ok(out.freeze())
}

/// Decode a single line (without its terminator) into a command.
pub fn decode_command(line: &[u8]) -> Result<Command, ProtocolError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8: {}", e)))?
        .trim();

    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(ProtocolError::Malformed("expected a JSON object".to_string()));
    }

    let tag = match value.get("cmd") {
        Some(Value::String(tag)) => tag.clone(),
        Some(_) => return Err(ProtocolError::Malformed("`cmd` is not a string".to_string())),
        None => return Err(ProtocolError::Malformed("missing `cmd` field".to_string())),
    };

    if !is_known_tag(&tag) {
        return Err(ProtocolError::UnknownCommand(tag));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(format!("{}: {}", tag, e)))
}

/// Streaming decoder for newline-delimited commands.
#[derive(Debug, Default)]
pub struct CommandDecoder {
    buf: BytesMut,
    /// Set after an over-long line was reported; bytes are dropped until the
    /// next terminator.
    discarding: bool,
}

impl CommandDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            discarding: false,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Direct access to the receive buffer, for `read_buf`-style I/O.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered bytes not yet forming a complete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete line, if any.
    ///
    /// Returns `None` when the buffer holds no complete line. Blank lines are
    /// skipped.
    pub fn next_command(&mut self) -> Option<Result<Command, ProtocolError>> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == LINE_TERMINATOR) else {
                return self.check_overflow();
            };

            let line = self.buf.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }

            let body = &line[..pos];
            if body.len() > MAX_LINE_LENGTH {
                return Some(Err(ProtocolError::LineTooLong {
                    len: body.len(),
                    max: MAX_LINE_LENGTH,
                }));
            }
            if body.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            return Some(decode_command(body));
        }
    }

    /// Iterate over every complete command currently buffered.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { decoder: self }
    }

    fn check_overflow(&mut self) -> Option<Result<Command, ProtocolError>> {
        if self.buf.len() <= MAX_LINE_LENGTH {
            return None;
        }

        let len = self.buf.len();
        self.buf.clear();
        if self.discarding {
            return None;
        }
        self.discarding = true;
        Some(Err(ProtocolError::LineTooLong {
            len,
            max: MAX_LINE_LENGTH,
        }))
    }
}

/// Iterator returned by [`CommandDecoder::drain`].
pub struct Drain<'a> {
    decoder: &'a mut CommandDecoder,
}

impl Iterator for Drain<'_> {
    type Item = Result<Command, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_command()
    }
}
