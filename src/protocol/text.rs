//! RESP-style text protocol.
//!
//! A request is a run of CRLF-separated lines. Line 0 carries a sigil and the
//! element count, and the elements sit on the even lines after it (2, 4, ...),
//! each preceded by a length line that is ignored. A reply is a single line:
//! `+payload\r\n` for status or `-ERR ...\r\n` for errors.

use bytes::{BufMut, Bytes, BytesMut};

use crate::common::error::TextError;

pub const CRLF: &[u8] = b"\r\n";
pub const STATUS: u8 = b'+';
pub const ERROR: u8 = b'-';

pub const CMD_PING: &str = "ping";
pub const CMD_SFID: &str = "sfid";
pub const PONG: &str = "pong";

pub const ERR_NOT_SUPPORTED: &str = "-ERR not support cmd";
pub const ERR_NODE_ID: &str = "-ERR node_id must be int";

/// A tokenized request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRequest {
    pub sigil: u8,
    /// Element count declared by the header line.
    pub count: i64,
    /// Lower-cased elements; the command first, then its arguments.
    pub elements: Vec<String>,
}

impl TextRequest {
    pub fn command(&self) -> &str {
        &self.elements[0]
    }

    /// Argument `i`, counting from the first one after the command.
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.elements.get(i + 1).map(String::as_str)
    }
}

fn split_lines(buf: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut rest = buf;
    while let Some(i) = rest.windows(CRLF.len()).position(|w| w == CRLF) {
        lines.push(&rest[..i]);
        rest = &rest[i + CRLF.len()..];
    }
    lines.push(rest);
    lines
}

/// Tokenize one request.
///
/// Short or garbled input yields an error, never a panic.
pub fn parse_request(buf: &[u8]) -> Result<TextRequest, TextError> {
    let lines = split_lines(buf);

    let (&sigil, digits) = lines[0].split_first().ok_or(TextError::Empty)?;
    let count = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(TextError::BadCount)?;

    let elements: Vec<String> = lines
        .iter()
        .skip(2)
        .step_by(2)
        .map(|l| String::from_utf8_lossy(l).to_lowercase())
        .collect();
    if elements.is_empty() {
        return Err(TextError::MissingCommand);
    }

    Ok(TextRequest {
        sigil,
        count,
        elements,
    })
}

/// Frame a reply payload: status sigil unless it is already an error line,
/// then the terminator.
pub fn encode_reply(payload: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 3);
    if !payload.as_bytes().starts_with(&[ERROR]) {
        out.put_u8(STATUS);
    }
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(CRLF);
    out.freeze()
}
