//! Line framing for the remote application protocol
//!
//! One message per line: `COMMAND [PARAMETER]\n`, UTF-8. The command is a
//! single token; the parameter is the rest of the line. Inside a parameter,
//! `\` escapes a newline (`\n`), carriage return (`\r`) or itself (`\\`).
//!
//! The framer only ever looks for `\n`, so a bad line costs exactly that line.
//! A line that grows past the limit is reported once and skipped up to and
//! including its terminating newline.

use bytes::{Buf, BytesMut};
use std::fmt;

use crate::error::FrameError;

/// Incremental newline splitter over a byte stream
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_len: usize,
    /// Inside an over-long line; drop bytes until the next newline
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len.min(8 * 1024)),
            max_len,
            discarding: false,
        }
    }

    /// Append bytes as read from the socket
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Forget any partial line (new connection)
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Bytes held for an incomplete line
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete line without its terminator, `None` when more input is needed
    pub fn next_line(&mut self) -> Option<Result<String, FrameError>> {
        loop {
            let newline = self.buf.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buf.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
            }

            return match newline {
                Some(pos) if pos > self.max_len => {
                    self.buf.advance(pos + 1);
                    Some(Err(FrameError::TooLong { max: self.max_len }))
                }
                Some(pos) => {
                    let mut line = self.buf.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(pos - 1);
                    }
                    Some(String::from_utf8(line.to_vec()).map_err(|_| FrameError::InvalidUtf8))
                }
                None if self.buf.len() > self.max_len => {
                    self.buf.clear();
                    self.discarding = true;
                    Some(Err(FrameError::TooLong { max: self.max_len }))
                }
                None => None,
            };
        }
    }
}

/// One parsed line from the remote application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub command: String,
    pub param: Option<String>,
}

impl InboundMessage {
    /// Parse a line (without its terminator)
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return Err(FrameError::Empty);
        }

        let (command, param) = match line.split_once(' ') {
            Some((command, param)) => (command, Some(param)),
            None => (line, None),
        };
        validate_command(command)?;

        Ok(Self {
            command: command.to_string(),
            param: param
                .map(unescape)
                .filter(|p| !p.is_empty()),
        })
    }

    /// Parameter as a number, if it is one
    pub fn value(&self) -> Option<f64> {
        self.param
            .as_deref()
            .and_then(|p| p.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.param {
            Some(param) => write!(f, "{} {}", self.command, param),
            None => f.write_str(&self.command),
        }
    }
}

/// Build one wire line for `command` and `param`
pub fn encode_frame(command: &str, param: &str) -> Result<String, FrameError> {
    validate_command(command)?;
    let mut line = String::with_capacity(command.len() + param.len() + 2);
    line.push_str(command);
    if !param.is_empty() {
        line.push(' ');
        escape_into(param, &mut line);
    }
    line.push('\n');
    Ok(line)
}

/// Commands are one token of ASCII letters, digits, `_`, `.` or `-`
pub fn validate_command(command: &str) -> Result<(), FrameError> {
    let valid = !command.is_empty()
        && command
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(FrameError::InvalidCommand(command.chars().take(64).collect()))
    }
}

fn escape_into(param: &str, out: &mut String) {
    for c in param.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

/// Undo [`escape_into`]; unknown escapes are kept as written
fn unescape(param: &str) -> String {
    if !param.contains('\\') {
        return param.to_string();
    }
    let mut out = String::with_capacity(param.len());
    let mut chars = param.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
