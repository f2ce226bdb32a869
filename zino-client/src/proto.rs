// Response framing for the Zino line protocol

//! Response framing
//!
//! Every server reply starts with a header line `CODE SP TEXT CRLF`. The
//! code decides the shape: 200, 302 and 5xx replies are the header alone;
//! 300, 301, 303 and 304 announce a data block of CRLF-terminated lines
//! closed by a line containing exactly `.`.
//!
//! Lines are split at the byte level and decoded individually through
//! [`crate::encoding::decode`], so a stray CP1252 byte in one line never
//! corrupts its neighbours.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use crate::encoding;
use crate::error::{Error, Result};

/// Line delimiter used in both directions.
pub const DELIMITER: &str = "\r\n";

/// Status code for a successful single-line reply.
pub const CODE_OK: u16 = 200;
/// Status code asking the client for a dot-terminated continuation payload.
pub const CODE_CONTINUE: u16 = 302;

const READ_CHUNK: usize = 4096;

/// One parsed server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Numeric status code from the header line.
    pub code: u16,
    /// Header text after the status code.
    pub text: String,
    /// Data lines of a multi-line block, without the closing `.`.
    ///
    /// Empty for single-line replies.
    pub lines: Vec<String>,
}

impl Response {
    /// True for a 200 reply.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// True for a server-side error reply (5xx).
    pub fn is_error(&self) -> bool {
        self.code >= 500
    }
}

/// Position of the first CRLF in `buf`, if any.
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == b"\r\n")
}

/// Pop one decoded line off `buf` if a full CRLF-terminated line is buffered.
pub(crate) fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let end = find_crlf(buf)?;
    let line: Vec<u8> = buf.drain(..end + 2).collect();
    Some(encoding::decode(&line[..line.len() - 2]))
}

/// Send one command, appending the CRLF terminator if it is missing.
pub(crate) async fn write_command(stream: &mut TcpStream, command: &str) -> Result<()> {
    let mut wire = Vec::with_capacity(command.len() + 2);
    wire.extend_from_slice(command.as_bytes());
    if !command.ends_with(DELIMITER) {
        wire.extend_from_slice(DELIMITER.as_bytes());
    }
    stream.write_all(&wire).await.map_err(Error::from_io)
}

/// Read one CRLF-terminated line, blocking up to `timeout` per recv.
///
/// `command` only labels the [`Error::Timeout`] that is raised when the
/// server goes quiet mid-line.
pub(crate) async fn read_line(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    timeout: Duration,
    command: &str,
) -> Result<String> {
    loop {
        if let Some(line) = take_line(buf) {
            return Ok(line);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let read = time::timeout(timeout, stream.read(&mut chunk)).await;
        let count = match read {
            Ok(Ok(count)) => count,
            Ok(Err(err)) => return Err(Error::from_io(err)),
            Err(_) => {
                return Err(Error::Timeout {
                    command: command.to_string(),
                    partial: encoding::decode(buf),
                })
            }
        };
        if count == 0 {
            return Err(Error::LostConnection(format!(
                "server closed the connection while {command:?} was pending"
            )));
        }
        buf.extend_from_slice(&chunk[..count]);
    }
}

/// Read one full response, single-line or dot-terminated block.
pub(crate) async fn read_response(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    timeout: Duration,
    command: &str,
) -> Result<Response> {
    let header = read_line(stream, buf, timeout, command).await?;
    let (code_text, text) = header.split_once(' ').unwrap_or((header.as_str(), ""));
    let code: u16 = code_text.parse().map_err(|_| {
        Error::Protocol(format!("illegal response from server: {header:?}"))
    })?;

    match code {
        CODE_OK | CODE_CONTINUE => Ok(Response {
            code,
            text: text.to_string(),
            lines: Vec::new(),
        }),
        300 | 301 | 303 | 304 => {
            let mut lines = Vec::new();
            loop {
                let line = read_line(stream, buf, timeout, command).await?;
                if line == "." {
                    break;
                }
                lines.push(line);
            }
            Ok(Response {
                code,
                text: text.to_string(),
                lines,
            })
        }
        code if code >= 500 => Ok(Response {
            code,
            text: text.to_string(),
            lines: Vec::new(),
        }),
        other => Err(Error::Protocol(format!(
            "unexpected status code {other} in {header:?}"
        ))),
    }
}
