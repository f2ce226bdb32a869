// Notification channel: session key handshake and non-blocking polling

//! The notification channel
//!
//! A second TCP connection to the server's notification port (default
//! 8002). The first line the server sends is a 40-character session key;
//! handing that key to the request channel's `ntie` command binds the two
//! sockets into one logical session. Until the tie has succeeded the
//! channel refuses to report itself ready.
//!
//! After the handshake the server pushes update records of the form
//! `<id> <type> [info...]`, one per CRLF-terminated line. Polling is
//! bounded by a caller-supplied timeout and buffers partial lines across
//! calls.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time;

use crate::channel::enable_keepalive;
use crate::error::{Error, Result};
use crate::proto;

/// Length of the session key the server issues on connect.
const SESSION_KEY_LEN: usize = 40;

const READ_CHUNK: usize = 4096;

/// One update record pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The event the update concerns.
    pub id: u32,
    /// Update type: `state`, `attr`, `history`, `log`, `scavenged`, ...
    pub kind: String,
    /// Remainder of the line; may be empty.
    pub info: String,
}

/// The notification channel of a session.
#[derive(Debug)]
pub struct NotificationChannel {
    stream: Option<TcpStream>,
    buf: Vec<u8>,
    tied: bool,
}

impl NotificationChannel {
    /// Connect and read the session key.
    ///
    /// The returned channel is not ready until the key has been passed to
    /// the request channel's `ntie` and [`NotificationChannel::mark_tied`]
    /// has been called.
    pub async fn connect(server: &str, port: u16, timeout: Duration) -> Result<(Self, String)> {
        let connect = TcpStream::connect((server, port));
        let stream = time::timeout(timeout, connect)
            .await
            .map_err(|_| Error::Timeout {
                command: "<notification connect>".to_string(),
                partial: String::new(),
            })??;
        enable_keepalive(&stream)?;

        let mut channel = Self {
            stream: Some(stream),
            buf: Vec::new(),
            tied: false,
        };
        let line = {
            let stream = channel.stream.as_mut().ok_or(Error::NotConnected)?;
            proto::read_line(stream, &mut channel.buf, timeout, "<session key>").await?
        };
        let key = line.split_whitespace().next().unwrap_or_default().to_string();
        if key.len() != SESSION_KEY_LEN {
            return Err(Error::Protocol(format!(
                "expected a {SESSION_KEY_LEN}-character session key, got {line:?}"
            )));
        }
        log::debug!("notification channel connected to {server}:{port}");
        Ok((channel, key))
    }

    /// Record that `ntie` succeeded; the channel may now be polled.
    pub fn mark_tied(&mut self) {
        self.tied = true;
    }

    /// True once the channel is tied to an authenticated session.
    pub fn is_ready(&self) -> bool {
        self.tied && self.stream.is_some()
    }

    /// Close the socket. Safe to call at any time.
    pub fn close(&mut self) {
        self.stream = None;
        self.buf.clear();
        self.tied = false;
    }

    /// Receive at most one update record, waiting up to `wait`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Partial lines stay
    /// buffered for the next call. A peer close surfaces as
    /// [`Error::LostConnection`]; an unparseable record as
    /// [`Error::Protocol`].
    pub async fn poll(&mut self, wait: Duration) -> Result<Option<Notification>> {
        if !self.tied {
            return Err(Error::NotConnected);
        }
        if proto::find_crlf(&self.buf).is_none() {
            // Nothing complete buffered: do a single bounded receive.
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            let mut chunk = [0u8; READ_CHUNK];
            match time::timeout(wait, stream.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    self.close();
                    return Err(Error::LostConnection(
                        "notification channel closed by server".to_string(),
                    ));
                }
                Ok(Ok(count)) => self.buf.extend_from_slice(&chunk[..count]),
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(None);
                }
                Ok(Err(err)) => {
                    self.close();
                    return Err(Error::from_io(err));
                }
            }
        }
        match proto::take_line(&mut self.buf) {
            Some(line) => parse_record(&line).map(Some),
            None => Ok(None),
        }
    }
}

/// Parse one pushed line into a [`Notification`].
fn parse_record(line: &str) -> Result<Notification> {
    let mut parts = line.splitn(3, ' ');
    let id = parts
        .next()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("unparseable notification: {line:?}")))?;
    let kind = parts
        .next()
        .ok_or_else(|| Error::Protocol(format!("notification without type: {line:?}")))?
        .to_string();
    let info = parts.next().unwrap_or_default().to_string();
    Ok(Notification { id, kind, info })
}
