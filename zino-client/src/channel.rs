// Request channel: connect, authenticate, issue commands

//! The authenticated request channel
//!
//! One TCP connection to the server's request port (default 8001) carrying
//! a strictly serial conversation: a command is written, then the reply is
//! read to completion before the next command may be issued. The greeting
//! carries a 40-hex challenge; authentication sends
//! `user <name> <sha1(challenge SP password)>  -` (the double space marks a
//! trailing empty optional argument and must not be normalised away).

use std::time::Duration;

use sha1::{Digest, Sha1};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::AdmState;
use crate::proto::{self, Response, CODE_CONTINUE, CODE_OK};

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// Keepalive knobs for long-lived operator sessions; without these a TUI
// sitting on a wedged network path never notices the partition.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
#[cfg(not(windows))]
const KEEPALIVE_PROBES: u32 = 5;

/// Enable TCP keepalive on a connected socket.
///
/// The probe-count knob is platform-dispatched; socket2 exposes it where
/// the OS does.
pub(crate) fn enable_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    #[cfg(not(windows))]
    let keepalive = keepalive.with_retries(KEEPALIVE_PROBES);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Compute the authentication token for a challenge/password pair.
///
/// `SHA1("<challenge> <password>")` rendered as 40 lowercase hex digits.
pub fn auth_token(challenge: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(challenge.as_bytes());
    hasher.update(b" ");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lifecycle of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No socket yet.
    Disconnected,
    /// Greeting read, challenge stored, not yet authenticated.
    Connected,
    /// Authentication accepted; commands may be issued.
    Authenticated,
    /// Closed by [`Channel::close`]; a new channel must be built.
    Closed,
}

/// The request channel to a Zino server.
///
/// Operations take `&mut self`: one outstanding request at a time, callers
/// must not interleave.
#[derive(Debug)]
pub struct Channel {
    server: String,
    port: u16,
    timeout: Duration,
    connect_timeout: Duration,
    username: Option<String>,
    password: Option<String>,
    stream: Option<TcpStream>,
    buf: Vec<u8>,
    state: ChannelState,
    challenge: Option<String>,
}

impl Channel {
    /// Build an unconnected channel from connection parameters.
    pub fn new(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            port: config.port,
            timeout: Duration::from_secs(config.timeout),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            username: config.username.clone(),
            password: config.password.clone(),
            stream: None,
            buf: Vec::new(),
            state: ChannelState::Disconnected,
            challenge: None,
        }
    }

    /// Override the TCP connect timeout (default 10 s).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// True once the greeting has been read.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ChannelState::Connected | ChannelState::Authenticated
        )
    }

    /// True once the server accepted our credentials.
    pub fn is_authenticated(&self) -> bool {
        self.state == ChannelState::Authenticated
    }

    /// The challenge from the server greeting, once connected.
    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }

    /// Connect, read the greeting, and authenticate if credentials are set.
    pub async fn connect(&mut self) -> Result<()> {
        let connect = TcpStream::connect((self.server.as_str(), self.port));
        let stream = time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| Error::Timeout {
                command: "connect".to_string(),
                partial: String::new(),
            })??;
        enable_keepalive(&stream)?;
        self.stream = Some(stream);
        self.buf.clear();
        self.state = ChannelState::Connected;

        let greeting = self.read_reply("<greeting>").await?;
        if !greeting.is_ok() {
            self.state = ChannelState::Disconnected;
            self.stream = None;
            return Err(Error::Protocol(format!(
                "unexpected greeting: {} {}",
                greeting.code, greeting.text
            )));
        }
        let challenge = greeting
            .text
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        log::debug!("connected to {}:{}", self.server, self.port);
        self.challenge = Some(challenge);

        if self.username.is_some() && self.password.is_some() {
            self.authenticate(None, None).await?;
        }
        Ok(())
    }

    /// Authenticate the session.
    ///
    /// Explicit credentials override the ones given at configure time.
    pub async fn authenticate(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let username = username
            .map(str::to_string)
            .or_else(|| self.username.clone())
            .ok_or_else(|| Error::Authentication("no username configured".to_string()))?;
        let password = password
            .map(str::to_string)
            .or_else(|| self.password.clone())
            .ok_or_else(|| Error::Authentication("no password configured".to_string()))?;
        let challenge = self
            .challenge
            .clone()
            .ok_or_else(|| Error::Authentication("no challenge from server".to_string()))?;

        let token = auth_token(&challenge, &password);
        // Literal double space: trailing empty optional argument.
        let reply = self.exchange(&format!("user {username} {token}  -")).await?;
        if reply.is_ok() {
            self.state = ChannelState::Authenticated;
            log::info!("authenticated as {username}");
            Ok(())
        } else {
            Err(Error::Authentication(format!(
                "server said: {} {}",
                reply.code, reply.text
            )))
        }
    }

    /// Close the socket. Safe to call in any state.
    pub fn close(&mut self) {
        self.stream = None;
        self.buf.clear();
        self.challenge = None;
        self.state = ChannelState::Closed;
    }

    pub(crate) fn require_auth(&self) -> Result<()> {
        match self.state {
            ChannelState::Authenticated => Ok(()),
            ChannelState::Connected => Err(Error::NotAuthenticated),
            _ => Err(Error::NotConnected),
        }
    }

    /// Send one command and read its full reply.
    pub(crate) async fn exchange(&mut self, command: &str) -> Result<Response> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        proto::write_command(stream, command).await?;
        proto::read_response(stream, &mut self.buf, self.timeout, command).await
    }

    /// Read a reply without sending anything (greeting only).
    async fn read_reply(&mut self, label: &str) -> Result<Response> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        proto::read_response(stream, &mut self.buf, self.timeout, label).await
    }

    /// Expect a 200 reply, translating anything else into `Protocol`.
    async fn expect_ok(&mut self, command: &str) -> Result<()> {
        let reply = self.exchange(command).await?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{command:?} failed: {} {}",
                reply.code, reply.text
            )))
        }
    }

    /// List all live case ids. Non-digit lines in the reply are skipped.
    pub async fn case_ids(&mut self) -> Result<Vec<u32>> {
        self.require_auth()?;
        let reply = self.exchange("caseids").await?;
        if reply.is_error() {
            return Err(Error::Protocol(format!(
                "caseids failed: {} {}",
                reply.code, reply.text
            )));
        }
        Ok(reply
            .lines
            .iter()
            .filter_map(|line| line.parse().ok())
            .collect())
    }

    /// Fetch the raw `attr: value` dump of one case.
    ///
    /// A 5xx here means the case is gone on the server.
    pub async fn raw_attributes(&mut self, id: u32) -> Result<Vec<String>> {
        self.require_auth()?;
        let reply = self.exchange(&format!("getattrs {id}")).await?;
        if reply.is_error() {
            return Err(Error::Protocol(format!(
                "getattrs {id} failed: {} {}",
                reply.code, reply.text
            )));
        }
        Ok(reply.lines)
    }

    /// Fetch the raw history block of one case.
    pub async fn raw_history(&mut self, id: u32) -> Result<Vec<String>> {
        self.require_auth()?;
        let reply = self.exchange(&format!("gethist {id}")).await?;
        if reply.is_error() {
            return Err(Error::Protocol(format!(
                "gethist {id} failed: {} {}",
                reply.code, reply.text
            )));
        }
        Ok(reply.lines)
    }

    /// Fetch the raw log block of one case.
    pub async fn raw_log(&mut self, id: u32) -> Result<Vec<String>> {
        self.require_auth()?;
        let reply = self.exchange(&format!("getlog {id}")).await?;
        if reply.is_error() {
            return Err(Error::Protocol(format!(
                "getlog {id} failed: {} {}",
                reply.code, reply.text
            )));
        }
        Ok(reply.lines)
    }

    /// Append a history entry to a case.
    ///
    /// The server answers `addhist <id>  -` with 302, then expects the
    /// message terminated by a lone dot.
    pub async fn add_history(&mut self, id: u32, message: &str) -> Result<()> {
        self.require_auth()?;
        let reply = self.exchange(&format!("addhist {id}  -")).await?;
        if reply.code != CODE_CONTINUE {
            return Err(Error::Protocol(format!(
                "addhist {id} not accepted: {} {}",
                reply.code, reply.text
            )));
        }
        self.send_continuation(message).await
    }

    /// Send a dot-terminated continuation payload after a 302.
    pub(crate) async fn send_continuation(&mut self, message: &str) -> Result<()> {
        let message = message.replace('\n', proto::DELIMITER);
        let reply = self.exchange(&format!("{message}\r\n\r\n.")).await?;
        if reply.code == CODE_OK {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "continuation payload rejected: {} {}",
                reply.code, reply.text
            )))
        }
    }

    /// Change the administrative state of a case.
    ///
    /// Reopening a closed case is refused by the server and surfaces as
    /// [`Error::EventClosed`].
    pub async fn set_state(&mut self, id: u32, state: AdmState) -> Result<()> {
        self.require_auth()?;
        let reply = self
            .exchange(&format!("setstate {id} {}", state.as_wire()))
            .await?;
        if reply.is_ok() {
            return Ok(());
        }
        if reply.is_error() && reply.text.contains("reopen") {
            return Err(Error::EventClosed(id));
        }
        Err(Error::Protocol(format!(
            "setstate {id} failed: {} {}",
            reply.code, reply.text
        )))
    }

    /// Clear flapping state on an interface.
    pub async fn clear_flapping(&mut self, router: &str, if_index: u32) -> Result<()> {
        self.require_auth()?;
        self.expect_ok(&format!("clearflap {router} {if_index}")).await
    }

    /// Ask the server to repoll a router immediately.
    pub async fn poll_router(&mut self, router: &str) -> Result<()> {
        self.require_auth()?;
        self.expect_ok(&format!("pollrtr {router}")).await
    }

    /// Ask the server to repoll one interface immediately.
    pub async fn poll_interface(&mut self, router: &str, if_index: u32) -> Result<()> {
        self.require_auth()?;
        self.expect_ok(&format!("pollintf {router} {if_index}")).await
    }

    /// Tie a notification channel to this session by its server-issued key.
    pub async fn ntie(&mut self, key: &str) -> Result<()> {
        self.require_auth()?;
        self.expect_ok(&format!("ntie {key}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::{self, ScriptedServer};

    #[test]
    fn test_auth_token_vector() {
        assert_eq!(
            auth_token("ababp", "fillifjonka"),
            "84f9c302c392488f3f04f69f4c87994e10511892"
        );
    }

    #[test]
    fn test_auth_token_is_lowercase_hex() {
        let token = auth_token("deadbeef", "secret");
        assert_eq!(token.len(), 40);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(token, token.to_lowercase());
    }

    #[tokio::test]
    async fn test_connect_reads_challenge_and_authenticates() {
        let server = ScriptedServer::start(emu::default_script()).await;
        let mut channel = Channel::new(&server.config());
        channel.connect().await.unwrap();
        assert!(channel.is_authenticated());
        assert_eq!(channel.challenge(), Some(emu::CHALLENGE));
    }

    #[tokio::test]
    async fn test_connect_without_credentials_stays_unauthenticated() {
        let server = ScriptedServer::start(emu::default_script()).await;
        let mut config = server.config();
        config.username = None;
        config.password = None;
        let mut channel = Channel::new(&config);
        channel.connect().await.unwrap();
        assert!(channel.is_connected());
        assert!(!channel.is_authenticated());

        // Commands are refused until authenticate() succeeds.
        let err = channel.case_ids().await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));

        channel
            .authenticate(Some("testuser"), Some("test"))
            .await
            .unwrap();
        assert!(channel.is_authenticated());
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let mut script = emu::default_script();
        script.insert(
            0,
            ("user baduser".to_string(), "500 Authentication failure\r\n".to_string()),
        );
        let server = ScriptedServer::start(script).await;
        let mut config = server.config();
        config.set_userauth("baduser", "wrong");
        let mut channel = Channel::new(&config);
        let err = channel.connect().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let mut channel = Channel::new(&Config::new("127.0.0.1"));
        let err = channel.case_ids().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        let err = channel.authenticate(Some("u"), Some("p")).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_case_ids_skips_non_digit_lines() {
        let server = ScriptedServer::start(emu::default_script()).await;
        let mut channel = Channel::new(&server.config());
        channel.connect().await.unwrap();
        // The canned reply contains a stray "header" line to be skipped.
        assert_eq!(channel.case_ids().await.unwrap(), vec![32802, 34978]);
    }

    #[tokio::test]
    async fn test_getattrs_gone_case_is_protocol_error() {
        let server = ScriptedServer::start(emu::default_script()).await;
        let mut channel = Channel::new(&server.config());
        channel.connect().await.unwrap();
        let err = channel.raw_attributes(999).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_add_history_continuation_flow() {
        let server = ScriptedServer::start(emu::default_script()).await;
        let mut channel = Channel::new(&server.config());
        channel.connect().await.unwrap();
        channel
            .add_history(40959, "Testmelding ifra pyRitz")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_state_reopen_closed_event() {
        let server = ScriptedServer::start(emu::default_script()).await;
        let mut channel = Channel::new(&server.config());
        channel.connect().await.unwrap();
        let err = channel.set_state(40960, AdmState::Open).await.unwrap_err();
        assert!(matches!(err, Error::EventClosed(40960)));
    }

    #[tokio::test]
    async fn test_poll_and_clearflap() {
        let server = ScriptedServer::start(emu::default_script()).await;
        let mut channel = Channel::new(&server.config());
        channel.connect().await.unwrap();
        channel.poll_router("uninett-gsw2").await.unwrap();
        channel.poll_interface("uninett-tor-sw4", 654).await.unwrap();
        channel.clear_flapping("uninett-tor-sw4", 654).await.unwrap();
    }
}
