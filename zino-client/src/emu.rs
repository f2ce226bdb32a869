// Scripted Zino server emulator for tests

//! In-process server emulator used by channel, manager and update tests.
//!
//! A [`ScriptedServer`] accepts one request-channel client, sends the
//! canned greeting and then answers each received line with the reply of
//! the first script entry whose key is a prefix of the line. A
//! [`NotifyServer`] plays the notification side: it pushes the session key
//! followed by a fixed set of update records.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::manager::EventManager;
use crate::proto::find_crlf;

/// Challenge the emulator embeds in its greeting.
pub(crate) const CHALLENGE: &str = "6d158bba6a21a2806c1f01e09f60a0f6c7d3b1df";

/// Session key the notification emulator hands out.
pub(crate) const NOTIFY_KEY: &str = "2d25cd30e550d362d1bf5bcd77054626885f387a";

/// Script entries: (line prefix, canned reply bytes).
pub(crate) type Script = Vec<(String, String)>;

fn entry(key: &str, reply: &str) -> (String, String) {
    (key.to_string(), reply.to_string())
}

/// The canned exchanges shared by most tests.
///
/// Event data mirrors the dumps the real server produces: a BGP case
/// (32802), an alarm case (34978) and a portstate case (40959).
pub(crate) fn default_script() -> Script {
    vec![
        entry("user ", "200 ok\r\n"),
        entry(
            "caseids",
            "304 list of active cases follows, terminated with '.'\r\n\
             32802\r\n34978\r\nnot-a-caseid\r\n.\r\n",
        ),
        entry(
            "getattrs 32802",
            "303 simple attributes follow, terminated with '.'\r\n\
             state: working\r\n\
             router: uninett-gsw2\r\n\
             type: bgp\r\n\
             opened: 1524465142\r\n\
             id: 32802\r\n\
             updated: 1533116751\r\n\
             priority: 100\r\n\
             polladdr: 127.0.0.1\r\n\
             remote-addr: 2001:700:0:4515::5:11\r\n\
             remote-AS: 64666\r\n\
             peer-uptime: 0\r\n\
             lastevent: peer is admin turned off\r\n\
             bgpAS: halted\r\n\
             bgpOS: down\r\n\
             .\r\n",
        ),
        entry(
            "getattrs 34978",
            "303 simple attributes follow, terminated with '.'\r\n\
             state: working\r\n\
             router: bergen-sw1\r\n\
             type: alarm\r\n\
             opened: 1529156235\r\n\
             id: 34978\r\n\
             updated: 1529156235\r\n\
             priority: 100\r\n\
             polladdr: 127.0.0.1\r\n\
             alarm-count: 1\r\n\
             alarm-type: yellow\r\n\
             lastevent: alarms went from 0 to 1\r\n\
             .\r\n",
        ),
        entry(
            "getattrs 40959",
            "303 simple attributes follow, terminated with '.'\r\n\
             state: open\r\n\
             router: uninett-tor-sw4\r\n\
             type: portstate\r\n\
             opened: 1677714463\r\n\
             id: 40959\r\n\
             updated: 1686584585\r\n\
             lasttrans: 1686584585\r\n\
             priority: 100\r\n\
             port: ae24\r\n\
             flaps: 1\r\n\
             ac-down: 352952\r\n\
             portstate: up\r\n\
             ifindex: 654\r\n\
             descr: local MC-LAG, tor-sw4.har-04.p.uninett.no\r\n\
             .\r\n",
        ),
        entry("getattrs ", "500 No such case\r\n"),
        entry(
            "gethist ",
            "301 history follows, terminated with '.'\r\n\
             1678273372 state change embryonic -> open (monitor)\r\n\
             1678276375 runarb\r\n\
             \x20Testmelding ifra pyRitz\r\n\
             \x20\r\n\
             .\r\n",
        ),
        entry(
            "getlog ",
            "300 log follows, terminated with '.'\r\n\
             1683159556 some log message\r\n\
             1683218672 some other log message\r\n\
             .\r\n",
        ),
        entry(
            "addhist ",
            "302 please provide new history entry, terminate with '.'\r\n",
        ),
        entry("setstate 40960 open", "500 Cannot reopen closed event 40960\r\n"),
        entry("setstate ", "200 ok\r\n"),
        entry("clearflap ", "200 ok\r\n"),
        entry("pollrtr ", "200 ok\r\n"),
        entry("pollintf ", "200 ok\r\n"),
        entry("ntie ", "200 ok\r\n"),
        entry(
            "pm addlog ",
            "302 please provide new PM log entry, terminate with '.'\r\n",
        ),
        entry("pm add ", "200 PM id 7 scheduled\r\n"),
        entry(
            "pm list",
            "300 PM event ids follows, terminated with '.'\r\n5\r\n7\r\n.\r\n",
        ),
        entry("pm cancel ", "200 ok\r\n"),
        entry(
            "pm details 7",
            "200 7 1754000000 1754003600 device exact oslo-gw1\r\n",
        ),
        entry(
            "pm matching 7",
            "300 maintenance matches follows, terminated with '.'\r\n\
             device oslo-gw1\r\n\
             portstate oslo-gw1 654 ae24 uplink to somewhere far\r\n\
             .\r\n",
        ),
        entry(
            "pm log ",
            "300 log follows, terminated with '.'\r\n\
             1754000100 maintenance window confirmed\r\n\
             .\r\n",
        ),
        entry(".", "200 ok\r\n"),
    ]
}

/// One-shot scripted request-channel server on an ephemeral port.
pub(crate) struct ScriptedServer {
    pub(crate) addr: SocketAddr,
}

impl ScriptedServer {
    pub(crate) async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let greeting = format!("200 {CHALLENGE} Hello, there\r\n");
            if sock.write_all(greeting.as_bytes()).await.is_err() {
                return;
            }
            let mut buf: Vec<u8> = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                while let Some(end) = find_crlf(&buf) {
                    let line_bytes: Vec<u8> = buf.drain(..end + 2).collect();
                    let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 2])
                        .to_string();
                    let reply = script
                        .iter()
                        .find(|(key, _)| line.starts_with(key.as_str()))
                        .map(|(_, reply)| reply.clone());
                    if let Some(reply) = reply {
                        if sock.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
                match sock.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(count) => buf.extend_from_slice(&chunk[..count]),
                }
            }
        });
        Self { addr }
    }

    /// A config pointing a client at this emulator.
    pub(crate) fn config(&self) -> Config {
        let mut config = Config::new("127.0.0.1");
        config.port = self.addr.port();
        config.timeout = 2;
        config.set_userauth("testuser", "test");
        config
    }
}

/// Scripted notification-channel server on an ephemeral port.
///
/// Sends the session key, then every push record, then holds the socket
/// open so polling sees silence rather than EOF.
pub(crate) struct NotifyServer {
    pub(crate) addr: SocketAddr,
}

impl NotifyServer {
    pub(crate) async fn start(pushes: Vec<String>) -> Self {
        Self::start_with_key(NOTIFY_KEY, pushes).await
    }

    pub(crate) async fn start_with_key(key: &'static str, pushes: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut wire = format!("{key}\r\n");
            for push in &pushes {
                wire.push_str(push);
                wire.push_str("\r\n");
            }
            if sock.write_all(wire.as_bytes()).await.is_err() {
                return;
            }
            // Block on a read that never completes instead of closing.
            let mut sink = [0u8; 16];
            let _ = sock.read(&mut sink).await;
        });
        Self { addr }
    }
}

/// Manager connected to both emulators, running the default script.
pub(crate) async fn full_manager(pushes: Vec<String>, autoremove: bool) -> EventManager {
    let server = ScriptedServer::start(default_script()).await;
    let notify = NotifyServer::start(pushes).await;
    let mut config = server.config();
    config.notify_port = notify.addr.port();
    config.autoremove = autoremove;
    let mut manager = EventManager::configure(config);
    manager.connect().await.unwrap();
    manager
}
