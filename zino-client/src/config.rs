// Connection configuration parsing

//! Connection configuration
//!
//! Two on-disk formats are supported. The structured format is TOML with a
//! `[connections.<name>]` table per server and a shared `[options]` table:
//!
//! ```toml
//! [connections.default]
//! server = "zino.example.org"
//! port = 8001
//! username = "operator"
//! password = "secret"
//!
//! [options]
//! timeout = 30
//! autoremove = false
//! ```
//!
//! The legacy format is the tcl-style `.ritz.tcl` file used by older
//! tooling, consisting of `set Key Value` lines with an optional
//! `(section)` suffix on the key:
//!
//! ```text
//! set Server zino.example.org
//! set User operator
//! set Secret secret
//! set _Server(dev-server) zino-dev.example.org
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Default request channel port.
pub const DEFAULT_PORT: u16 = 8001;
/// Default notification channel port.
pub const DEFAULT_NOTIFY_PORT: u16 = 8002;
/// Default socket read timeout in seconds.
pub const DEFAULT_TIMEOUT: u64 = 30;

/// Name of the connection section used when none is given.
pub const DEFAULT_SECTION: &str = "default";

/// Resolved connection parameters for one Zino server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname or IP address.
    pub server: String,
    /// Request channel TCP port.
    pub port: u16,
    /// Notification channel TCP port.
    pub notify_port: u16,
    /// Username for authentication, if known.
    pub username: Option<String>,
    /// Password for authentication, if known.
    pub password: Option<String>,
    /// Socket read timeout in seconds.
    pub timeout: u64,
    /// Drop events from the local map when they close.
    pub autoremove: bool,
}

impl Config {
    /// Build a config for `server` with every option at its default.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_PORT,
            notify_port: DEFAULT_NOTIFY_PORT,
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            autoremove: false,
        }
    }

    /// Load a config file, choosing the format from the file extension.
    ///
    /// `.toml` files are parsed as TOML; everything else is treated as the
    /// legacy tcl format.
    pub fn load(path: impl AsRef<Path>, section: &str) -> Result<Self> {
        let path = path.as_ref();
        if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml_file(path, section)
        } else {
            Self::from_tcl_file(path, section)
        }
    }

    /// Load a `[connections.<section>]` entry from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>, section: &str) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&text, section)
    }

    /// Parse TOML text, selecting one connection section.
    pub fn from_toml_str(text: &str, section: &str) -> Result<Self> {
        let raw: TomlFile =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        let connection = raw
            .connections
            .get(section)
            .ok_or_else(|| Error::Config(format!("no connection named {section:?}")))?;
        Ok(Self {
            server: connection.server.clone(),
            port: connection.port,
            notify_port: raw.options.notify_port,
            username: connection.username.clone(),
            password: connection.password.clone(),
            timeout: raw.options.timeout,
            autoremove: raw.options.autoremove,
        })
    }

    /// Load a section from a legacy `.ritz.tcl` file.
    pub fn from_tcl_file(path: impl AsRef<Path>, section: &str) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_tcl_str(&text, section)
    }

    /// Parse legacy tcl text, selecting one connection section.
    ///
    /// Keys outside the connection set (`Server`, `Port`, `User`, `Secret`)
    /// are display options for other tools and are ignored here. Section
    /// names are normalised the same way the keys are: lower-cased with
    /// `-` replaced by `_`.
    pub fn from_tcl_str(text: &str, section: &str) -> Result<Self> {
        let sections = parse_tcl(text);
        let wanted = normalize_tcl_name(section);
        let entry = sections
            .get(&wanted)
            .ok_or_else(|| Error::Config(format!("no connection named {section:?}")))?;

        let server = entry
            .get("server")
            .cloned()
            .ok_or_else(|| Error::Config(format!("connection {section:?} has no server")))?;
        let port = match entry.get("port") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("bad port {raw:?}")))?,
            None => DEFAULT_PORT,
        };
        let mut config = Config::new(server);
        config.port = port;
        config.username = entry.get("username").cloned();
        config.password = entry.get("password").cloned();
        Ok(config)
    }

    /// Override the credentials after loading.
    pub fn set_userauth(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.username = Some(username.into());
        self.password = Some(password.into());
    }
}

/// TOML document shape: connection tables plus shared options.
#[derive(Debug, Deserialize)]
struct TomlFile {
    connections: BTreeMap<String, TomlConnection>,
    #[serde(default)]
    options: TomlOptions,
}

#[derive(Debug, Deserialize)]
struct TomlConnection {
    server: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlOptions {
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default)]
    autoremove: bool,
    #[serde(default = "default_notify_port")]
    notify_port: u16,
}

impl Default for TomlOptions {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            autoremove: false,
            notify_port: default_notify_port(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_notify_port() -> u16 {
    DEFAULT_NOTIFY_PORT
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

/// Map legacy key/section spellings onto the TOML vocabulary.
fn normalize_tcl_name(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

/// Parse the tcl `set` lines into section -> key -> value maps.
fn parse_tcl(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    // `set Key Value` or `set _Key(section) Value`; sectionless lines
    // belong to the "default" section.
    let line_re = Regex::new(r"^\s?set _?([a-zA-Z0-9]+)(?:\((.*)\))? (.*)$")
        .expect("static regex");
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for line in text.lines() {
        let Some(caps) = line_re.captures(line.trim_end()) else {
            continue;
        };
        let key = match &caps[1] {
            "User" => "username".to_string(),
            "Secret" => "password".to_string(),
            other => normalize_tcl_name(other),
        };
        let section = caps
            .get(2)
            .map(|m| normalize_tcl_name(m.as_str()))
            .unwrap_or_else(|| DEFAULT_SECTION.to_string());
        let value = caps[3].trim().to_string();
        sections.entry(section).or_default().insert(key, value);
    }
    sections
}
