// Preventive-maintenance sub-protocol

//! Preventive maintenance windows
//!
//! The `pm` command family schedules, inspects and cancels maintenance
//! windows during which alarms for matching devices or interfaces are
//! suppressed. Windows match either a device (by exact name, wildcard
//! string or regexp) or a set of interfaces (by name regexp on one device,
//! or by description regexp across all devices).
//!
//! Scheduling timestamps go over the wire as local-time epoch seconds;
//! that is what the deployed servers expect and it is kept that way.

use chrono::{DateTime, Local, TimeZone};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::history;
use crate::event::HistoryEntry;
use crate::proto::CODE_CONTINUE;

/// What a maintenance window matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmType {
    /// Whole devices.
    Device,
    /// Individual interfaces.
    PortState,
}

impl PmType {
    /// Parse a wire string.
    pub fn from_wire(value: &str) -> Option<PmType> {
        match value {
            "device" => Some(PmType::Device),
            "portstate" => Some(PmType::PortState),
            _ => None,
        }
    }

    /// The string the wire protocol uses for this type.
    pub fn as_wire(&self) -> &'static str {
        match self {
            PmType::Device => "device",
            PmType::PortState => "portstate",
        }
    }
}

/// How the target expression of a maintenance window is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmMatchKind {
    /// Exact match on one device name.
    Exact,
    /// Wildcard string match (`?` one character, `*` many).
    Str,
    /// Regular expression match.
    Regexp,
    /// Interface-name regexp scoped to one device.
    IntfRegexp,
}

impl PmMatchKind {
    /// Parse a wire string.
    pub fn from_wire(value: &str) -> Option<PmMatchKind> {
        match value {
            "exact" => Some(PmMatchKind::Exact),
            "str" => Some(PmMatchKind::Str),
            "regexp" => Some(PmMatchKind::Regexp),
            "intf-regexp" => Some(PmMatchKind::IntfRegexp),
            _ => None,
        }
    }

    /// The string the wire protocol uses for this kind.
    pub fn as_wire(&self) -> &'static str {
        match self {
            PmMatchKind::Exact => "exact",
            PmMatchKind::Str => "str",
            PmMatchKind::Regexp => "regexp",
            PmMatchKind::IntfRegexp => "intf-regexp",
        }
    }
}

/// Details of one scheduled maintenance window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmDetails {
    /// Server-assigned window id.
    pub id: u32,
    /// Window start.
    pub from: DateTime<Local>,
    /// Window end.
    pub to: DateTime<Local>,
    /// Device- or interface-level window.
    pub pm_type: PmType,
    /// How the target expression is matched.
    pub match_kind: PmMatchKind,
    /// The target expression.
    pub device: String,
}

/// Check the window bounds before anything goes over the wire.
fn validate_window(from: DateTime<Local>, to: DateTime<Local>) -> Result<()> {
    if from >= to {
        return Err(Error::Validation(
            "maintenance window ends before it starts".to_string(),
        ));
    }
    Ok(())
}

/// Extract the window id from a `pm add` reply text like `PM id 7 scheduled`.
fn parse_pm_id(text: &str) -> Result<u32> {
    text.split_whitespace()
        .nth(2)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("no PM id in reply {text:?}")))
}

/// Promote local-time epoch seconds from a reply into a local instant.
fn local_timestamp(value: &str) -> Result<DateTime<Local>> {
    let seconds: i64 = value
        .parse()
        .map_err(|_| Error::Protocol(format!("bad PM timestamp {value:?}")))?;
    Local
        .timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::Protocol(format!("PM timestamp out of range: {value:?}")))
}

impl Channel {
    async fn pm_add(&mut self, command: String) -> Result<u32> {
        self.require_auth()?;
        let reply = self.exchange(&command).await?;
        if !reply.is_ok() {
            return Err(Error::Protocol(format!(
                "{command:?} failed: {} {}",
                reply.code, reply.text
            )));
        }
        parse_pm_id(&reply.text)
    }

    /// Schedule a device-level maintenance window.
    ///
    /// `kind` must be one of the device matchers (`exact`, `str`,
    /// `regexp`).
    pub async fn pm_add_device(
        &mut self,
        from: DateTime<Local>,
        to: DateTime<Local>,
        device: &str,
        kind: PmMatchKind,
    ) -> Result<u32> {
        if kind == PmMatchKind::IntfRegexp {
            return Err(Error::Validation(
                "device windows take exact, str or regexp matchers".to_string(),
            ));
        }
        validate_window(from, to)?;
        self.pm_add(format!(
            "pm add {} {} device {} {device}",
            from.timestamp(),
            to.timestamp(),
            kind.as_wire()
        ))
        .await
    }

    /// Schedule an interface window by interface-name regexp on one device.
    pub async fn pm_add_interface_byname(
        &mut self,
        from: DateTime<Local>,
        to: DateTime<Local>,
        device: &str,
        interface: &str,
    ) -> Result<u32> {
        validate_window(from, to)?;
        self.pm_add(format!(
            "pm add {} {} portstate intf-regexp {device} {interface}",
            from.timestamp(),
            to.timestamp()
        ))
        .await
    }

    /// Alias for [`Channel::pm_add_interface_byname`].
    pub async fn pm_add_interface(
        &mut self,
        from: DateTime<Local>,
        to: DateTime<Local>,
        device: &str,
        interface: &str,
    ) -> Result<u32> {
        self.pm_add_interface_byname(from, to, device, interface).await
    }

    /// Schedule an interface window by description regexp across devices.
    pub async fn pm_add_interface_bydescr(
        &mut self,
        from: DateTime<Local>,
        to: DateTime<Local>,
        description: &str,
    ) -> Result<u32> {
        validate_window(from, to)?;
        self.pm_add(format!(
            "pm add {} {} portstate regexp {description}",
            from.timestamp(),
            to.timestamp()
        ))
        .await
    }

    /// List ids of all scheduled maintenance windows.
    pub async fn pm_list(&mut self) -> Result<Vec<u32>> {
        self.require_auth()?;
        let reply = self.exchange("pm list").await?;
        if reply.is_error() {
            return Err(Error::Protocol(format!(
                "pm list failed: {} {}",
                reply.code, reply.text
            )));
        }
        Ok(reply
            .lines
            .iter()
            .filter_map(|line| line.parse().ok())
            .collect())
    }

    /// Cancel a maintenance window.
    pub async fn pm_cancel(&mut self, id: u32) -> Result<()> {
        self.require_auth()?;
        let reply = self.exchange(&format!("pm cancel {id}")).await?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "pm cancel {id} failed: {} {}",
                reply.code, reply.text
            )))
        }
    }

    /// Fetch the details of a maintenance window.
    pub async fn pm_details(&mut self, id: u32) -> Result<PmDetails> {
        self.require_auth()?;
        let reply = self.exchange(&format!("pm details {id}")).await?;
        if !reply.is_ok() {
            return Err(Error::Protocol(format!(
                "pm details {id} failed: {} {}",
                reply.code, reply.text
            )));
        }
        // Six whitespace-separated fields; the device expression may itself
        // contain spaces and takes the remainder.
        let fields: Vec<&str> = reply.text.splitn(6, ' ').collect();
        if fields.len() != 6 {
            return Err(Error::Protocol(format!(
                "malformed pm details reply: {:?}",
                reply.text
            )));
        }
        Ok(PmDetails {
            id: fields[0]
                .parse()
                .map_err(|_| Error::Protocol(format!("bad PM id {:?}", fields[0])))?,
            from: local_timestamp(fields[1])?,
            to: local_timestamp(fields[2])?,
            pm_type: PmType::from_wire(fields[3])
                .ok_or_else(|| Error::Protocol(format!("unknown PM type {:?}", fields[3])))?,
            match_kind: PmMatchKind::from_wire(fields[4])
                .ok_or_else(|| Error::Protocol(format!("unknown PM matcher {:?}", fields[4])))?,
            device: fields[5].to_string(),
        })
    }

    /// List devices and ports matched by a maintenance window.
    ///
    /// Each row drops the leading category token; the caller interprets
    /// the rest as `[device]` or `[device, ifindex, ifname, ifdescr]`.
    pub async fn pm_matching(&mut self, id: u32) -> Result<Vec<Vec<String>>> {
        self.require_auth()?;
        let reply = self.exchange(&format!("pm matching {id}")).await?;
        if reply.is_error() {
            return Err(Error::Protocol(format!(
                "pm matching {id} failed: {} {}",
                reply.code, reply.text
            )));
        }
        Ok(reply
            .lines
            .iter()
            .map(|line| line.splitn(6, ' ').skip(1).map(str::to_string).collect())
            .collect())
    }

    /// Append a log message to a maintenance window.
    pub async fn pm_add_log(&mut self, id: u32, message: &str) -> Result<()> {
        self.require_auth()?;
        let reply = self.exchange(&format!("pm addlog {id}  -")).await?;
        if reply.code != CODE_CONTINUE {
            return Err(Error::Protocol(format!(
                "pm addlog {id} not accepted: {} {}",
                reply.code, reply.text
            )));
        }
        self.send_continuation(message).await
    }

    /// Fetch the log of a maintenance window.
    pub async fn pm_log(&mut self, id: u32) -> Result<Vec<HistoryEntry>> {
        self.require_auth()?;
        let reply = self.exchange(&format!("pm log {id}")).await?;
        if reply.is_error() {
            return Err(Error::Protocol(format!(
                "pm log {id} failed: {} {}",
                reply.code, reply.text
            )));
        }
        history::parse_history(&reply.lines)
    }
}
