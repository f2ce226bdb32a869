// Typed event model

//! Typed event model
//!
//! A Zino event (a "case") is a server-side record about one fault. Every
//! event carries the shared attributes (id, router, administrative state,
//! timestamps, priority) plus one of five variant payloads. Attribute keys
//! the model does not know end up in [`Event::extras`] so forward-compatible
//! servers never break parsing.
//!
//! Operational state, port label, description and downtime are derived from
//! the stored fields on demand; they are never stored.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Administrative lifecycle state, set by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmState {
    /// Newly opened, nobody working on it.
    Open,
    /// An operator is working on the case.
    Working,
    /// Waiting on a third party.
    Waiting,
    /// Waiting for confirmation before closing.
    ConfirmWait,
    /// Deliberately ignored.
    Ignored,
    /// Closed; the server will eventually scavenge it.
    Closed,
    /// Unrecognised state string (forward compatibility).
    Unknown,
}

impl AdmState {
    /// Parse a wire string; anything unrecognised becomes [`AdmState::Unknown`].
    pub fn from_wire(value: &str) -> AdmState {
        match value {
            "open" => AdmState::Open,
            "working" => AdmState::Working,
            "waiting" => AdmState::Waiting,
            "confirm-wait" => AdmState::ConfirmWait,
            "ignored" => AdmState::Ignored,
            "closed" => AdmState::Closed,
            _ => AdmState::Unknown,
        }
    }

    /// The string the wire protocol uses for this state.
    pub fn as_wire(&self) -> &'static str {
        match self {
            AdmState::Open => "open",
            AdmState::Working => "working",
            AdmState::Waiting => "waiting",
            AdmState::ConfirmWait => "confirm-wait",
            AdmState::Ignored => "ignored",
            AdmState::Closed => "closed",
            AdmState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AdmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// The five event variants the server reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Interface up/down transitions.
    PortState,
    /// BGP peering session state.
    Bgp,
    /// BFD session state.
    Bfd,
    /// ICMP reachability of a router.
    Reachability,
    /// Chassis alarm counters.
    Alarm,
}

impl EventKind {
    /// Parse a wire string; unknown kinds are rejected by the caller.
    pub fn from_wire(value: &str) -> Option<EventKind> {
        match value {
            "portstate" => Some(EventKind::PortState),
            "bgp" => Some(EventKind::Bgp),
            "bfd" => Some(EventKind::Bfd),
            "reachability" => Some(EventKind::Reachability),
            "alarm" => Some(EventKind::Alarm),
            _ => None,
        }
    }

    /// The string the wire protocol uses for this kind.
    pub fn as_wire(&self) -> &'static str {
        match self {
            EventKind::PortState => "portstate",
            EventKind::Bgp => "bgp",
            EventKind::Bfd => "bfd",
            EventKind::Reachability => "reachability",
            EventKind::Alarm => "alarm",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Interface operational state reported on portstate events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PortState {
    Up,
    Down,
    LowerLayerDown,
    AdminDown,
}

impl PortState {
    /// Parse a wire string.
    pub fn from_wire(value: &str) -> Option<PortState> {
        match value {
            "up" => Some(PortState::Up),
            "down" => Some(PortState::Down),
            "lowerLayerDown" => Some(PortState::LowerLayerDown),
            "adminDown" => Some(PortState::AdminDown),
            _ => None,
        }
    }

    /// The string the wire protocol uses for this state.
    pub fn as_wire(&self) -> &'static str {
        match self {
            PortState::Up => "up",
            PortState::Down => "down",
            PortState::LowerLayerDown => "lowerLayerDown",
            PortState::AdminDown => "adminDown",
        }
    }
}

/// BFD session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BfdState {
    Up,
    Down,
    Init,
    AdminDown,
}

impl BfdState {
    /// Parse a wire string.
    pub fn from_wire(value: &str) -> Option<BfdState> {
        match value {
            "up" => Some(BfdState::Up),
            "down" => Some(BfdState::Down),
            "init" => Some(BfdState::Init),
            "adminDown" => Some(BfdState::AdminDown),
            _ => None,
        }
    }

    /// The string the wire protocol uses for this state.
    pub fn as_wire(&self) -> &'static str {
        match self {
            BfdState::Up => "up",
            BfdState::Down => "down",
            BfdState::Init => "init",
            BfdState::AdminDown => "adminDown",
        }
    }
}

/// Whether an interface is currently flapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum FlapState {
    Flapping,
    Stable,
}

impl FlapState {
    /// Parse a wire string.
    pub fn from_wire(value: &str) -> Option<FlapState> {
        match value {
            "flapping" => Some(FlapState::Flapping),
            "stable" => Some(FlapState::Stable),
            _ => None,
        }
    }
}

/// Router reachability as probed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ReachabilityState {
    Reachable,
    NoResponse,
}

impl ReachabilityState {
    /// Parse a wire string.
    pub fn from_wire(value: &str) -> Option<ReachabilityState> {
        match value {
            "reachable" => Some(ReachabilityState::Reachable),
            "no-response" => Some(ReachabilityState::NoResponse),
            _ => None,
        }
    }

    /// The string the wire protocol uses for this state.
    pub fn as_wire(&self) -> &'static str {
        match self {
            ReachabilityState::Reachable => "reachable",
            ReachabilityState::NoResponse => "no-response",
        }
    }
}

/// One history entry on an event.
///
/// Entries with `user == "monitor"` were generated by the server itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the entry was recorded.
    pub date: DateTime<Utc>,
    /// Who recorded it; `"monitor"` for server-generated entries.
    pub user: String,
    /// The message body; continuation lines joined by single spaces.
    pub log: String,
}

/// One log entry on an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// When the entry was recorded.
    pub date: DateTime<Utc>,
    /// The message.
    pub log: String,
}

/// Variant payload of a portstate event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStateDetails {
    /// SNMP interface index on the router.
    pub if_index: u32,
    /// Current interface state.
    pub port_state: PortState,
    /// Interface name as reported by the server.
    pub port: Option<String>,
    /// Accumulated downtime.
    pub ac_down: Option<Duration>,
    /// Flap count.
    pub flaps: Option<u32>,
    /// Flapping assessment.
    pub flap_state: Option<FlapState>,
    /// Interface description.
    pub descr: Option<String>,
    /// Reason reported for the last transition.
    pub reason: Option<String>,
}

/// Variant payload of a BGP event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgpDetails {
    /// Peer administrative state string.
    pub bgp_as: String,
    /// Peer operational state string.
    pub bgp_os: String,
    /// Peer autonomous-system number.
    pub remote_as: u32,
    /// Peer address.
    pub remote_addr: IpAddr,
    /// Peer uptime in seconds.
    pub peer_uptime: u32,
}

/// Variant payload of a BFD event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BfdDetails {
    /// BFD session state.
    pub bfd_state: BfdState,
    /// BFD session index.
    pub bfd_ix: u32,
    /// Neighbour address; the wire literal `unknown` maps to none.
    pub bfd_addr: Option<IpAddr>,
    /// BFD discriminator.
    pub bfd_discr: Option<u32>,
    /// Reverse DNS of the neighbour, when the server resolved it.
    pub neigh_rdns: Option<String>,
}

/// Variant payload of a reachability event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityDetails {
    /// Probe outcome.
    pub reachability: ReachabilityState,
    /// Accumulated downtime.
    pub ac_down: Option<Duration>,
}

/// Variant payload of a chassis alarm event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmDetails {
    /// Number of active alarms.
    pub alarm_count: u32,
    /// Alarm class, e.g. `red` or `yellow`.
    pub alarm_type: String,
}

/// The per-kind payload of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum EventDetails {
    PortState(PortStateDetails),
    Bgp(BgpDetails),
    Bfd(BfdDetails),
    Reachability(ReachabilityDetails),
    Alarm(AlarmDetails),
}

/// A live Zino event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Server-assigned stable identifier.
    pub id: u32,
    /// Administrative state.
    pub adm_state: AdmState,
    /// Router the event concerns.
    pub router: String,
    /// When the event was opened.
    pub opened: DateTime<Utc>,
    /// When the event was last updated, if known.
    pub updated: Option<DateTime<Utc>>,
    /// Last state transition, if known.
    pub lasttrans: Option<DateTime<Utc>>,
    /// Address the server polls for this event.
    pub polladdr: Option<IpAddr>,
    /// Free-text description of the last server-side event.
    pub lastevent: Option<String>,
    /// Priority; lower is more urgent. Defaults to 100.
    pub priority: u32,
    /// History entries, oldest first. Attached on demand.
    pub history: Vec<HistoryEntry>,
    /// Log entries, oldest first. Attached on demand.
    pub log: Vec<LogEntry>,
    /// Attributes the model does not (yet) understand.
    pub extras: BTreeMap<String, String>,
    /// The variant payload.
    pub details: EventDetails,
}

/// First five characters of a wire state string, for column display.
fn head5(text: &str) -> &str {
    text.get(..5).unwrap_or(text)
}

impl Event {
    /// Which of the five variants this event is.
    pub fn kind(&self) -> EventKind {
        match self.details {
            EventDetails::PortState(_) => EventKind::PortState,
            EventDetails::Bgp(_) => EventKind::Bgp,
            EventDetails::Bfd(_) => EventKind::Bfd,
            EventDetails::Reachability(_) => EventKind::Reachability,
            EventDetails::Alarm(_) => EventKind::Alarm,
        }
    }

    /// Short human-readable operational state, e.g. `PORT  down`.
    pub fn op_state(&self) -> String {
        match &self.details {
            EventDetails::PortState(d) => format!("PORT  {}", head5(d.port_state.as_wire())),
            EventDetails::Bgp(d) => format!("BGP  {}", head5(&d.bgp_os)),
            EventDetails::Bfd(d) => format!("BFD  {}", head5(d.bfd_state.as_wire())),
            EventDetails::Reachability(d) => d.reachability.as_wire().to_string(),
            EventDetails::Alarm(d) => format!("ALRM  {}", d.alarm_type),
        }
    }

    /// Port or peer identifier, chosen per variant.
    pub fn port(&self) -> String {
        match &self.details {
            EventDetails::PortState(d) => d.port.clone().unwrap_or_default(),
            EventDetails::Bgp(d) => format!("AS{}", d.remote_as),
            EventDetails::Bfd(d) => match d.bfd_addr {
                Some(addr) => addr.to_string(),
                None => format!("ix {}", d.bfd_ix),
            },
            EventDetails::Reachability(_) | EventDetails::Alarm(_) => String::new(),
        }
    }

    /// Free-text description, chosen per variant.
    pub fn description(&self) -> String {
        let lastevent = self.lastevent.as_deref().unwrap_or("");
        match &self.details {
            EventDetails::PortState(d) => d.descr.clone().unwrap_or_default(),
            EventDetails::Bgp(d) => format!("{}, {lastevent}", d.remote_addr),
            EventDetails::Bfd(d) => {
                format!("{}, {lastevent}", d.neigh_rdns.as_deref().unwrap_or(""))
            }
            EventDetails::Reachability(_) => String::new(),
            EventDetails::Alarm(_) => lastevent.to_string(),
        }
    }

    /// Whether the monitored object is currently down.
    pub fn is_down(&self) -> bool {
        match &self.details {
            EventDetails::PortState(d) => {
                matches!(d.port_state, PortState::Down | PortState::LowerLayerDown)
            }
            EventDetails::Bgp(d) => d.bgp_os == "down",
            EventDetails::Bfd(d) => d.bfd_state == BfdState::Down,
            EventDetails::Reachability(d) => d.reachability == ReachabilityState::NoResponse,
            EventDetails::Alarm(d) => d.alarm_count > 0,
        }
    }

    /// Total downtime of a portstate event; `None` for other variants.
    ///
    /// While the port is down the running gap since `lasttrans` is added to
    /// the accumulated figure; a missing `lasttrans` counts as "just now"
    /// and missing accumulation as zero.
    pub fn downtime(&self) -> Option<Duration> {
        let EventDetails::PortState(details) = &self.details else {
            return None;
        };
        let accumulated = details.ac_down.unwrap_or_default();
        if matches!(
            details.port_state,
            PortState::Down | PortState::LowerLayerDown
        ) {
            let since_trans = self
                .lasttrans
                .map(|t| (Utc::now() - t).to_std().unwrap_or_default())
                .unwrap_or_default();
            Some(accumulated + since_trans)
        } else {
            Some(accumulated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_event(details: EventDetails) -> Event {
        Event {
            id: 4711,
            adm_state: AdmState::Open,
            router: "oslo-gw1".to_string(),
            opened: Utc.timestamp_opt(1_678_273_372, 0).unwrap(),
            updated: None,
            lasttrans: None,
            polladdr: None,
            lastevent: Some("link down".to_string()),
            priority: 100,
            history: Vec::new(),
            log: Vec::new(),
            extras: BTreeMap::new(),
            details,
        }
    }

    fn portstate_details(state: PortState) -> PortStateDetails {
        PortStateDetails {
            if_index: 42,
            port_state: state,
            port: Some("ge-0/0/1".to_string()),
            ac_down: None,
            flaps: None,
            flap_state: None,
            descr: Some("uplink to trd-gw3".to_string()),
            reason: None,
        }
    }

    #[test]
    fn test_adm_state_wire_round_trip() {
        for state in [
            AdmState::Open,
            AdmState::Working,
            AdmState::Waiting,
            AdmState::ConfirmWait,
            AdmState::Ignored,
            AdmState::Closed,
        ] {
            assert_eq!(AdmState::from_wire(state.as_wire()), state);
        }
    }

    #[test]
    fn test_adm_state_unknown_catch_all() {
        assert_eq!(AdmState::from_wire("garbage admstate"), AdmState::Unknown);
        assert_eq!(AdmState::from_wire(""), AdmState::Unknown);
    }

    #[test]
    fn test_event_kind_rejects_unknown() {
        assert_eq!(EventKind::from_wire("bgp"), Some(EventKind::Bgp));
        assert_eq!(EventKind::from_wire("telepathy"), None);
    }

    #[test]
    fn test_op_state_portstate_truncates_to_five() {
        let event = base_event(EventDetails::PortState(portstate_details(
            PortState::LowerLayerDown,
        )));
        assert_eq!(event.op_state(), "PORT  lower");

        let event = base_event(EventDetails::PortState(portstate_details(PortState::Up)));
        assert_eq!(event.op_state(), "PORT  up");
    }

    #[test]
    fn test_op_state_other_variants() {
        let event = base_event(EventDetails::Bgp(BgpDetails {
            bgp_as: "running".to_string(),
            bgp_os: "halted".to_string(),
            remote_as: 64666,
            remote_addr: "10.0.0.1".parse().unwrap(),
            peer_uptime: 0,
        }));
        assert_eq!(event.op_state(), "BGP  halte");

        let event = base_event(EventDetails::Reachability(ReachabilityDetails {
            reachability: ReachabilityState::NoResponse,
            ac_down: None,
        }));
        assert_eq!(event.op_state(), "no-response");

        let event = base_event(EventDetails::Alarm(AlarmDetails {
            alarm_count: 2,
            alarm_type: "yellow".to_string(),
        }));
        assert_eq!(event.op_state(), "ALRM  yellow");
    }

    #[test]
    fn test_port_per_variant() {
        let event = base_event(EventDetails::PortState(portstate_details(PortState::Up)));
        assert_eq!(event.port(), "ge-0/0/1");

        let event = base_event(EventDetails::Bgp(BgpDetails {
            bgp_as: "running".to_string(),
            bgp_os: "up".to_string(),
            remote_as: 64666,
            remote_addr: "10.0.0.1".parse().unwrap(),
            peer_uptime: 100,
        }));
        assert_eq!(event.port(), "AS64666");

        let mut bfd = BfdDetails {
            bfd_state: BfdState::Down,
            bfd_ix: 7,
            bfd_addr: Some("192.0.2.1".parse().unwrap()),
            bfd_discr: None,
            neigh_rdns: None,
        };
        let event = base_event(EventDetails::Bfd(bfd.clone()));
        assert_eq!(event.port(), "192.0.2.1");

        bfd.bfd_addr = None;
        let event = base_event(EventDetails::Bfd(bfd));
        assert_eq!(event.port(), "ix 7");
    }

    #[test]
    fn test_description_per_variant() {
        let event = base_event(EventDetails::PortState(portstate_details(PortState::Down)));
        assert_eq!(event.description(), "uplink to trd-gw3");

        let event = base_event(EventDetails::Bfd(BfdDetails {
            bfd_state: BfdState::Down,
            bfd_ix: 7,
            bfd_addr: None,
            bfd_discr: None,
            neigh_rdns: Some("peer.example.org".to_string()),
        }));
        assert_eq!(event.description(), "peer.example.org, link down");

        let event = base_event(EventDetails::Alarm(AlarmDetails {
            alarm_count: 0,
            alarm_type: "red".to_string(),
        }));
        assert_eq!(event.description(), "link down");
    }

    #[test]
    fn test_is_down_per_variant() {
        let event = base_event(EventDetails::PortState(portstate_details(
            PortState::LowerLayerDown,
        )));
        assert!(event.is_down());
        let event = base_event(EventDetails::PortState(portstate_details(
            PortState::AdminDown,
        )));
        assert!(!event.is_down());

        let event = base_event(EventDetails::Bfd(BfdDetails {
            bfd_state: BfdState::Init,
            bfd_ix: 1,
            bfd_addr: None,
            bfd_discr: None,
            neigh_rdns: None,
        }));
        assert!(!event.is_down());

        let event = base_event(EventDetails::Alarm(AlarmDetails {
            alarm_count: 1,
            alarm_type: "red".to_string(),
        }));
        assert!(event.is_down());
    }

    #[test]
    fn test_downtime_up_port_is_accumulated_only() {
        let mut details = portstate_details(PortState::Up);
        details.ac_down = Some(Duration::from_secs(3600));
        let event = base_event(EventDetails::PortState(details));
        assert_eq!(event.downtime(), Some(Duration::from_secs(3600)));

        let mut details = portstate_details(PortState::AdminDown);
        details.ac_down = None;
        let event = base_event(EventDetails::PortState(details));
        assert_eq!(event.downtime(), Some(Duration::ZERO));
    }

    #[test]
    fn test_downtime_down_port_includes_running_gap() {
        let mut details = portstate_details(PortState::Down);
        details.ac_down = Some(Duration::from_secs(100));
        let mut event = base_event(EventDetails::PortState(details));
        event.lasttrans = Some(Utc::now() - chrono::Duration::seconds(50));
        let downtime = event.downtime().unwrap();
        assert!(downtime >= Duration::from_secs(150));
        assert!(downtime < Duration::from_secs(160));
    }

    #[test]
    fn test_downtime_none_for_other_variants() {
        let event = base_event(EventDetails::Alarm(AlarmDetails {
            alarm_count: 1,
            alarm_type: "red".to_string(),
        }));
        assert_eq!(event.downtime(), None);
    }
}
