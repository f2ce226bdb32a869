// Wire attribute dump to typed event conversion

//! Event attribute parsing
//!
//! `getattrs` returns a flat list of `attr: value` lines. Parsing runs in
//! three steps: key normalisation (dashes to underscores plus the camelCase
//! remaps the server uses for BFD/BGP fields), value conversion (integers,
//! epoch timestamps, durations, IP addresses, enums) and variant dispatch on
//! the `type` attribute. Keys the model does not recognise are kept verbatim
//! in the event's `extras` map.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::event::{
    AdmState, AlarmDetails, BfdDetails, BfdState, BgpDetails, Event, EventDetails, EventKind,
    FlapState, PortState, PortStateDetails, ReachabilityDetails, ReachabilityState,
};

/// Normalise one wire attribute key.
///
/// `-` becomes `_` first, then the server's camelCase spellings are mapped
/// onto the model's field names. `Neigh-rDNS` has inconsistent casing across
/// server versions and is matched case-insensitively.
fn normalize_key(raw: &str) -> String {
    let key = raw.trim().replace('-', "_");
    let mapped = match key.as_str() {
        "state" => "adm_state",
        "ifindex" => "if_index",
        "portstate" => "port_state",
        "bfdAddr" => "bfd_addr",
        "bfdDiscr" => "bfd_discr",
        "bfdState" => "bfd_state",
        "bfdIx" => "bfd_ix",
        "bgpAS" => "bgp_as",
        "bgpOS" => "bgp_os",
        "remote_AS" => "remote_as",
        other if other.eq_ignore_ascii_case("neigh_rdns") => "neigh_rdns",
        other => return other.to_string(),
    };
    mapped.to_string()
}

/// Split `attr: value` lines into a normalised key/value map.
///
/// A line without `:` is the transient server-side malformation seen in the
/// wild and surfaces as [`Error::Retry`].
fn attrs_to_map(lines: &[String]) -> Result<BTreeMap<String, String>> {
    let mut attrs = BTreeMap::new();
    for line in lines {
        let (key, value) = line.split_once(':').ok_or_else(|| {
            Error::Retry(format!("attribute line without separator: {line:?}"))
        })?;
        attrs.insert(normalize_key(key), value.trim().to_string());
    }
    Ok(attrs)
}

fn take(attrs: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    attrs.remove(key)
}

fn require(attrs: &mut BTreeMap<String, String>, key: &str) -> Result<String> {
    take(attrs, key).ok_or_else(|| Error::Validation(format!("missing required field {key:?}")))
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::Validation(format!("field {key:?} is not an integer: {value:?}")))
}

fn take_u32(attrs: &mut BTreeMap<String, String>, key: &str) -> Result<Option<u32>> {
    take(attrs, key).map(|v| parse_u32(key, &v)).transpose()
}

fn require_u32(attrs: &mut BTreeMap<String, String>, key: &str) -> Result<u32> {
    let value = require(attrs, key)?;
    parse_u32(key, &value)
}

/// Promote integer epoch seconds to a UTC instant.
fn timestamp(key: &str, value: &str) -> Result<DateTime<Utc>> {
    let seconds: i64 = value
        .parse()
        .map_err(|_| Error::Validation(format!("field {key:?} is not a timestamp: {value:?}")))?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::Validation(format!("field {key:?} is out of range: {value:?}")))
}

fn take_timestamp(
    attrs: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<DateTime<Utc>>> {
    take(attrs, key).map(|v| timestamp(key, &v)).transpose()
}

fn take_duration(attrs: &mut BTreeMap<String, String>, key: &str) -> Result<Option<Duration>> {
    take_u32(attrs, key).map(|opt| opt.map(|secs| Duration::from_secs(u64::from(secs))))
}

/// Parse an IP address; the wire literal `unknown` maps to none.
fn take_ip(attrs: &mut BTreeMap<String, String>, key: &str) -> Result<Option<IpAddr>> {
    let Some(value) = take(attrs, key) else {
        return Ok(None);
    };
    if value.contains("unknown") {
        return Ok(None);
    }
    let addr = value
        .parse()
        .map_err(|_| Error::Validation(format!("field {key:?} is not an IP address: {value:?}")))?;
    Ok(Some(addr))
}

/// Parse a full `getattrs` dump into a typed [`Event`].
pub fn parse_attributes(lines: &[String]) -> Result<Event> {
    let mut attrs = attrs_to_map(lines)?;

    let kind_text = require(&mut attrs, "type")?;
    let kind = EventKind::from_wire(&kind_text)
        .ok_or_else(|| Error::UnknownEventType(kind_text.clone()))?;

    let id = require_u32(&mut attrs, "id")?;
    // Unrecognised administrative states degrade to Unknown instead of
    // failing; new server versions may grow states mid-session.
    let adm_state = AdmState::from_wire(&require(&mut attrs, "adm_state")?);
    let router = require(&mut attrs, "router")?;
    let opened = {
        let value = require(&mut attrs, "opened")?;
        timestamp("opened", &value)?
    };
    let updated = take_timestamp(&mut attrs, "updated")?;
    let lasttrans = take_timestamp(&mut attrs, "lasttrans")?;
    let polladdr = take_ip(&mut attrs, "polladdr")?;
    let lastevent = take(&mut attrs, "lastevent");
    let priority = take_u32(&mut attrs, "priority")?.unwrap_or(100);

    let details = match kind {
        EventKind::PortState => EventDetails::PortState(PortStateDetails {
            if_index: require_u32(&mut attrs, "if_index")?,
            port_state: {
                let value = require(&mut attrs, "port_state")?;
                PortState::from_wire(&value).ok_or_else(|| {
                    Error::Validation(format!("unknown port state {value:?}"))
                })?
            },
            port: take(&mut attrs, "port"),
            ac_down: take_duration(&mut attrs, "ac_down")?,
            flaps: take_u32(&mut attrs, "flaps")?,
            flap_state: take(&mut attrs, "flapstate")
                .as_deref()
                .and_then(FlapState::from_wire),
            descr: take(&mut attrs, "descr"),
            reason: take(&mut attrs, "reason"),
        }),
        EventKind::Bgp => EventDetails::Bgp(BgpDetails {
            bgp_as: require(&mut attrs, "bgp_as")?,
            bgp_os: require(&mut attrs, "bgp_os")?,
            remote_as: require_u32(&mut attrs, "remote_as")?,
            remote_addr: take_ip(&mut attrs, "remote_addr")?.ok_or_else(|| {
                Error::Validation("missing required field \"remote_addr\"".to_string())
            })?,
            peer_uptime: require_u32(&mut attrs, "peer_uptime")?,
        }),
        EventKind::Bfd => EventDetails::Bfd(BfdDetails {
            bfd_state: {
                let value = require(&mut attrs, "bfd_state")?;
                BfdState::from_wire(&value)
                    .ok_or_else(|| Error::Validation(format!("unknown bfd state {value:?}")))?
            },
            bfd_ix: require_u32(&mut attrs, "bfd_ix")?,
            bfd_addr: take_ip(&mut attrs, "bfd_addr")?,
            bfd_discr: take_u32(&mut attrs, "bfd_discr")?,
            neigh_rdns: take(&mut attrs, "neigh_rdns"),
        }),
        EventKind::Reachability => EventDetails::Reachability(ReachabilityDetails {
            reachability: {
                let value = require(&mut attrs, "reachability")?;
                ReachabilityState::from_wire(&value).ok_or_else(|| {
                    Error::Validation(format!("unknown reachability state {value:?}"))
                })?
            },
            ac_down: take_duration(&mut attrs, "ac_down")?,
        }),
        EventKind::Alarm => EventDetails::Alarm(AlarmDetails {
            alarm_count: require_u32(&mut attrs, "alarm_count")?,
            alarm_type: require(&mut attrs, "alarm_type")?,
        }),
    };

    if matches!(details, EventDetails::Bgp(_)) && lastevent.is_none() {
        return Err(Error::Validation(
            "missing required field \"lastevent\"".to_string(),
        ));
    }

    Ok(Event {
        id,
        adm_state,
        router,
        opened,
        updated,
        lasttrans,
        polladdr,
        lastevent,
        priority,
        history: Vec::new(),
        log: Vec::new(),
        extras: attrs,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn bgp_dump() -> Vec<String> {
        lines(&[
            "state: working",
            "router: uninett-gsw2",
            "type: bgp",
            "opened: 1524465142",
            "id: 32802",
            "updated: 1533116751",
            "priority: 100",
            "polladdr: 127.0.0.1",
            "remote-addr: 2001:700:0:4515::5:11",
            "remote-AS: 64666",
            "peer-uptime: 0",
            "lastevent: peer is admin turned off",
            "bgpAS: halted",
            "bgpOS: down",
        ])
    }

    fn portstate_dump() -> Vec<String> {
        lines(&[
            "state: ignored",
            "router: uninett-tor-sw4",
            "descr: local MC-LAG, tor-sw4.har-04.p.uninett.no",
            "type: portstate",
            "opened: 1677714463",
            "lasttrans: 1686584585",
            "id: 139110",
            "port: ae24",
            "flaps: 1",
            "updated: 1686584585",
            "ac-down: 352952",
            "priority: 100",
            "polladdr: 158.38.129.42",
            "portstate: up",
            "ifindex: 654",
        ])
    }

    #[test]
    fn test_parse_bgp_event() {
        let event = parse_attributes(&bgp_dump()).unwrap();
        assert_eq!(event.id, 32802);
        assert_eq!(event.kind(), EventKind::Bgp);
        assert_eq!(event.adm_state, AdmState::Working);
        assert_eq!(event.router, "uninett-gsw2");
        assert_eq!(event.opened.timestamp(), 1524465142);
        assert_eq!(event.updated.map(|t| t.timestamp()), Some(1533116751));
        assert_eq!(event.polladdr, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(
            event.lastevent.as_deref(),
            Some("peer is admin turned off")
        );
        let EventDetails::Bgp(details) = &event.details else {
            unreachable!("expected bgp details");
        };
        assert_eq!(details.bgp_as, "halted");
        assert_eq!(details.bgp_os, "down");
        assert_eq!(details.remote_as, 64666);
        assert_eq!(
            details.remote_addr,
            "2001:700:0:4515::5:11".parse::<IpAddr>().unwrap()
        );
        assert_eq!(details.peer_uptime, 0);
        assert!(event.is_down());
        assert!(event.extras.is_empty());
    }

    #[test]
    fn test_parse_portstate_event() {
        let event = parse_attributes(&portstate_dump()).unwrap();
        assert_eq!(event.id, 139110);
        assert_eq!(event.adm_state, AdmState::Ignored);
        let EventDetails::PortState(details) = &event.details else {
            unreachable!("expected portstate details");
        };
        assert_eq!(details.if_index, 654);
        assert_eq!(details.port_state, PortState::Up);
        assert_eq!(details.port.as_deref(), Some("ae24"));
        assert_eq!(details.flaps, Some(1));
        assert_eq!(details.ac_down, Some(Duration::from_secs(352952)));
        assert_eq!(
            details.descr.as_deref(),
            Some("local MC-LAG, tor-sw4.har-04.p.uninett.no")
        );
        assert_eq!(event.lasttrans.map(|t| t.timestamp()), Some(1686584585));
        assert!(!event.is_down());
    }

    #[test]
    fn test_value_with_colon_survives() {
        // Only the first colon separates key from value.
        let event = parse_attributes(&portstate_dump()).unwrap();
        let EventDetails::PortState(details) = &event.details else {
            unreachable!("expected portstate details");
        };
        assert!(details.descr.as_deref().unwrap().contains("MC-LAG"));
    }

    #[test]
    fn test_garbage_adm_state_is_tolerated() {
        let mut dump = bgp_dump();
        dump[0] = "state: garbage admstate".to_string();
        let event = parse_attributes(&dump).unwrap();
        assert_eq!(event.adm_state, AdmState::Unknown);
        assert_eq!(event.id, 32802);
    }

    #[test]
    fn test_line_without_separator_is_retry() {
        let mut dump = bgp_dump();
        dump.push("no separator here".to_string());
        let err = parse_attributes(&dump).unwrap_err();
        assert!(matches!(err, Error::Retry(_)));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let dump = lines(&[
            "state: open",
            "router: r1",
            "type: telepathy",
            "opened: 1524465142",
            "id: 1",
        ]);
        let err = parse_attributes(&dump).unwrap_err();
        assert!(matches!(err, Error::UnknownEventType(kind) if kind == "telepathy"));
    }

    #[test]
    fn test_missing_required_variant_field() {
        let dump = lines(&[
            "state: open",
            "router: r1",
            "type: alarm",
            "opened: 1524465142",
            "id: 1",
            "alarm-type: yellow",
        ]);
        let err = parse_attributes(&dump).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_unknown_keys_land_in_extras() {
        let mut dump = bgp_dump();
        dump.push("shiny-new-attr: some value".to_string());
        let event = parse_attributes(&dump).unwrap();
        assert_eq!(
            event.extras.get("shiny_new_attr").map(String::as_str),
            Some("some value")
        );
    }

    #[test]
    fn test_bfd_addr_unknown_literal_maps_to_none() {
        let dump = lines(&[
            "state: open",
            "router: r1",
            "type: bfd",
            "opened: 1524465142",
            "id: 77",
            "bfdState: down",
            "bfdIx: 9",
            "bfdAddr: unknown",
            "lastevent: changed from Up to Down",
        ]);
        let event = parse_attributes(&dump).unwrap();
        let EventDetails::Bfd(details) = &event.details else {
            unreachable!("expected bfd details");
        };
        assert_eq!(details.bfd_addr, None);
        assert_eq!(event.port(), "ix 9");
    }

    #[test]
    fn test_neigh_rdns_casing_is_ignored() {
        for spelling in ["Neigh-rDNS", "neigh-rdns", "Neigh-rdns"] {
            let dump = lines(&[
                "state: open",
                "router: r1",
                "type: bfd",
                "opened: 1524465142",
                "id: 77",
                "bfdState: up",
                "bfdIx: 9",
                &format!("{spelling}: peer.example.org"),
            ]);
            let event = parse_attributes(&dump).unwrap();
            let EventDetails::Bfd(details) = &event.details else {
                unreachable!("expected bfd details");
            };
            assert_eq!(
                details.neigh_rdns.as_deref(),
                Some("peer.example.org"),
                "spelling {spelling}"
            );
        }
    }

    #[test]
    fn test_bgp_requires_lastevent() {
        let dump: Vec<String> = bgp_dump()
            .into_iter()
            .filter(|line| !line.starts_with("lastevent"))
            .collect();
        let err = parse_attributes(&dump).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_reachability_event() {
        let dump = lines(&[
            "state: open",
            "router: trd-gw1",
            "type: reachability",
            "opened: 1524465142",
            "id: 555",
            "reachability: no-response",
            "ac-down: 120",
        ]);
        let event = parse_attributes(&dump).unwrap();
        assert!(event.is_down());
        assert_eq!(event.op_state(), "no-response");
        let EventDetails::Reachability(details) = &event.details else {
            unreachable!("expected reachability details");
        };
        assert_eq!(details.ac_down, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_round_trip_of_recognised_fields() {
        // Re-serialising the typed values must reproduce the wire values.
        let event = parse_attributes(&bgp_dump()).unwrap();
        assert_eq!(event.adm_state.as_wire(), "working");
        assert_eq!(event.kind().as_wire(), "bgp");
        assert_eq!(event.opened.timestamp().to_string(), "1524465142");
        let reparsed = parse_attributes(&lines(&[
            &format!("state: {}", event.adm_state.as_wire()),
            &format!("router: {}", event.router),
            &format!("type: {}", event.kind().as_wire()),
            &format!("opened: {}", event.opened.timestamp()),
            &format!("id: {}", event.id),
            &format!("updated: {}", event.updated.unwrap().timestamp()),
            &format!("priority: {}", event.priority),
            &format!("polladdr: {}", event.polladdr.unwrap()),
            "remote-addr: 2001:700:0:4515::5:11",
            "remote-AS: 64666",
            "peer-uptime: 0",
            &format!("lastevent: {}", event.lastevent.as_deref().unwrap()),
            "bgpAS: halted",
            "bgpOS: down",
        ]))
        .unwrap();
        assert_eq!(reparsed, event);
    }
}
