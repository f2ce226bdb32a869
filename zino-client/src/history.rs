// History and log block parsers

//! History and log parsing
//!
//! `gethist` blocks interleave header lines (`<epoch> <user-or-text>`) with
//! continuation lines that carry a single leading space; a line containing
//! exactly one space closes an entry. A header whose text itself contains a
//! space is a server-generated short log and is attributed to the `monitor`
//! pseudo-user. `getlog` blocks are flat `<epoch> <text>` lines.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::event::{HistoryEntry, LogEntry};

/// User name the server records on its own history entries.
pub const SYSTEM_USER: &str = "monitor";

/// Promote integer epoch seconds to a UTC instant.
///
/// Non-integer timestamps have been observed as transient server garbage
/// and surface as [`Error::Retry`].
fn timestamp(value: &str, line: &str) -> Result<DateTime<Utc>> {
    let seconds: i64 = value
        .parse()
        .map_err(|_| Error::Retry(format!("bad timestamp in line {line:?}")))?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::Retry(format!("timestamp out of range in line {line:?}")))
}

/// Parse a `gethist` block into ordered history entries.
///
/// Entries left open at end-of-input are still emitted, and interior
/// single-space lines never duplicate an entry.
pub fn parse_history(lines: &[String]) -> Result<Vec<HistoryEntry>> {
    let mut entries: Vec<HistoryEntry> = Vec::new();
    for line in lines {
        if line == " " {
            // End-of-entry marker.
            continue;
        }
        if let Some(continuation) = line.strip_prefix(' ') {
            if let Some(entry) = entries.last_mut() {
                entry.log.push_str(continuation.trim());
                entry.log.push(' ');
            }
            continue;
        }
        let (raw_date, body) = line
            .split_once(' ')
            .ok_or_else(|| Error::Retry(format!("history header without body: {line:?}")))?;
        let date = timestamp(raw_date, line)?;
        let (user, log) = if body.contains(' ') {
            // Server-generated short log, e.g. "state change open -> waiting".
            (SYSTEM_USER.to_string(), body.to_string())
        } else {
            (body.to_string(), String::new())
        };
        entries.push(HistoryEntry { date, user, log });
    }
    for entry in &mut entries {
        entry.log = entry.log.trim().to_string();
    }
    Ok(entries)
}

/// Parse a `getlog` block into ordered log entries.
pub fn parse_log(lines: &[String]) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for line in lines {
        let (raw_date, log) = line
            .split_once(' ')
            .ok_or_else(|| Error::Retry(format!("log line without message: {line:?}")))?;
        entries.push(LogEntry {
            date: timestamp(raw_date, line)?,
            log: log.to_string(),
        });
    }
    Ok(entries)
}
