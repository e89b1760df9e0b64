// Parser for `lastb -F` output
//
// Turns failed login attempt lines from the btmp login-failure log into
// structured records ready for database insertion.
//
// lastb -F prints fixed-width-ish columns, but the widths vary across
// distributions. The reliable anchor is the timestamp token, whose grammar
// never changes:
//
//     root     ssh:notty    192.168.1.100    Fri Feb 14 03:22:15 2026 - Fri Feb 14 03:22:15 2026  (00:00)
//     admin    ssh:notty    2001:db8::1      Fri Feb 14 03:22:15 2026 - Fri Feb 14 03:22:15 2026  (00:00)
//     root     tty1                          Fri Feb 14 04:00:01 2026 - Fri Feb 14 04:00:01 2026  (00:00)
//
// Lines that are skipped entirely: empty lines, the "btmp begins" /
// "wtmp begins" boundary markers, and reboot/shutdown pseudo-logins.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::trace;

/// Timestamp grammar used by `lastb -F`: three-letter weekday, three-letter
/// month, 1-2 digit day, HH:MM:SS, four-digit year.
const TIMESTAMP_PATTERN: &str =
    r"[A-Z][a-z]{2}\s+[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\d{4}";

/// Format for the timestamp once the weekday token has been dropped.
const TIMESTAMP_FORMAT: &str = "%b %d %H:%M:%S %Y";

/// Log boundary markers written by last/lastb at the end of the output.
const SKIP_PREFIXES: [&str; 2] = ["btmp begins", "wtmp begins"];

/// System boot/shutdown pseudo-logins, never real authentication attempts.
const SKIP_USERNAMES: [&str; 2] = ["reboot", "shutdown"];

/// Login protocol, classified from the terminal field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Console,
    Pts,
    Unknown,
}

impl Protocol {
    /// Classify the terminal field. Total: every terminal maps to a variant.
    pub fn from_terminal(terminal: &str) -> Self {
        let terminal = terminal.to_lowercase();
        if terminal.contains("ssh") {
            Protocol::Ssh
        } else if terminal.starts_with("tty") {
            Protocol::Console
        } else if terminal.starts_with("pts") {
            Protocol::Pts
        } else {
            Protocol::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Console => "console",
            Protocol::Pts => "pts",
            Protocol::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed login attempt parsed from a `lastb -F` line.
///
/// `source_ip` carries the raw source field text when one was present. The
/// parser's IP shape test is deliberately permissive, so this can still be
/// a hostname or a malformed IPv6 candidate; the writer performs the strict
/// validation and stores non-IP values as NULL. The original line survives
/// in `raw_line` for audit either way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginAttempt {
    pub username: String,
    pub source_ip: Option<String>,
    /// Interpreted as UTC by convention: lastb prints no timezone.
    pub timestamp: DateTime<Utc>,
    pub terminal: String,
    pub protocol: Protocol,
    pub raw_line: String,
}

/// Two-tier parser for `lastb -F` output.
///
/// The strict pattern matches the full line structure; the lenient fallback
/// anchors on the first timestamp substring and recovers the leading fields
/// from whatever precedes it. A line neither tier can handle is skipped,
/// never an error.
pub struct LastbParser {
    line_re: Regex,
    timestamp_re: Regex,
    ipv4_re: Regex,
    ipv6_re: Regex,
}

impl LastbParser {
    pub fn new() -> Result<Self> {
        // Groups: username, terminal, source (may be empty), start timestamp.
        // The end timestamp and duration are matched but not used.
        let line_pattern = format!(
            r"^(\S+)\s+(\S+)\s+(.*?)\s+({ts})\s+-\s+({ts})\s+\(.*\)\s*$",
            ts = TIMESTAMP_PATTERN
        );

        Ok(Self {
            line_re: Regex::new(&line_pattern).context("Failed to compile line pattern")?,
            timestamp_re: Regex::new(TIMESTAMP_PATTERN)
                .context("Failed to compile timestamp pattern")?,
            ipv4_re: Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$")
                .context("Failed to compile IPv4 pattern")?,
            // Simplified on purpose; the writer validates before storage.
            ipv6_re: Regex::new(r"^[0-9a-fA-F:]+$")
                .context("Failed to compile IPv6 pattern")?,
        })
    }

    /// Parse a single `lastb -F` line.
    ///
    /// Returns `None` for lines that should be skipped (empty, boundary
    /// marker, reboot/shutdown, unparseable).
    pub fn parse_line(&self, line: &str) -> Option<LoginAttempt> {
        let line = line.trim_end_matches('\n');
        let trimmed = line.trim();

        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_lowercase();
        if SKIP_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
            return None;
        }

        self.parse_strict(line).or_else(|| self.parse_lenient(line))
    }

    /// Parse full `lastb -F` output into a list of records, preserving line
    /// order. Unparseable lines are dropped silently; empty input yields an
    /// empty list.
    pub fn parse_text(&self, text: &str) -> Vec<LoginAttempt> {
        text.lines().filter_map(|line| self.parse_line(line)).collect()
    }

    /// Shape test for the source field. Accepts dotted-quad IPv4 and any
    /// hex-and-colons string for IPv6, so malformed addresses can pass; the
    /// writer's `IpAddr` parse is the authoritative check.
    pub fn is_ip_like(&self, source: &str) -> bool {
        self.ipv4_re.is_match(source)
            || (source.contains(':') && self.ipv6_re.is_match(source))
    }

    fn parse_strict(&self, line: &str) -> Option<LoginAttempt> {
        let caps = self.line_re.captures(line)?;
        self.build_attempt(&caps[1], &caps[2], &caps[3], &caps[4], line)
    }

    /// Fallback for lines the strict pattern rejects: irregular spacing,
    /// truncated trailing fields, shifted column alignment. Anchors on the
    /// first timestamp substring and splits the prefix on whitespace.
    fn parse_lenient(&self, line: &str) -> Option<LoginAttempt> {
        let trimmed = line.trim();
        let ts = self.timestamp_re.find(trimmed)?;

        let prefix = trimmed[..ts.start()].trim();
        let mut parts = prefix.split_whitespace();

        let username = parts.next()?;
        let terminal = parts.next().unwrap_or("unknown");
        let source = parts.next().unwrap_or("");

        self.build_attempt(username, terminal, source, ts.as_str(), line)
    }

    /// Post-processing shared by both tiers.
    fn build_attempt(
        &self,
        username: &str,
        terminal: &str,
        source: &str,
        timestamp_str: &str,
        line: &str,
    ) -> Option<LoginAttempt> {
        if SKIP_USERNAMES
            .iter()
            .any(|skip| username.eq_ignore_ascii_case(skip))
        {
            return None;
        }

        let timestamp = parse_timestamp(timestamp_str)?;

        Some(LoginAttempt {
            username: username.to_string(),
            source_ip: self.classify_source(source),
            timestamp,
            terminal: terminal.to_string(),
            protocol: Protocol::from_terminal(terminal),
            raw_line: line.to_string(),
        })
    }

    /// Classify the source field: empty becomes `None`, anything else is
    /// carried through as-is. Hostnames are kept here so the writer can log
    /// them before downgrading to NULL.
    fn classify_source(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if !self.is_ip_like(raw) {
            trace!(source = %raw, "source field is not an IP literal");
        }
        Some(raw.to_string())
    }
}

/// Parse a `lastb -F` timestamp, interpreted as UTC.
///
/// The leading weekday token is dropped before parsing: it is informational
/// only, and btmp data in the wild does not guarantee it agrees with the
/// date, so it must not participate in validation.
fn parse_timestamp(timestamp_str: &str) -> Option<DateTime<Utc>> {
    let (_weekday, rest) = timestamp_str.split_once(char::is_whitespace)?;
    let naive = NaiveDateTime::parse_from_str(rest.trim(), TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}
