//! Raw RFC 5322 header access: block splitting, unfolding, and lenient date parsing.
//!
//! `mail-parser` decodes the headers it knows about. These helpers cover the
//! rest (`Thread-Topic`) and act as a fallback when its date parser gives up.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

/// Unfolded headers of one message, names lowercased.
#[derive(Debug, Clone, Default)]
pub struct RawHeaders {
    fields: Vec<(String, String)>,
}

impl RawHeaders {
    /// Parse the header block at the start of `message`.
    pub fn parse(message: &[u8]) -> Self {
        let block = &message[..header_end(message).unwrap_or(message.len())];
        Self {
            fields: unfold(&String::from_utf8_lossy(block)),
        }
    }

    /// First value of header `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Byte offset where the header block ends (the first blank line).
pub fn header_end(data: &[u8]) -> Option<usize> {
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some(i);
        }
        if data[i..].starts_with(b"\r\n\r\n") {
            return Some(i);
        }
    }
    None
}

/// Join continuation lines with the header they continue.
fn unfold(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            result.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }
    result
}

/// Remove any number of leading `Re:` / `Fwd:` / `Fw:` / `답장:` / `전달:` prefixes.
pub fn strip_reply_prefixes(subject: &str) -> &str {
    const PREFIXES: [&str; 6] = ["re:", "fwd:", "fw:", "aw:", "답장:", "전달:"];
    let mut rest = subject.trim();
    loop {
        let lower = rest.to_lowercase();
        match PREFIXES.iter().find(|p| lower.starts_with(*p)) {
            // Prefixes are ASCII or fixed Hangul, so byte lengths match after lowercasing
            Some(p) => rest = rest[p.len()..].trim_start(),
            None => return rest,
        }
    }
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, RFC 3339, and several broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let candidate = replace_named_tz(strip_day_of_week(trimmed));
    const FORMATS: [&str; 6] = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%Y-%m-%d %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y. %m. %d. %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&candidate, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&candidate, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    debug!(date = trimmed, "Could not parse date");
    None
}

fn strip_day_of_week(s: &str) -> &str {
    match s.split_once(',') {
        Some((dow, rest)) if dow.len() <= 4 && dow.chars().all(char::is_alphabetic) => rest.trim(),
        _ => s,
    }
}

/// Replace a trailing timezone abbreviation with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 10] = [
        ("UT", "+0000"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("KST", "+0900"),
        ("JST", "+0900"),
        ("CET", "+0100"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
    ];
    // Drop a trailing comment such as "(KST)"
    let s = match s.rfind(" (") {
        Some(pos) if s.ends_with(')') => &s[..pos],
        _ => s,
    };
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            if head.ends_with(' ') {
                return format!("{head}{offset}");
            }
        }
    }
    s.to_string()
}
