//! MIME message parsing: raw bytes to a canonical [`Message`].

use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser, MimeHeaders};

use crate::error::{MailRankError, Result};
use crate::model::message::{dedup_addresses, Message};
use crate::parser::header::{self, RawHeaders};

/// Attachment extensions whose bytes are treated as text.
const TEXT_EXTENSIONS: [&str; 9] = ["txt", "csv", "md", "log", "json", "xml", "html", "htm", "ics"];

/// Parse one complete raw message (headers + body).
///
/// `id` and `folder_path` come from the container. String fields that the
/// message does not provide are left empty.
pub fn parse_message(raw: &[u8], id: &str, folder_path: &str) -> Result<Message> {
    let bytes = skip_from_line(raw);
    let parse_error = |reason: &str| MailRankError::Parse {
        source_id: id.to_string(),
        reason: reason.to_string(),
    };

    let raw_headers = RawHeaders::parse(bytes);
    if raw_headers.is_empty() {
        return Err(parse_error("no headers found"));
    }
    let msg = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| parse_error("not an RFC 5322 message"))?;

    let subject = msg.subject().unwrap_or_default().trim().to_string();

    let body_text = match msg.body_text(0) {
        Some(text) => text.trim().to_string(),
        None => msg
            .body_html(0)
            .map(|html| html_to_text(&html))
            .unwrap_or_default(),
    };

    let sender = msg
        .from()
        .map(addresses)
        .and_then(|list| list.into_iter().next())
        .unwrap_or_default();

    let recipients = dedup_addresses(
        msg.to()
            .map(addresses)
            .unwrap_or_default()
            .into_iter()
            .chain(msg.cc().map(addresses).unwrap_or_default()),
    );

    let sent_at = msg
        .date()
        .and_then(|d| DateTime::parse_from_rfc3339(&d.to_rfc3339()).ok())
        .map(|d| d.with_timezone(&Utc))
        .or_else(|| raw_headers.get("date").and_then(header::parse_date));

    let thread_topic = raw_headers
        .get("thread-topic")
        .map(str::to_string)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| header::strip_reply_prefixes(&subject).to_string());

    let body_attachment_text = attachment_text(&msg);

    Ok(Message {
        id: id.to_string(),
        subject,
        body_text,
        body_attachment_text,
        sender,
        recipients,
        sent_at,
        folder_path: folder_path.to_string(),
        thread_topic,
    })
}

/// Message-ID of a raw message without angle brackets, if present.
pub fn message_id(raw: &[u8]) -> Option<String> {
    let headers = RawHeaders::parse(skip_from_line(raw));
    let value = headers.get("message-id")?.trim();
    let value = value.trim_start_matches('<').trim_end_matches('>').trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Flatten an address header into address strings.
///
/// Entries without an address fall back to their display name so that
/// archives with name-only senders still attribute mail.
fn addresses(address: &Address<'_>) -> Vec<String> {
    let pick = |addr: &mail_parser::Addr<'_>| {
        addr.address
            .as_deref()
            .or(addr.name.as_deref())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    match address {
        Address::List(list) => list.iter().map(pick).collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().map(pick))
            .collect(),
    }
}

/// Concatenate the text of every textual attachment.
fn attachment_text(msg: &mail_parser::Message<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();

    for part in msg.attachments() {
        let (ctype, subtype) = part
            .content_type()
            .map(|ct| {
                (
                    ct.ctype().to_lowercase(),
                    ct.subtype().map(str::to_lowercase).unwrap_or_default(),
                )
            })
            .unwrap_or_default();
        let extension = part
            .attachment_name()
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        let is_html = subtype == "html" || extension == "html" || extension == "htm";
        let is_text = ctype == "text"
            || (ctype == "application" && (subtype == "json" || subtype == "xml"))
            || TEXT_EXTENSIONS.contains(&extension.as_str());
        if !is_text {
            continue;
        }

        let raw = String::from_utf8_lossy(part.contents());
        let text = if is_html {
            html_to_text(&raw)
        } else {
            raw.trim().to_string()
        };
        if !text.is_empty() {
            parts.push(text);
        }
    }

    parts.join("\n")
}

/// Skip the `From ` separator line at the start of MBOX messages.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Convert HTML to plain text.
///
/// - Block elements become line breaks
/// - Scripts and styles are removed
/// - Common entities are decoded
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");

    // Mark block boundaries before stripping tags
    let mut marked = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(start) = rest.find('<') {
        marked.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('>') else {
            rest = "";
            break;
        };
        let tag = rest[start + 1..start + end]
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if matches!(
            tag.as_str(),
            "br" | "p" | "div" | "tr" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
        ) {
            marked.push('\n');
        }
        rest = &rest[start + end + 1..];
    }
    marked.push_str(rest);

    let decoded = marked
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    let mut cleaned = String::with_capacity(decoded.len());
    let mut prev_was_blank = false;
    for line in decoded.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }
    cleaned.trim().to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`), case-insensitively.
fn remove_tag_block(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;

    // ASCII lowercasing keeps byte offsets aligned with `remaining`
    while let Some(start) = remaining.to_ascii_lowercase().find(&open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        match after.to_ascii_lowercase().find(&close) {
            Some(end) => remaining = &after[end + close.len()..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    result.push_str(remaining);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &[u8] = b"From: Boss <boss@co.com>\r\n\
To: me@co.com, Team <team@co.com>\r\n\
Cc: me@co.com, audit@co.com\r\n\
Subject: Re: Quarterly status\r\n\
Date: Thu, 01 Feb 2024 10:30:00 +0000\r\n\
Message-ID: <abc@co.com>\r\n\
\r\n\
Numbers look good.\r\n";

    #[test]
    fn test_plain_message_fields() {
        let msg = parse_message(PLAIN, "id-1", "Inbox").unwrap();
        assert_eq!(msg.id, "id-1");
        assert_eq!(msg.folder_path, "Inbox");
        assert_eq!(msg.subject, "Re: Quarterly status");
        assert_eq!(msg.sender, "boss@co.com");
        assert_eq!(msg.recipients, vec!["me@co.com", "team@co.com", "audit@co.com"]);
        assert_eq!(msg.body_text, "Numbers look good.");
        assert_eq!(msg.thread_topic, "Quarterly status");
        assert_eq!(
            msg.sent_at.map(|d| d.to_rfc3339()).as_deref(),
            Some("2024-02-01T10:30:00+00:00")
        );
        assert!(msg.body_attachment_text.is_empty());
    }

    #[test]
    fn test_thread_topic_header_wins() {
        let raw = b"From: a@x.com\nSubject: RE: misc\nThread-Topic: Budget 2024\n\nbody\n";
        let msg = parse_message(raw, "x", "").unwrap();
        assert_eq!(msg.thread_topic, "Budget 2024");
    }

    #[test]
    fn test_missing_headers_become_empty_strings() {
        let msg = parse_message(b"Subject: hi\n\n", "x", "").unwrap();
        assert_eq!(msg.sender, "");
        assert!(msg.recipients.is_empty());
        assert_eq!(msg.body_text, "");
        assert!(msg.sent_at.is_none());
    }

    #[test]
    fn test_name_only_sender() {
        let msg = parse_message(b"From: Project Manager\nSubject: x\n\nbody\n", "x", "").unwrap();
        assert_eq!(msg.sender, "Project Manager");
    }

    #[test]
    fn test_html_body_fallback() {
        let raw = b"From: a@x.com\nSubject: h\nContent-Type: text/html\n\n<p>Hello <b>world</b></p>\n";
        let msg = parse_message(raw, "x", "").unwrap();
        assert_eq!(msg.body_text, "Hello world");
    }

    #[test]
    fn test_text_attachment_extracted() {
        let raw = b"From: a@x.com\n\
Subject: report\n\
MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"XX\"\n\
\n\
--XX\n\
Content-Type: text/plain\n\
\n\
see attached\n\
--XX\n\
Content-Type: text/csv\n\
Content-Disposition: attachment; filename=\"q1.csv\"\n\
\n\
region,revenue\n\
north,42\n\
--XX\n\
Content-Type: application/octet-stream\n\
Content-Disposition: attachment; filename=\"blob.bin\"\n\
\n\
binarystuff\n\
--XX--\n";
        let msg = parse_message(raw, "x", "").unwrap();
        assert_eq!(msg.body_text, "see attached");
        assert!(msg.body_attachment_text.contains("north,42"));
        assert!(!msg.body_attachment_text.contains("binarystuff"));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(matches!(
            parse_message(b"\n\n\n", "bad", ""),
            Err(MailRankError::Parse { .. })
        ));
    }

    #[test]
    fn test_message_id_strips_brackets() {
        assert_eq!(message_id(PLAIN).as_deref(), Some("abc@co.com"));
        assert_eq!(message_id(b"Subject: x\n\n"), None);
    }

    #[test]
    fn test_skip_from_line() {
        let data = b"From user@example.com Thu Jan 01 00:00:00 2024\nSubject: Test\n\nBody\n";
        assert!(skip_from_line(data).starts_with(b"Subject:"));
        let data = b"Subject: Test\n\nBody\n";
        assert_eq!(skip_from_line(data), data);
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<p>Hello <b>world</b></p><p>Second</p>"),
            "Hello world\n\nSecond"
        );
        assert_eq!(html_to_text("Tom &amp; Jerry &lt;3&gt;"), "Tom & Jerry <3>");
        assert_eq!(html_to_text("Before<SCRIPT>alert(1)</SCRIPT>After"), "BeforeAfter");
        assert_eq!(html_to_text("line<br/>next"), "line\nnext");
    }
}
