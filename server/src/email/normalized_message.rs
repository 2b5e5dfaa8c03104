use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::email::{
    gmail_message::{GmailMessage, MessageHeader},
    html::{collapse_whitespace, strip_html},
    mime::extract_bodies,
};

const DEFAULT_SUBJECT: &str = "(No Subject)";
const DEFAULT_SENDER: &str = "Unknown Sender";
const UNKNOWN_DATE: &str = "Unknown Date";
const DISPLAY_DATE_FORMAT: &str = "%m/%d/%Y %I:%M %p";
const SNIPPET_MAX_CHARS: usize = 100;

lazy_static::lazy_static!(
    static ref RE_SENDER: Regex = Regex::new(r"^(.*?)\s*<(.+?)>$").unwrap();
    static ref RE_TZ_COMMENT: Regex = Regex::new(r"\s*\([^)]+\)$").unwrap();
);

enum DateFormat {
    WithOffset(&'static str),
    Naive(&'static str),
}

const DATE_FORMATS: [DateFormat; 6] = [
    DateFormat::WithOffset("%a, %d %b %Y %H:%M:%S %z"),
    DateFormat::Naive("%a, %d %b %Y %H:%M:%S"),
    DateFormat::WithOffset("%d %b %Y %H:%M:%S %z"),
    DateFormat::Naive("%d %b %Y %H:%M:%S"),
    DateFormat::Naive("%a, %d %b %Y %H:%M:%S %Z"),
    DateFormat::Naive("%Y-%m-%d %H:%M:%S"),
];

impl DateFormat {
    /// Wall-clock time as written in the header; offsets are validated but not applied.
    fn parse(&self, input: &str) -> Option<NaiveDateTime> {
        match self {
            DateFormat::WithOffset(fmt) => DateTime::parse_from_str(input, fmt)
                .ok()
                .map(|dt| dt.naive_local()),
            DateFormat::Naive(fmt) => NaiveDateTime::parse_from_str(input, fmt).ok(),
        }
    }
}

/// Display-ready projection of a Gmail message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub to: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    pub is_unread: bool,
    pub snippet: String,
    pub labels: Vec<String>,
}

impl NormalizedMessage {
    pub fn from_gmail_message(msg: &GmailMessage) -> Self {
        let headers = msg.headers();

        let subject = get_header(headers, "Subject")
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string();
        let sender = get_header(headers, "From")
            .filter(|s| !s.is_empty())
            .map(clean_sender)
            .unwrap_or_else(|| DEFAULT_SENDER.to_string());
        let date = get_header(headers, "Date")
            .filter(|s| !s.is_empty())
            .map(parse_date)
            .unwrap_or_else(|| UNKNOWN_DATE.to_string());
        let to = get_header(headers, "To").unwrap_or_default().to_string();

        let bodies = msg.payload.as_ref().map(extract_bodies).unwrap_or_default();
        let (body, html_body) = match (bodies.plain, bodies.html) {
            (Some(plain), html) => {
                let html = html.or_else(|| looks_like_html(&plain).then(|| plain.clone()));
                (plain, html)
            }
            (None, Some(html)) => (strip_html(&html), Some(html)),
            (None, None) => (String::new(), None),
        };

        NormalizedMessage {
            id: msg.id.clone(),
            subject,
            sender,
            date,
            to,
            body: body.trim().to_string(),
            html_body: html_body.map(|h| h.trim().to_string()),
            is_unread: msg.has_label("UNREAD"),
            snippet: clean_snippet(&msg.snippet),
            labels: msg.label_ids.clone(),
        }
    }
}

fn looks_like_html(text: &str) -> bool {
    text.contains('<') && text.contains('>')
}

/// First header matching `name`, ignoring case.
pub fn get_header<'a>(headers: &'a [MessageHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// `"Jane Doe" <jane@x.com>` becomes `Jane Doe`, `<jane@x.com>` becomes
/// `jane@x.com`. Anything else is returned unchanged.
pub fn clean_sender(sender: &str) -> String {
    let Some(caps) = RE_SENDER.captures(sender) else {
        return sender.to_string();
    };

    let name = caps[1].trim().trim_matches('"');
    if name.is_empty() {
        caps[2].trim().to_string()
    } else {
        name.to_string()
    }
}

/// Renders a header date as `MM/DD/YYYY hh:mm AM|PM`, or returns it untouched
/// when no known format matches.
pub fn parse_date(date: &str) -> String {
    let cleaned = RE_TZ_COMMENT.replace(date, "");
    let cleaned = cleaned.trim();

    DATE_FORMATS
        .iter()
        .find_map(|fmt| fmt.parse(cleaned))
        .map(|dt| dt.format(DISPLAY_DATE_FORMAT).to_string())
        .unwrap_or_else(|| date.to_string())
}

pub fn clean_snippet(snippet: &str) -> String {
    let snippet = collapse_whitespace(snippet);
    if snippet.chars().count() > SNIPPET_MAX_CHARS {
        let truncated: String = snippet.chars().take(SNIPPET_MAX_CHARS - 3).collect();
        format!("{truncated}...")
    } else {
        snippet
    }
}
