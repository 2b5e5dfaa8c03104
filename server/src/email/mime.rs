use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

use crate::email::gmail_message::MessagePart;

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind<'a> {
    Plain(&'a MessagePart),
    Html(&'a MessagePart),
    Container(&'a [MessagePart]),
    Other,
}

impl<'a> PartKind<'a> {
    pub fn classify(part: &'a MessagePart, is_root: bool) -> Self {
        if is_root {
            // A root with children is always walked, whatever its own mime type.
            if !part.parts.is_empty() {
                return PartKind::Container(&part.parts);
            }
            if part.is_mime("text/html") {
                return PartKind::Html(part);
            }
            return match part.data() {
                Some(_) => PartKind::Plain(part),
                None => PartKind::Other,
            };
        }

        if part.is_mime("text/plain") {
            PartKind::Plain(part)
        } else if part.is_mime("text/html") {
            PartKind::Html(part)
        } else if !part.parts.is_empty() {
            PartKind::Container(&part.parts)
        } else {
            PartKind::Other
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BodyParts {
    pub plain: Option<String>,
    pub html: Option<String>,
}

/// Finds the first non-empty plain and html parts in depth-first order.
pub fn extract_bodies(root: &MessagePart) -> BodyParts {
    let mut bodies = BodyParts::default();
    let mut stack: Vec<(&MessagePart, bool)> = vec![(root, true)];

    while let Some((part, is_root)) = stack.pop() {
        match PartKind::classify(part, is_root) {
            PartKind::Plain(p) => {
                if bodies.plain.is_none() {
                    bodies.plain = decode_part(p);
                }
            }
            PartKind::Html(p) => {
                if bodies.html.is_none() {
                    bodies.html = decode_part(p);
                }
            }
            PartKind::Container(children) => {
                stack.extend(children.iter().rev().map(|c| (c, false)));
            }
            PartKind::Other => {}
        }

        if bodies.plain.is_some() && bodies.html.is_some() {
            break;
        }
    }

    bodies
}

fn decode_part(part: &MessagePart) -> Option<String> {
    part.data()
        .map(decode_body_data)
        .filter(|text| !text.trim().is_empty())
}

/// Decodes a Gmail body payload. Accepts url-safe or standard alphabets with
/// any padding, then falls back to dropping characters outside the alphabet.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn decode_body_data(data: &str) -> String {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = URL_SAFE_LENIENT
        .decode(&compact)
        .or_else(|_| STANDARD_LENIENT.decode(&compact))
        .unwrap_or_else(|e| {
            tracing::warn!("Body data is not valid base64 ({e}), salvaging what decodes");
            salvage(&compact)
        });

    String::from_utf8_lossy(&bytes).into_owned()
}

fn salvage(data: &str) -> Vec<u8> {
    let mut cleaned: String = data
        .chars()
        .filter_map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' => Some(c),
            '+' => Some('-'),
            '/' => Some('_'),
            _ => None,
        })
        .collect();

    // A single trailing sextet cannot form a byte.
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }

    URL_SAFE_LENIENT.decode(&cleaned).unwrap_or_default()
}
