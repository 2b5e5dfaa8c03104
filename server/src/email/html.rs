use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<.*?>").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lossy HTML to text for previews: drops tags, decodes entities and collapses
/// whitespace. No DOM is built.
pub fn strip_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let text = RE_TAG.replace_all(html, "");
    let text = decode_entities(&text);
    collapse_whitespace(&text)
}

pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Full HTML5 entity table, including the legacy forms written without `;`.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    htmlize::unescape(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_basic() {
        assert_eq!(strip_html("<b>Hi</b> &amp; bye"), "Hi & bye");
    }

    #[test]
    fn test_strip_html_multiline_tags_and_whitespace() {
        let html = "<div\n class=\"x\">\n  Hello\t\t<a href='#'>world</a>\n</div>";
        assert_eq!(strip_html(html), "Hello world");
    }

    #[test]
    fn test_strip_html_empty() {
        assert_eq!(strip_html(""), "");
        assert_eq!(strip_html("<br/><hr>"), "");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("it&#39;s &lt;ok&gt;"), "it's <ok>");
        assert_eq!(decode_entities("&#x41;&#X42;"), "AB");
        assert_eq!(decode_entities("&copy; 2024"), "© 2024");
    }

    #[test]
    fn test_unknown_entities_are_kept() {
        assert_eq!(decode_entities("&bogus; & friends"), "&bogus; & friends");
    }

    #[test]
    fn test_out_of_range_code_point_is_replaced() {
        assert_eq!(decode_entities("&#1114112;"), "\u{fffd}");
    }

    #[test]
    fn test_accented_and_symbol_entities() {
        assert_eq!(strip_html("<p>Caf&eacute;</p>"), "Café");
        assert_eq!(decode_entities("Gr&uuml;&szlig;e &rarr; Z&uuml;rich"), "Grüße → Zürich");
    }

    #[test]
    fn test_legacy_entities_without_semicolon() {
        assert_eq!(strip_html("Tom &amp Jerry &copy 2024"), "Tom & Jerry © 2024");
    }

    #[test]
    fn test_nbsp_collapses_to_space() {
        assert_eq!(strip_html("a&nbsp;&nbsp;b"), "a b");
    }
}
