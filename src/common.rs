//! Definitions shared between the expansion engine and the parser: the
//! reserved codepoint ranges used for encoding, nowiki escaping, and the
//! user-visible error marker format.

use std::borrow::Cow;

/// Reserved codepoint standing for a self-closing `<nowiki />` tag.
///
/// The whole reserved block lives in the Unicode private use area
/// U+100000..U+10FFFF and is assumed to never occur in page text.
pub(crate) const MAGIC_NOWIKI: char = '\u{10203d}';

/// Reserved codepoint used to temporarily mask single quotes inside HTML
/// opening tags so the tokenizer does not read them as bold/italic markers.
pub(crate) const MAGIC_SQUOTE: char = '\u{10203c}';

/// First codepoint of the cookie index range.
pub(crate) const MAGIC_FIRST: u32 = 0x0010_203e;

/// Last codepoint of the cookie index range (inclusive).
pub(crate) const MAGIC_LAST: u32 = 0x0010_fff0;

/// Maximum number of cookies that can be allocated for a single page.
pub(crate) const MAX_COOKIES: usize = (MAGIC_LAST - MAGIC_FIRST + 1) as usize;

/// Returns the cookie table index encoded by `c`, or `None` if `c` is not in
/// the reserved range.
#[inline]
pub(crate) fn cookie_index(c: char) -> Option<usize> {
    let c = u32::from(c);
    (MAGIC_FIRST..=MAGIC_LAST)
        .contains(&c)
        .then(|| (c - MAGIC_FIRST) as usize)
}

/// Returns the reserved codepoint for the cookie table index `index`.
///
/// The caller must have checked the index against [`MAX_COOKIES`].
#[inline]
pub(crate) fn cookie_char(index: usize) -> char {
    debug_assert!(index < MAX_COOKIES);
    char::from_u32(MAGIC_FIRST + u32::try_from(index).unwrap_or_default())
        .expect("cookie index out of reserved range")
}

/// Quick check for any codepoint from the reserved plane. Every reserved
/// codepoint encodes with a 0xF4 lead byte, which never occurs in ordinary
/// page text, so most strings are rejected with a single scan.
#[inline]
pub(crate) fn has_reserved(text: &str) -> bool {
    memchr::memchr(0xF4, text.as_bytes()).is_some()
}

/// Quotes text that appeared inside `<nowiki>…</nowiki>` by replacing every
/// syntactically meaningful character with a named character entity, so that
/// the text survives any subsequent expansion and parsing untouched.
pub(crate) fn nowiki_quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ';' => out += "&semi;",
            '&' => out += "&amp;",
            '=' => out += "&equals;",
            '<' => out += "&lt;",
            '>' => out += "&gt;",
            '*' => out += "&ast;",
            '#' => out += "&num;",
            ':' => out += "&colon;",
            '!' => out += "&excl;",
            '|' => out += "&vert;",
            '[' => out += "&lsqb;",
            ']' => out += "&rsqb;",
            '{' => out += "&lbrace;",
            '}' => out += "&rbrace;",
            '"' => out += "&quot;",
            '\'' => out += "&apos;",
            c => out.push(c),
        }
    }
    out
}

/// Formats a user-visible error marker.
///
/// All errors that end up in rendered output use this HTML fragment form so
/// that downstream consumers can highlight them (and `#iferror` can detect
/// them).
pub(crate) fn error_marker(message: impl AsRef<str>) -> String {
    format!("<strong class=\"error\">{}</strong>", message.as_ref())
}

/// Collapses runs of whitespace into a single space and trims the ends.
pub(crate) fn collapse_spaces(text: &str) -> Cow<'_, str> {
    if text.chars().any(|c| c.is_whitespace() && c != ' ')
        || text.contains("  ")
        || text.starts_with(' ')
        || text.ends_with(' ')
    {
        Cow::Owned(text.split_whitespace().collect::<Vec<_>>().join(" "))
    } else {
        Cow::Borrowed(text)
    }
}

/// Uppercases only the first character of `s`, leaving the rest alone.
pub(crate) fn capitalize_first(s: &str) -> Cow<'_, str> {
    match s.chars().next() {
        Some(first) if !first.is_uppercase() => {
            let mut out = String::with_capacity(s.len());
            out.extend(first.to_uppercase());
            out += &s[first.len_utf8()..];
            Cow::Owned(out)
        }
        _ => Cow::Borrowed(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_every_special() {
        assert_eq!(
            nowiki_quote("a=<>*#:!|[]{}\"'b"),
            "a&equals;&lt;&gt;&ast;&num;&colon;&excl;&vert;&lsqb;&rsqb;&lbrace;&rbrace;&quot;&apos;b"
        );
        assert_eq!(nowiki_quote("a\nb\nc"), "a\nb\nc");
        assert_eq!(nowiki_quote("&amp;"), "&amp;amp&semi;");
    }

    #[test]
    fn cookie_round_trip() {
        assert_eq!(cookie_index(cookie_char(0)), Some(0));
        assert_eq!(cookie_index(cookie_char(1234)), Some(1234));
        assert_eq!(cookie_index('a'), None);
        assert_eq!(cookie_index(MAGIC_NOWIKI), None);
    }

    #[test]
    fn collapse() {
        assert_eq!(collapse_spaces("a  b"), "a b");
        assert_eq!(collapse_spaces(" a\tb "), "a b");
        assert_eq!(collapse_spaces("a b"), Cow::Borrowed("a b"));
    }
}
