//! The inside-out encoder.
//!
//! Wikitext is not context-free; naive tokenization cannot decide how the
//! braces in `{{{{{x}}}}}` group. The encoder repeatedly replaces the
//! innermost balanced construct — `{{…}}`, `{{{…}}}`, `[[…]]`, `[…]`, and
//! `<nowiki>` bodies — with a single reserved codepoint indexing into a
//! per-page cookie table, until a fixed point is reached. The expansion
//! engine and the parser then walk the encoded text outside-in without
//! ambiguity.

use crate::{
    Processor,
    common::{self, MAGIC_NOWIKI, MAX_COOKIES},
};
use regex::Regex;
use std::sync::LazyLock;

/// The kind of construct a cookie stands for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum CookieKind {
    /// A template transclusion or parser function call, `{{…}}`.
    Template,
    /// A template argument reference, `{{{…}}}`.
    Argument,
    /// An internal link, `[[…]]`.
    Link,
    /// An external link (or any single-bracketed text), `[…]`.
    ExtLink,
    /// The body of a `<nowiki>…</nowiki>` region.
    Nowiki,
}

/// One encoded construct.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct Cookie {
    /// What the construct was.
    pub kind: CookieKind,
    /// The pipe-separated pieces of the construct (a single element holding
    /// the body text for nowiki cookies).
    pub args: Vec<String>,
    /// True if a `<nowiki />` occurred inside the construct, which makes the
    /// engine emit it literally instead of processing it.
    pub nowiki: bool,
}

/// Removes HTML-style comments, including an unterminated comment at the end
/// of the text.
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!\s*--.*?--\s*>").unwrap());

/// A `<nowiki>…</nowiki>` pair.
static NOWIKI_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<\s*nowiki\s*>(.*?)<\s*/\s*nowiki\s*>").unwrap());

/// A self-closing `<nowiki />`.
static NOWIKI_SELF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<\s*nowiki\s*/\s*>").unwrap());

/// An internal link whose body contains no nested brackets or braces.
static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?s)\[{MAGIC_NOWIKI}?\[([^\[\]{{}}]+)\]{MAGIC_NOWIKI}?\]")).unwrap()
});

/// An external link: one pair of brackets with no nested brackets, braces,
/// or tags.
static EXT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[([^\[\]{}<>]+)\]").unwrap());

/// A template argument reference whose body contains no braces (a `{|…|}`
/// table inside counts as balanced).
static ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?s)\{{{nw}?\{{{nw}?\{{(([^{{}}]|\{{\|[^{{}}]*\|\}})*?)\}}{nw}?\}}{nw}?\}}",
        nw = MAGIC_NOWIKI
    ))
    .unwrap()
});

/// A template argument reference missing one closing brace, a common enough
/// authoring mistake to deserve heuristic recovery.
static ARG_MISSING_BRACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?s)([^{{])\{{{nw}?\{{{nw}?\{{([^{{}}]*?)\}}{nw}?\}}",
        nw = MAGIC_NOWIKI
    ))
    .unwrap()
});

/// A template or parser function call whose body contains no unmatched
/// braces.
static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?si)\{{{nw}?\{{((\{{\|[^{{}}]*?\|\}}|\}}[^{{}}]|[^{{}}](\{{[^{{}}|])?)+?)\}}{nw}?\}}",
        nw = MAGIC_NOWIKI
    ))
    .unwrap()
});

/// A template call missing one closing brace.
static TEMPLATE_MISSING_BRACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?s)([^{{])\{{{nw}?\{{(([^{{}}]|\{{\|[^{{}}]*\|\}}|\}}[^{{}}])+?)\}}",
        nw = MAGIC_NOWIKI
    ))
    .unwrap()
});

/// Splits on pipes that are not inside a balanced HTML tag pair. The
/// backreference keeps `|` inside constructs like `<math> 1 | 2 </math>`
/// from splitting a template argument.
static VBAR: LazyLock<fancy_regex::Regex> = LazyLock::new(|| {
    fancy_regex::Regex::new(
        r"(?si)\|((<\s*([-a-zA-Z0-9]+)\b[^>]*>[^\[\]{}]*?<\s*/\s*\3\s*>|[^|])*)",
    )
    .unwrap()
});

/// Splits a construct body on unquoted pipes. Pipes inside balanced HTML
/// tags are ignored; pipes inside nested constructs are already cookies by
/// the time this runs.
pub(crate) fn vbar_split(body: &str) -> Vec<String> {
    let text = format!("|{body}");
    VBAR.captures_iter(&text)
        .filter_map(Result::ok)
        .map(|caps| caps.get(1).map_or(String::new(), |m| m.as_str().to_string()))
        .collect()
}

/// Extracts the portion of a template page body that is transcluded.
pub(crate) fn template_to_body(text: &str) -> String {
    /// `<noinclude>…</noinclude>` regions, which never transclude.
    static NOINCLUDE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<\s*noinclude\s*>.*?<\s*/\s*noinclude\s*>").unwrap());
    /// An unclosed `<noinclude>`, which swallows the rest of the body.
    static NOINCLUDE_TAIL: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<\s*noinclude\s*>.*").unwrap());
    /// A self-closing `<noinclude />`.
    static NOINCLUDE_SELF: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<\s*noinclude\s*/\s*>").unwrap());
    /// An unclosed comment at the end of a template body is ignored.
    static COMMENT_TAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!\s*--.*").unwrap());
    /// `<onlyinclude>` regions; when present they are the only transcluded
    /// text.
    static ONLYINCLUDE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<\s*onlyinclude\s*>(.*?)<\s*/\s*onlyinclude\s*>|<\s*onlyinclude\s*/\s*>")
            .unwrap()
    });
    /// `<includeonly>` open/close tags are dropped, keeping their contents.
    static INCLUDEONLY: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<\s*(/\s*)?includeonly\s*(/\s*)?>").unwrap());

    let text = COMMENT.replace_all(text, "");
    let text = NOINCLUDE.replace_all(&text, "");
    let text = NOINCLUDE_TAIL.replace_all(&text, "");
    let text = NOINCLUDE_SELF.replace_all(&text, "");
    let text = COMMENT_TAIL.replace_all(&text, "");

    let onlys = ONLYINCLUDE.captures_iter(&text).collect::<Vec<_>>();
    let text = if onlys.is_empty() {
        text.to_string()
    } else {
        onlys
            .iter()
            .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
            .collect::<String>()
    };

    INCLUDEONLY.replace_all(&text, "").into_owned()
}

impl Processor {
    /// Allocates a cookie for a construct, returning its reserved codepoint
    /// as a one-character string. Identical cookies are deduplicated through
    /// the reverse map.
    pub(crate) fn save_value(&mut self, kind: CookieKind, args: Vec<String>, nowiki: bool) -> String {
        let cookie = Cookie { kind, args, nowiki };
        if let Some(&index) = self.cookie_rev.get(&cookie) {
            return common::cookie_char(index).to_string();
        }
        let index = self.cookies.len();
        if index >= MAX_COOKIES {
            self.error("too many templates, arguments, or parser function calls", None);
            return String::new();
        }
        self.cookie_rev.insert(cookie.clone(), index);
        self.cookies.push(cookie);
        common::cookie_char(index).to_string()
    }

    /// Preprocesses page text: `<nowiki>` bodies become cookies (with
    /// character entities decoded, so the finalizer can re-quote them
    /// uniformly), self-closing `<nowiki />` becomes the reserved
    /// [`MAGIC_NOWIKI`] codepoint, and comments are removed.
    pub(crate) fn preprocess_text(&mut self, text: &str) -> String {
        let text = NOWIKI_PAIR
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let body = html_escape::decode_html_entities(&caps[1]).into_owned();
                self.save_value(CookieKind::Nowiki, vec![body], false)
            })
            .into_owned();
        let text = NOWIKI_SELF.replace_all(&text, MAGIC_NOWIKI.to_string());
        COMMENT.replace_all(&text, "").into_owned()
    }

    /// Encodes all templates, template arguments, links, and parser function
    /// calls in the text, innermost first.
    pub(crate) fn encode(&mut self, text: &str) -> String {
        let mut text = COMMENT.replace_all(text, "").into_owned();

        loop {
            let prev = text.clone();

            // Arguments must reach a fixed point before templates are tried,
            // because otherwise the two innermost braces of an argument
            // reference would encode as a transclusion.
            loop {
                let prev2 = text.clone();

                // Links first; they affect how pipes inside templates split.
                loop {
                    let next = self.replace_constructs(&LINK, &text, CookieKind::Link, None);
                    if next == text {
                        break;
                    }
                    text = next;
                }
                text = self.replace_constructs(&EXT_LINK, &text, CookieKind::ExtLink, None);
                text = self.replace_constructs(&ARG, &text, CookieKind::Argument, None);

                if text == prev2 {
                    // Heuristic recovery: an argument reference with one
                    // missing closing brace. This must run before templates,
                    // or the malformed argument would encode as one.
                    text = self.replace_constructs(
                        &ARG_MISSING_BRACE,
                        &text,
                        CookieKind::Argument,
                        Some("template argument"),
                    );
                    if text != prev2 {
                        continue;
                    }
                    break;
                }
            }

            text = self.replace_constructs(&TEMPLATE, &text, CookieKind::Template, None);

            if text == prev {
                // Heuristic recovery for a template call with one missing
                // closing brace. Tables `{|…|}` must be allowed inside.
                text = self.replace_constructs(
                    &TEMPLATE_MISSING_BRACE,
                    &text,
                    CookieKind::Template,
                    Some("template"),
                );
                if text != prev {
                    continue;
                }
                break;
            }
        }
        text
    }

    /// Runs one `replace_all` pass for a construct regex. When `recovered`
    /// is set, the pattern is a missing-brace form whose first group is a
    /// prefix to retain, and a debug note names the recovered construct.
    fn replace_constructs(
        &mut self,
        re: &Regex,
        text: &str,
        kind: CookieKind,
        recovered: Option<&str>,
    ) -> String {
        re.replace_all(text, |caps: &regex::Captures<'_>| {
            let nowiki = caps[0].contains(MAGIC_NOWIKI);
            let (prefix, body) = if recovered.is_some() {
                (caps.get(1).map_or("", |m| m.as_str()), &caps[2])
            } else {
                ("", &caps[1])
            };
            let args = vbar_split(body);
            if let Some(what) = recovered {
                let name = args.first().map_or("", |arg| arg.trim());
                self.debug(format!("heuristically added missing }}}} to {what} {name}"), None);
            }
            format!("{prefix}{}", self.save_value(kind, args, nowiki))
        })
        .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Processor;

    fn processor() -> Processor {
        let mut ctx = Processor::new().unwrap();
        ctx.start_page("Tt");
        ctx
    }

    #[test]
    fn vbar_split_basic() {
        assert_eq!(vbar_split("a|b|c"), ["a", "b", "c"]);
        assert_eq!(vbar_split("a"), ["a"]);
        assert_eq!(vbar_split("a||b"), ["a", "", "b"]);
    }

    #[test]
    fn vbar_split_html_balanced() {
        assert_eq!(
            vbar_split("x <math> 1 | 2 </math> y"),
            ["x <math> 1 | 2 </math> y"]
        );
        assert_eq!(
            vbar_split("a|<span class=\"x\">b|c</span>|d"),
            ["a", "<span class=\"x\">b|c</span>", "d"]
        );
    }

    #[test]
    fn encode_simple_template() {
        let mut ctx = processor();
        let out = ctx.encode("a{{foo|bar}}b");
        let chars = out.chars().collect::<Vec<_>>();
        assert_eq!(chars.len(), 3);
        assert_eq!(chars[0], 'a');
        assert_eq!(chars[2], 'b');
        let idx = crate::common::cookie_index(chars[1]).unwrap();
        let cookie = &ctx.cookies[idx];
        assert_eq!(cookie.kind, CookieKind::Template);
        assert_eq!(cookie.args, ["foo", "bar"]);
        assert!(!cookie.nowiki);
    }

    #[test]
    fn encode_dedupes_identical() {
        let mut ctx = processor();
        let out = ctx.encode("{{foo}}{{foo}}");
        let chars = out.chars().collect::<Vec<_>>();
        assert_eq!(chars.len(), 2);
        assert_eq!(chars[0], chars[1]);
        assert_eq!(ctx.cookies.len(), 1);
    }

    #[test]
    fn encode_sextuple_braces_nest_as_args() {
        let mut ctx = processor();
        let out = ctx.encode("{{{{{{x}}}}}}");
        let chars = out.chars().collect::<Vec<_>>();
        assert_eq!(chars.len(), 1);
        let outer = &ctx.cookies[crate::common::cookie_index(chars[0]).unwrap()];
        assert_eq!(outer.kind, CookieKind::Argument);
        let inner_char = outer.args[0].chars().next().unwrap();
        let inner = &ctx.cookies[crate::common::cookie_index(inner_char).unwrap()];
        assert_eq!(inner.kind, CookieKind::Argument);
        assert_eq!(inner.args, ["x"]);
    }

    #[test]
    fn encode_link_protects_pipe() {
        let mut ctx = processor();
        let out = ctx.encode("{{foo|[[a|b]]}}");
        let chars = out.chars().collect::<Vec<_>>();
        assert_eq!(chars.len(), 1);
        let tmpl = ctx.cookies[crate::common::cookie_index(chars[0]).unwrap()].clone();
        assert_eq!(tmpl.kind, CookieKind::Template);
        assert_eq!(tmpl.args.len(), 2);
        assert_eq!(tmpl.args[0], "foo");
        let link_char = tmpl.args[1].chars().next().unwrap();
        let link = &ctx.cookies[crate::common::cookie_index(link_char).unwrap()];
        assert_eq!(link.kind, CookieKind::Link);
        assert_eq!(link.args, ["a", "b"]);
    }

    #[test]
    fn encode_recovers_missing_brace() {
        let mut ctx = processor();
        let out = ctx.encode("a{{foo|bar}b");
        assert!(out.starts_with('a'));
        assert_eq!(ctx.cookies.len(), 1);
        assert_eq!(ctx.cookies[0].args[0], "foo");
        assert_eq!(ctx.to_return().debugs.len(), 1);
    }

    #[test]
    fn preprocess_nowiki_and_comments() {
        let mut ctx = processor();
        assert_eq!(ctx.preprocess_text("a<!-- foo\n -- bar\n- bar\n--- bar\n-- -->b"), "ab");
        assert_eq!(
            ctx.preprocess_text("a<nowiki />b"),
            format!("a{MAGIC_NOWIKI}b")
        );
        assert_eq!(ctx.preprocess_text("<nowiki />"), MAGIC_NOWIKI.to_string());

        let out = ctx.preprocess_text("x<nowiki>{{not a template}}</nowiki>y");
        let inner = out.chars().nth(1).unwrap();
        let cookie = &ctx.cookies[crate::common::cookie_index(inner).unwrap()];
        assert_eq!(cookie.kind, CookieKind::Nowiki);
        assert_eq!(cookie.args, ["{{not a template}}"]);
    }

    #[test]
    fn template_body_extraction() {
        assert_eq!(template_to_body("a<noinclude>b</noinclude>c"), "ac");
        assert_eq!(template_to_body("a<noinclude>b"), "a");
        assert_eq!(template_to_body("a<includeonly>b</includeonly>c"), "abc");
        assert_eq!(
            template_to_body("junk<onlyinclude>keep</onlyinclude>junk<onlyinclude>this</onlyinclude>"),
            "keepthis"
        );
        assert_eq!(template_to_body("a<!-- unterminated"), "a");
    }
}
