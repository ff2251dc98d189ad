//! The parser function library.
//!
//! Each function is a pure mapping from its (unexpanded) arguments and an
//! argument expander to output text. Argument expansion is deferred to the
//! functions themselves because the conditionals must only expand the branch
//! they select.

use crate::{
    Processor,
    common::{capitalize_first, collapse_spaces, error_marker, nowiki_quote},
    expand::ArgExpander,
    expr,
    parser::html,
    title::NAMESPACES,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use std::sync::LazyLock;

pub(crate) mod time;

/// The implementation type of one parser function.
type ParserFn = fn(&mut Processor, &str, &[String], &ArgExpander<'_>) -> String;

/// A parser function table entry.
pub(crate) struct FnSpec {
    /// The implementation.
    call: ParserFn,
    /// True if the function receives `name=value` arguments keyed instead
    /// of positionally (only `#categorytree`).
    keyed: bool,
}

/// Shorthand for a positional [`FnSpec`].
const fn spec(call: ParserFn) -> FnSpec {
    FnSpec { call, keyed: false }
}

/// Canonicalises a parser function name: underscores become spaces,
/// whitespace collapses, and names outside the predefined set are
/// lowercased (unknown names match case-insensitively, predefined ones
/// keep their case).
pub(crate) fn canonicalize_name(name: &str) -> String {
    let name = name.replace('_', " ");
    let name = collapse_spaces(&name).into_owned();
    if PARSER_FUNCTIONS.contains_key(name.as_str()) {
        name
    } else {
        name.to_lowercase()
    }
}

/// Returns true if `name` is a recognized parser function or predefined
/// variable.
pub(crate) fn is_known(name: &str) -> bool {
    PARSER_FUNCTIONS.contains_key(name)
}

/// Calls the parser function `fn_name`. Unknown functions report an error
/// and produce empty output.
pub(crate) fn call(
    ctx: &mut Processor,
    fn_name: &str,
    args: &[String],
    exp: &ArgExpander<'_>,
) -> String {
    let Some(spec) = PARSER_FUNCTIONS.get(fn_name) else {
        ctx.error(format!("unrecognized parser function {fn_name:?}"), None);
        return String::new();
    };
    if spec.keyed {
        // #categorytree is the only keyed function; it ignores its
        // arguments, so no name=value splitting happens before the call
        return (spec.call)(ctx, fn_name, args, exp);
    }
    (spec.call)(ctx, fn_name, args, exp)
}

/// Expands argument `i`, or returns an empty string if it is absent.
fn arg(ctx: &mut Processor, exp: &ArgExpander<'_>, args: &[String], i: usize) -> String {
    args.get(i).map_or_else(String::new, |arg| exp.expand(ctx, arg))
}

/// Expands and trims argument `i`.
fn arg_trim(ctx: &mut Processor, exp: &ArgExpander<'_>, args: &[String], i: usize) -> String {
    arg(ctx, exp, args, i).trim().to_string()
}

// ---------------------------------------------------------------------------
// Control flow

/// `#if`: non-empty test selects the then-branch.
fn if_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    if arg_trim(ctx, exp, args, 0).is_empty() {
        arg_trim(ctx, exp, args, 2)
    } else {
        arg_trim(ctx, exp, args, 1)
    }
}

/// `#ifeq`: string equality after expansion and trim.
fn ifeq_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    if arg_trim(ctx, exp, args, 0) == arg_trim(ctx, exp, args, 1) {
        arg_trim(ctx, exp, args, 2)
    } else {
        arg_trim(ctx, exp, args, 3)
    }
}

/// `#iferror`: selects on whether the first argument expanded to an error
/// marker.
fn iferror_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    static ERROR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"<[^>]*?\sclass="error""#).unwrap());
    let value = arg(ctx, exp, args, 0);
    if ERROR.is_match(&value) {
        if args.len() >= 2 { arg_trim(ctx, exp, args, 1) } else { String::new() }
    } else if args.len() >= 3 {
        arg_trim(ctx, exp, args, 2)
    } else {
        value
    }
}

/// `#ifexpr`: evaluates the expression and selects on non-zero.
///
/// Truthiness goes through the formatted result the way `#expr` prints it:
/// only a value that reads back as a non-zero integer selects the
/// then-branch, so fractional and erroneous results count as false.
fn ifexpr_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let cond = arg_trim(ctx, exp, args, 0).to_lowercase();
    let formatted = match expr::evaluate(&cond) {
        Ok(Some(value)) => expr::format_number(value),
        _ => String::new(),
    };
    let truthy = formatted.parse::<i64>().is_ok_and(|value| value != 0);
    if truthy {
        arg_trim(ctx, exp, args, 1)
    } else {
        arg_trim(ctx, exp, args, 2)
    }
}

/// `#ifexist`: selects on whether the named page exists in the store.
fn ifexist_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let title = arg_trim(ctx, exp, args, 0);
    if ctx.page_exists(&title) {
        arg_trim(ctx, exp, args, 1)
    } else {
        arg_trim(ctx, exp, args, 2)
    }
}

/// `#switch`: matches the subject against each case, with `#default` and
/// fall-through for bare case values.
fn switch_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let subject = arg_trim(ctx, exp, args, 0);
    let mut match_next = false;
    let mut default = None;
    let mut last = None;
    for case in &args[1..] {
        let Some((key, value)) = case.split_once('=') else {
            // A bare case is remembered; it matches if the next case with a
            // value matches, and is the result if it ends the list.
            let expanded = exp.expand(ctx, case).trim().to_string();
            if expanded == subject {
                match_next = true;
            }
            last = Some(expanded);
            continue;
        };
        let key_expanded = exp.expand(ctx, key).trim().to_string();
        if key_expanded == subject || match_next {
            return exp.expand(ctx, value).trim().to_string();
        }
        if key_expanded == "#default" {
            default = Some(value.clone());
        }
        last = None;
    }
    if let Some(default) = default {
        return exp.expand(ctx, &default).trim().to_string();
    }
    last.unwrap_or_default()
}

/// `#expr`: the expression calculator.
fn expr_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let text = arg_trim(ctx, exp, args, 0).to_lowercase();
    match expr::evaluate(&text) {
        Ok(None) => String::new(),
        Ok(Some(value)) => expr::format_number(value),
        Err(expr::Error::DivisionByZero(_)) => "Divide by zero".to_string(),
        Err(err) => error_marker(format!("Expression error near {}", err.near())),
    }
}

// ---------------------------------------------------------------------------
// Title and namespace

/// Namespace prefixes recognized in page titles for the TALKSPACE-family
/// functions.
static NAMESPACE_PREFIXES: phf::Set<&'static str> = phf::phf_set! {
    "Appendix", "Category", "Citations", "Concordance", "File", "Help",
    "Image", "Index", "Media", "MediaWiki", "Module", "Project",
    "Reconstruction", "Rhymes", "Sign gloss", "Summary", "Talk", "Template",
    "Thesaurus", "Thread", "User", "Wiktionary",
};

/// The title argument, or the current page title when absent, with
/// whitespace normalized.
fn title_arg(ctx: &mut Processor, exp: &ArgExpander<'_>, args: &[String]) -> String {
    let t = if args.is_empty() {
        ctx.current_title()
    } else {
        arg(ctx, exp, args, 0)
    };
    collapse_spaces(&t).into_owned()
}

/// `FULLPAGENAME`: the title including its namespace, with the namespace
/// capitalized.
fn fullpagename_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    match t.find(':') {
        Some(0) => t[1..].to_string(),
        Some(ofs) => format!("{}:{}", capitalize_first(&t[..ofs]), &t[ofs + 1..]),
        None => t,
    }
}

/// `PAGENAME`: the title without its namespace prefix.
fn pagename_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    match t.find(':') {
        Some(ofs) => t[ofs + 1..].to_string(),
        None => t,
    }
}

/// `BASEPAGENAME`: the parent page of a subpage, without namespace.
fn basepagename_fn(ctx: &mut Processor, fn_name: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    let t = t.rfind('/').map_or(t.as_str(), |ofs| &t[..ofs]).to_string();
    pagename_fn(ctx, fn_name, &[t], &ArgExpander::Identity)
}

/// `ROOTPAGENAME`: the topmost page of a subpage tree, without namespace.
fn rootpagename_fn(ctx: &mut Processor, fn_name: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    let t = t.find('/').map_or(t.as_str(), |ofs| &t[..ofs]).to_string();
    pagename_fn(ctx, fn_name, &[t], &ArgExpander::Identity)
}

/// `SUBPAGENAME`: the final component of a subpage.
fn subpagename_fn(ctx: &mut Processor, fn_name: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    match t.rfind('/') {
        Some(ofs) => t[ofs + 1..].to_string(),
        None => pagename_fn(ctx, fn_name, &[t], &ArgExpander::Identity),
    }
}

/// `TALKPAGENAME`: the talk page for the current page.
fn talkpagename_fn(ctx: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    let title = ctx.current_title();
    match title.split_once(':') {
        Some((prefix, rest)) if NAMESPACE_PREFIXES.contains(prefix) => {
            format!("{prefix}_talk:{rest}")
        }
        _ => format!("Talk:{title}"),
    }
}

/// `NAMESPACE`: the capitalized namespace prefix of the title.
fn namespace_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    match t.find(':') {
        Some(ofs) if ofs > 0 => {
            let ns = capitalize_first(&t[..ofs]).into_owned();
            if ns == "Project" {
                ctx.config.project_name.clone()
            } else {
                ns
            }
        }
        _ => String::new(),
    }
}

/// `NAMESPACENUMBER`: the namespace ID of the title.
fn namespacenumber_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    crate::title::namespace_of(&t, &ctx.config).to_string()
}

/// `SUBJECTSPACE`: the subject namespace prefix of the title.
fn subjectspace_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    NAMESPACE_PREFIXES
        .iter()
        .find(|prefix| t.starts_with(&format!("{prefix}:")))
        .map(|prefix| (*prefix).to_string())
        .unwrap_or_default()
}

/// `TALKSPACE`: the talk namespace prefix for the title.
fn talkspace_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = title_arg(ctx, exp, args);
    NAMESPACE_PREFIXES
        .iter()
        .find(|prefix| t.starts_with(&format!("{prefix}:")))
        .map_or_else(|| "Talk".to_string(), |prefix| format!("{prefix}_talk"))
}

/// `ns:` — namespace name by ID or any of its names, case-insensitively.
fn ns_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = arg_trim(ctx, exp, args, 0);
    let found = if let Ok(id) = t.parse::<i32>() {
        crate::title::Namespace::find_by_id(id)
    } else {
        NAMESPACES.iter().find(|ns| {
            let matches = |name: &str| name.eq_ignore_ascii_case(&t);
            (!ns.name.is_empty() && matches(ns.name))
                || (!ns.canonical.is_empty() && matches(ns.canonical))
                || ns.aliases.iter().any(|alias| matches(alias))
        })
    };
    found.map(|ns| ns.name.to_string()).unwrap_or_default()
}

/// `#titleparts`: splits a title on `:` and `/` and returns a slice of the
/// segments, keeping separators.
fn titleparts_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = arg_trim(ctx, exp, args, 0);
    let count: i64 = arg_trim(ctx, exp, args, 1).parse().unwrap_or(0);
    let first: i64 = arg_trim(ctx, exp, args, 2).parse().unwrap_or(0);

    // Alternating segments and separators, like a capturing split
    let mut tokens: Vec<String> = vec![String::new()];
    for c in t.chars() {
        if c == ':' || c == '/' {
            tokens.push(c.to_string());
            tokens.push(String::new());
        } else {
            tokens.last_mut().unwrap().push(c);
        }
    }

    let num_parts = (tokens.len() as i64 + 1) / 2;
    let first = if first < 0 {
        (num_parts + first).max(0)
    } else {
        first.min(num_parts)
    };
    let count = if count == 0 {
        num_parts
    } else if count < 0 {
        (num_parts + count).max(0)
    } else {
        count
    };

    let start = (2 * first) as usize;
    let end = (2 * (first + count) - 1).clamp(0, tokens.len() as i64) as usize;
    if start >= end {
        return String::new();
    }
    tokens[start..end].concat()
}

// ---------------------------------------------------------------------------
// Server, revision, and display stubs

/// `SERVER`: the protocol-relative server URL.
fn server_fn(ctx: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    format!("//{}", ctx.config.server_name)
}

/// `SERVERNAME`: the bare server host name.
fn servername_fn(ctx: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    ctx.config.server_name.clone()
}

/// `REVISIONID`: a dash, as in MediaWiki’s miser mode.
fn revisionid_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    "-".to_string()
}

/// `REVISIONUSER`: always the anonymous user.
fn revisionuser_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    "AnonymousUser".to_string()
}

/// `DISPLAYTITLE`: recognized for its side effect only, which we do not
/// model.
fn displaytitle_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    String::new()
}

/// `DEFAULTSORT`: category sort key, ignored.
fn defaultsort_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    String::new()
}

// ---------------------------------------------------------------------------
// Text

/// `lc`: lowercase.
fn lc_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    arg_trim(ctx, exp, args, 0).to_lowercase()
}

/// `lcfirst`: lowercase the first character only.
fn lcfirst_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let t = arg_trim(ctx, exp, args, 0);
    match t.chars().next() {
        Some(first) => format!("{}{}", first.to_lowercase(), &t[first.len_utf8()..]),
        None => t,
    }
}

/// `uc`: uppercase.
fn uc_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    arg_trim(ctx, exp, args, 0).to_uppercase()
}

/// `ucfirst`: uppercase the first character only.
fn ucfirst_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    capitalize_first(&arg_trim(ctx, exp, args, 0)).into_owned()
}

/// `formatnum`: thousands separators; `R` reverses, `NOSEP` omits the
/// separator.
fn formatnum_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let value = arg_trim(ctx, exp, args, 0);
    let mode = arg_trim(ctx, exp, args, 1);
    if mode == "R" {
        return value.replace(',', "");
    }
    let sep = if mode == "NOSEP" { "" } else { "," };
    let (integer, fraction) = value.split_once('.').map_or((value.as_str(), None), |(i, f)| (i, Some(f)));
    let digits = integer.as_bytes();
    let mut out = String::with_capacity(value.len() + digits.len() / 3);
    for (i, chunk) in digits.rchunks(3).rev().enumerate() {
        if i != 0 {
            out += sep;
        }
        out += std::str::from_utf8(chunk).unwrap_or_default();
    }
    if let Some(fraction) = fraction {
        out.push('.');
        out += fraction;
    }
    out
}

/// `#len`: length in characters.
fn len_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    arg_trim(ctx, exp, args, 0).chars().count().to_string()
}

/// `#pos`: first occurrence of the needle at or after the offset, or empty.
fn pos_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let haystack = arg_trim(ctx, exp, args, 0);
    let needle = match args.get(1) {
        Some(arg) => {
            let n = exp.expand(ctx, arg);
            if n.is_empty() { " ".to_string() } else { n }
        }
        None => " ".to_string(),
    };
    let offset: usize = arg_trim(ctx, exp, args, 2).parse().unwrap_or(0);
    let chars: Vec<char> = haystack.chars().collect();
    let skipped: String = chars.iter().skip(offset).collect();
    skipped
        .find(&needle)
        .map(|byte| offset + skipped[..byte].chars().count())
        .map(|i| i.to_string())
        .unwrap_or_default()
}

/// `#rpos`: last occurrence of the needle, or `-1`.
fn rpos_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let haystack = arg_trim(ctx, exp, args, 0);
    let needle = match args.get(1) {
        Some(arg) => {
            let n = exp.expand(ctx, arg);
            if n.is_empty() { " ".to_string() } else { n }
        }
        None => " ".to_string(),
    };
    haystack
        .rfind(&needle)
        .map_or_else(|| "-1".to_string(), |byte| haystack[..byte].chars().count().to_string())
}

/// `#sub`: substring with negative indices; a zero length means the rest.
fn sub_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let text = arg_trim(ctx, exp, args, 0);
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len() as i64;

    let mut start: i64 = arg_trim(ctx, exp, args, 1).parse().unwrap_or(0);
    if start < 0 {
        start = (total + start).max(0);
    }
    let start = start.min(total);

    let mut length: i64 = arg_trim(ctx, exp, args, 2).parse().unwrap_or(0);
    if length == 0 {
        length = (total - start).max(0);
    } else if length < 0 {
        length = (total - start + length).max(0);
    }

    chars[start as usize..(start + length).min(total) as usize].iter().collect()
}

/// Pads `value` to `count` characters using `pad`, in the given direction.
fn pad(value: String, count: usize, pad: &str, direction: &str) -> String {
    let len = value.chars().count();
    if len >= count || pad.is_empty() {
        return value;
    }
    let padlen = count - len;
    let filler: String = pad.chars().cycle().take(padlen).collect();
    match direction {
        "right" => format!("{value}{filler}"),
        "center" => {
            let left: String = pad.chars().cycle().take(padlen / 2).collect();
            let right: String = pad.chars().cycle().take(padlen - padlen / 2).collect();
            format!("{left}{value}{right}")
        }
        _ => format!("{filler}{value}"),
    }
}

/// `#pad`: pad with explicit direction argument.
fn pad_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let value = arg_trim(ctx, exp, args, 0);
    let count = arg_trim(ctx, exp, args, 1);
    let padding = arg(ctx, exp, args, 2);
    let padding = if padding.is_empty() { "0".to_string() } else { padding };
    let direction = arg(ctx, exp, args, 3);
    let Ok(count) = count.parse::<usize>() else {
        ctx.warning(format!("pad length is not an integer: {count:?}"), None);
        return value;
    };
    pad(value, count, &padding, &direction)
}

/// `padleft`: zero-pad on the left by default.
fn padleft_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let value = arg(ctx, exp, args, 0);
    let count = arg_trim(ctx, exp, args, 1);
    let padding = arg(ctx, exp, args, 2);
    let padding = if padding.is_empty() { "0".to_string() } else { padding };
    let Ok(count) = count.parse::<usize>() else {
        ctx.warning(format!("pad length is not an integer: {count:?}"), None);
        return value;
    };
    pad(value, count, &padding, "left")
}

/// `padright`: zero-pad on the right by default.
fn padright_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let value = arg(ctx, exp, args, 0);
    let count = arg_trim(ctx, exp, args, 1);
    let padding = arg(ctx, exp, args, 2);
    let padding = if padding.is_empty() { "0".to_string() } else { padding };
    let Ok(count) = count.parse::<usize>() else {
        ctx.warning(format!("pad length is not an integer: {count:?}"), None);
        return value;
    };
    pad(value, count, &padding, "right")
}

/// `#replace`: literal substring replacement.
fn replace_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let text = arg_trim(ctx, exp, args, 0);
    let from = match args.get(1) {
        Some(arg) => {
            let f = exp.expand(ctx, arg);
            if f.is_empty() { " ".to_string() } else { f }
        }
        None => " ".to_string(),
    };
    let to = arg(ctx, exp, args, 2);
    text.replace(&from, &to)
}

/// `#explode`: split on a delimiter and return one piece.
fn explode_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let text = arg_trim(ctx, exp, args, 0);
    let delim = match args.get(1) {
        Some(arg) => {
            let d = exp.expand(ctx, arg);
            if d.is_empty() { " ".to_string() } else { d }
        }
        None => " ".to_string(),
    };
    let position: i64 = arg_trim(ctx, exp, args, 2).parse().unwrap_or(0);
    let limit: i64 = arg_trim(ctx, exp, args, 3).parse().unwrap_or(0);

    let mut parts: Vec<String> = text.split(&delim).map(str::to_string).collect();
    if limit > 0 && parts.len() as i64 > limit {
        let tail = parts.split_off(limit as usize - 1).join(&delim);
        parts.push(tail);
    }
    let position = if position < 0 { parts.len() as i64 + position } else { position };
    if position < 0 || position >= parts.len() as i64 {
        return String::new();
    }
    parts[position as usize].clone()
}

// ---------------------------------------------------------------------------
// URL encoding

/// Characters that survive query-style percent encoding unescaped.
const QUERY_UNRESERVED: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Characters that survive wiki-style percent encoding unescaped.
const WIKI_SAFE: AsciiSet = QUERY_UNRESERVED.remove(b'/').remove(b':');

/// Query-form encoding: spaces become `+`.
pub(crate) fn quote_plus(text: &str) -> String {
    utf8_percent_encode(text, &QUERY_UNRESERVED)
        .to_string()
        .replace("%20", "+")
}

/// Path-form encoding: everything but unreserved characters is escaped.
fn quote_path(text: &str) -> String {
    utf8_percent_encode(text, &QUERY_UNRESERVED).to_string()
}

/// Wiki-form encoding: whitespace runs become underscores, `/` and `:`
/// survive.
pub(crate) fn wiki_urlencode(text: &str) -> String {
    static WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
    let text = WS.replace_all(text, "_");
    utf8_percent_encode(&text, &WIKI_SAFE).to_string()
}

/// `urlencode`: QUERY (default), WIKI, and PATH forms.
fn urlencode_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let url = arg(ctx, exp, args, 0).trim().to_string();
    match arg(ctx, exp, args, 1).as_str() {
        "PATH" => quote_path(&url),
        "WIKI" => wiki_urlencode(&url),
        _ => quote_plus(&url),
    }
}

/// `#urldecode`: reverses query-form encoding.
fn urldecode_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let text = arg_trim(ctx, exp, args, 0).replace('+', " ");
    percent_encoding::percent_decode_str(&text)
        .decode_utf8_lossy()
        .into_owned()
}

/// `anchorencode`: spaces become underscores and quote-like characters are
/// percent-encoded with `%` replaced by `.`.
fn anchorencode_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    static WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
    let anchor = arg_trim(ctx, exp, args, 0);
    let anchor = WS.replace_all(&anchor, "_");
    let mut out = String::with_capacity(anchor.len());
    for c in anchor.chars() {
        if matches!(c, '\'' | '"' | '<' | '>') {
            let mut buf = [0_u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push('.');
                out += &format!("{byte:02X}");
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `localurl`: a site-relative URL for the title.
fn localurl_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let title = if args.is_empty() {
        ctx.current_title()
    } else {
        arg_trim(ctx, exp, args, 0)
    };
    let query = arg_trim(ctx, exp, args, 1);
    if query.is_empty() {
        format!("/wiki/{}", wiki_urlencode(&title))
    } else {
        format!("/w/index.php?title={}&{query}", quote_plus(&title))
    }
}

/// `fullurl`: a protocol-relative URL for the title. Known interwiki
/// prefixes map through the configured table; unknown prefixes stay in the
/// title path.
fn fullurl_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let title = arg_trim(ctx, exp, args, 0);
    let base = title
        .split_once(':')
        .and_then(|(prefix, rest)| {
            let prefix = prefix.trim().to_lowercase();
            ctx.config
                .interwiki
                .iter()
                .find(|(known, _)| *known == prefix)
                .map(|(_, base)| format!("{base}{}", wiki_urlencode(rest.trim())))
        })
        .unwrap_or_else(|| {
            format!("//{}/wiki/{}", ctx.config.server_name, wiki_urlencode(&title))
        });

    let mut query = String::new();
    for arg_text in &args[1..] {
        let expanded = exp.expand(ctx, arg_text).trim().to_string();
        query.push(if query.is_empty() { '?' } else { '&' });
        match expanded.split_once('=') {
            Some((key, value)) => {
                query += &format!("{}={}", quote_plus(key), quote_plus(value));
            }
            None => query += &quote_plus(&expanded),
        }
    }
    format!("{base}{query}")
}

// ---------------------------------------------------------------------------
// Transclusion helpers

/// `#tag`: builds an extension tag, escaping attribute values; `nowiki`
/// content is character-entity encoded instead.
fn tag_fn(ctx: &mut Processor, fn_name: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    static ATTR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"(?s)^([^=<>'"]+)=(.*)$"#).unwrap());

    let tag = arg(ctx, exp, args, 0).trim().to_lowercase();
    if !html::is_allowed(&tag) && tag != "nowiki" {
        ctx.warning(format!("#tag creating non-allowed tag <{tag}> - omitted"), None);
        return format!("{{{{{fn_name}:{}}}}}", args.join("|"));
    }

    let content = arg(ctx, exp, args, 1);
    if tag == "nowiki" {
        return nowiki_quote(&content);
    }

    let mut attrs = String::new();
    for arg_text in args.iter().skip(2) {
        let expanded = exp.expand(ctx, arg_text);
        let Some(caps) = ATTR.captures(&expanded) else {
            ctx.warning(format!("invalid attribute format {expanded:?} missing name"), None);
            continue;
        };
        let name = &caps[1];
        let value = &caps[2];
        let value = if value.starts_with('"') || value.starts_with('\'') {
            value.to_string()
        } else {
            format!("\"{}\"", html_escape::encode_double_quoted_attribute(value))
        };
        attrs += &format!(" {name}={value}");
    }

    if content.is_empty() {
        format!("<{tag}{attrs} />")
    } else {
        format!("<{tag}{attrs}>{content}</{tag}>")
    }
}

/// `#lst` (alias `#section` and friends): extracts labeled sections from
/// another page, concatenating all occurrences.
fn lst_fn(ctx: &mut Processor, fn_name: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let page_title = arg_trim(ctx, exp, args, 0);
    let chapter = arg_trim(ctx, exp, args, 1);
    let Some(text) = ctx.read_by_title(&page_title) else {
        ctx.warning(
            format!(
                "{fn_name} trying to transclude chapter {chapter:?} from non-existent page {page_title:?}"
            ),
            None,
        );
        return String::new();
    };

    let escaped = regex::escape(&chapter);
    let re = Regex::new(&format!(
        r"(?si)<\s*section\s+begin={escaped}\s*/\s*>(.*?)<\s*section\s+end={escaped}\s*/\s*>"
    ))
    .expect("section regex");
    let parts: Vec<&str> = re.captures_iter(&text).filter_map(|caps| caps.get(1)).map(|m| m.as_str()).collect();
    if parts.is_empty() {
        ctx.warning(
            format!("{fn_name} could not find chapter {chapter:?} on page {page_title:?}"),
            None,
        );
    }
    parts.concat()
}

/// `#categorytree`: recognized (with keyed arguments) and ignored.
fn categorytree_fn(_: &mut Processor, _: &str, _: &[String], _: &ArgExpander<'_>) -> String {
    String::new()
}

/// `plural`: selects singular or plural wording from a numeric expression.
fn plural_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let value = arg_trim(ctx, exp, args, 0).to_lowercase();
    let one = matches!(expr::evaluate(&value), Ok(Some(value)) if value == 1.0);
    if one {
        arg_trim(ctx, exp, args, 1)
    } else {
        arg_trim(ctx, exp, args, 2)
    }
}

/// `#statements`: consults the injected Wikidata lookup, if any.
fn statements_fn(ctx: &mut Processor, _: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    let expanded: Vec<String> = args.iter().map(|arg| exp.expand(ctx, arg)).collect();
    if let Some(lookup) = ctx.statements_lookup.clone() {
        return lookup(&expanded).unwrap_or_default();
    }
    String::new()
}

/// Placeholder for parser functions we recognize but do not model: reports
/// an error and emits the call unexpanded.
fn unimplemented_fn(ctx: &mut Processor, fn_name: &str, args: &[String], _: &ArgExpander<'_>) -> String {
    ctx.error(format!("unimplemented parser function {fn_name}"), None);
    format!("{{{{{fn_name}:{}}}}}", args.join("|"))
}

/// The predefined parser function and variable table. Names here match
/// case-sensitively; anything else is lowercased before lookup.
pub(crate) static PARSER_FUNCTIONS: phf::Map<&'static str, FnSpec> = phf::phf_map! {
    "FULLPAGENAME" => spec(fullpagename_fn),
    "PAGENAME" => spec(pagename_fn),
    "BASEPAGENAME" => spec(basepagename_fn),
    "ROOTPAGENAME" => spec(rootpagename_fn),
    "SUBPAGENAME" => spec(subpagename_fn),
    "ARTICLEPAGENAME" => spec(unimplemented_fn),
    "SUBJECTPAGENAME" => spec(unimplemented_fn),
    "TALKPAGENAME" => spec(talkpagename_fn),
    "NAMESPACENUMBER" => spec(namespacenumber_fn),
    "NAMESPACE" => spec(namespace_fn),
    "ARTICLESPACE" => spec(unimplemented_fn),
    "SUBJECTSPACE" => spec(subjectspace_fn),
    "TALKSPACE" => spec(talkspace_fn),
    "FULLPAGENAMEE" => spec(fullpagenamee_fn),
    "PAGENAMEE" => spec(pagenamee_fn),
    "BASEPAGENAMEE" => spec(unimplemented_fn),
    "ROOTPAGENAMEE" => spec(rootpagenamee_fn),
    "SUBPAGENAMEE" => spec(unimplemented_fn),
    "ARTICLEPAGENAMEE" => spec(unimplemented_fn),
    "SUBJECTPAGENAMEE" => spec(unimplemented_fn),
    "TALKPAGENAMEE" => spec(unimplemented_fn),
    "NAMESPACENUMBERE" => spec(unimplemented_fn),
    "NAMESPACEE" => spec(unimplemented_fn),
    "ARTICLESPACEE" => spec(unimplemented_fn),
    "SUBJECTSPACEE" => spec(unimplemented_fn),
    "TALKSPACEE" => spec(unimplemented_fn),
    "SHORTDESC" => spec(unimplemented_fn),
    "SITENAME" => spec(unimplemented_fn),
    "SERVER" => spec(server_fn),
    "SERVERNAME" => spec(servername_fn),
    "SCRIPTPATH" => spec(unimplemented_fn),
    "CURRENTVERSION" => spec(unimplemented_fn),
    "CURRENTYEAR" => spec(time::currentyear_fn),
    "CURRENTMONTH" => spec(time::currentmonth_fn),
    "CURRENTMONTH1" => spec(time::currentmonth1_fn),
    "CURRENTMONTHNAME" => spec(time::currentmonthname_fn),
    "CURRENTMONTHABBREV" => spec(time::currentmonthabbrev_fn),
    "CURRENTDAY" => spec(time::currentday_fn),
    "CURRENTDAY2" => spec(time::currentday2_fn),
    "CURRENTDOW" => spec(time::currentdow_fn),
    "CURRENTDAYNAME" => spec(unimplemented_fn),
    "CURRENTTIME" => spec(unimplemented_fn),
    "CURRENTHOUR" => spec(unimplemented_fn),
    "CURRENTWEEK" => spec(unimplemented_fn),
    "CURRENTTIMESTAMP" => spec(unimplemented_fn),
    "LOCALYEAR" => spec(unimplemented_fn),
    "LOCALMONTH" => spec(unimplemented_fn),
    "LOCALMONTHNAME" => spec(unimplemented_fn),
    "LOCALMONTHABBREV" => spec(unimplemented_fn),
    "LOCALDAY" => spec(unimplemented_fn),
    "LOCALDAY2" => spec(unimplemented_fn),
    "LOCALDOW" => spec(unimplemented_fn),
    "LOCALDAYNAME" => spec(unimplemented_fn),
    "LOCALTIME" => spec(unimplemented_fn),
    "LOCALHOUR" => spec(unimplemented_fn),
    "LOCALWEEK" => spec(unimplemented_fn),
    "LOCALTIMESTAMP" => spec(unimplemented_fn),
    "REVISIONID" => spec(revisionid_fn),
    "REVISIONDAY" => spec(unimplemented_fn),
    "REVISIONDAY2" => spec(unimplemented_fn),
    "REVISIONMONTH" => spec(unimplemented_fn),
    "REVISIONYEAR" => spec(unimplemented_fn),
    "REVISIONTIMESTAMP" => spec(unimplemented_fn),
    "REVISIONUSER" => spec(revisionuser_fn),
    "NUMBEROFPAGES" => spec(unimplemented_fn),
    "NUMBEROFARTICLES" => spec(unimplemented_fn),
    "NUMBEROFFILES" => spec(unimplemented_fn),
    "NUMBEROFEDITS" => spec(unimplemented_fn),
    "NUMBEROFUSERS" => spec(unimplemented_fn),
    "NUMBEROFADMINS" => spec(unimplemented_fn),
    "NUMBEROFACTIVEUSERS" => spec(unimplemented_fn),
    "PAGEID" => spec(unimplemented_fn),
    "PAGESIZE" => spec(unimplemented_fn),
    "PROTECTIONLEVEL" => spec(unimplemented_fn),
    "PROTECTIONEXPIRY" => spec(unimplemented_fn),
    "PENDINGCHANGELEVEL" => spec(unimplemented_fn),
    "PAGESINCATEGORY" => spec(unimplemented_fn),
    "NUMBERINGROUP" => spec(unimplemented_fn),
    "DISPLAYTITLE" => spec(displaytitle_fn),
    "displaytitle" => spec(displaytitle_fn),
    "DEFAULTSORT" => spec(defaultsort_fn),
    "lc" => spec(lc_fn),
    "lcfirst" => spec(lcfirst_fn),
    "uc" => spec(uc_fn),
    "ucfirst" => spec(ucfirst_fn),
    "formatnum" => spec(formatnum_fn),
    "#dateformat" => spec(time::dateformat_fn),
    "#formatdate" => spec(time::dateformat_fn),
    "padleft" => spec(padleft_fn),
    "padright" => spec(padright_fn),
    "plural" => spec(plural_fn),
    "#time" => spec(time::time_fn),
    "#timel" => spec(unimplemented_fn),
    "gender" => spec(unimplemented_fn),
    "#tag" => spec(tag_fn),
    "localurl" => spec(localurl_fn),
    "fullurl" => spec(fullurl_fn),
    "canonicalurl" => spec(unimplemented_fn),
    "filepath" => spec(unimplemented_fn),
    "urlencode" => spec(urlencode_fn),
    "anchorencode" => spec(anchorencode_fn),
    "ns" => spec(ns_fn),
    "nse" => spec(ns_fn),
    "#rel2abs" => spec(unimplemented_fn),
    "#titleparts" => spec(titleparts_fn),
    "#expr" => spec(expr_fn),
    "#if" => spec(if_fn),
    "#ifeq" => spec(ifeq_fn),
    "#iferror" => spec(iferror_fn),
    "#ifexpr" => spec(ifexpr_fn),
    "#ifexist" => spec(ifexist_fn),
    "#switch" => spec(switch_fn),
    "#babel" => spec(unimplemented_fn),
    "#categorytree" => FnSpec { call: categorytree_fn, keyed: true },
    "#coordinates" => spec(unimplemented_fn),
    "#invoke" => spec(unimplemented_fn),
    "#language" => spec(unimplemented_fn),
    "#lst" => spec(lst_fn),
    "#lsth" => spec(unimplemented_fn),
    "#lstx" => spec(unimplemented_fn),
    "#property" => spec(unimplemented_fn),
    "#related" => spec(unimplemented_fn),
    "#statements" => spec(statements_fn),
    "#target" => spec(unimplemented_fn),
    "#len" => spec(len_fn),
    "#pos" => spec(pos_fn),
    "#rpos" => spec(rpos_fn),
    "#sub" => spec(sub_fn),
    "#pad" => spec(pad_fn),
    "#replace" => spec(replace_fn),
    "#explode" => spec(explode_fn),
    "#urldecode" => spec(urldecode_fn),
    "#urlencode" => spec(urlencode_fn),
    "#section" => spec(lst_fn),
    "#Abschnitt" => spec(lst_fn),
    "#trecho" => spec(lst_fn),
    "#קטע" => spec(lst_fn),
    "#section-h" => spec(unimplemented_fn),
    "#Abschnitt-x" => spec(unimplemented_fn),
    "#trecho-x" => spec(unimplemented_fn),
    "#section-x" => spec(unimplemented_fn),
};

/// `FULLPAGENAMEE`: encoded form of `FULLPAGENAME`.
fn fullpagenamee_fn(ctx: &mut Processor, fn_name: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    wiki_urlencode(&fullpagename_fn(ctx, fn_name, args, exp))
}

/// `PAGENAMEE`: encoded form of `PAGENAME`.
fn pagenamee_fn(ctx: &mut Processor, fn_name: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    wiki_urlencode(&pagename_fn(ctx, fn_name, args, exp))
}

/// `ROOTPAGENAMEE`: encoded form of `ROOTPAGENAME`.
fn rootpagenamee_fn(ctx: &mut Processor, fn_name: &str, args: &[String], exp: &ArgExpander<'_>) -> String {
    wiki_urlencode(&rootpagename_fn(ctx, fn_name, args, exp))
}
