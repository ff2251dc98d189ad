//! The structural parser.
//!
//! Consumes preprocessed (and optionally pre-expanded) text that may still
//! contain cookies, and produces a typed node tree. Tokenization is
//! line-aware; bold/italic disambiguation looks ahead on the same line, and
//! a stack of open nodes drives the context-sensitive handling of lists,
//! tables, and permitted HTML.

pub use node::{NodeArgs, NodeChild, NodeKind, WikiNode};

use crate::{
    Processor,
    common::{MAGIC_NOWIKI, MAGIC_SQUOTE, cookie_index, nowiki_quote},
    encoder::CookieKind,
    expand::ExpandOptions,
    parserfns,
};
use regex::Regex;
use std::{collections::HashSet, sync::LazyLock};

pub(crate) mod html;
mod node;
pub(crate) mod output;
#[cfg(test)]
mod tests;

/// MediaWiki magic words. These become [`NodeKind::MagicWord`] nodes and
/// otherwise have no semantic effect.
pub(crate) static MAGIC_WORDS: phf::Set<&'static str> = phf::phf_set! {
    "__NOTOC__",
    "__FORCETOC__",
    "__TOC__",
    "__NOEDITSECTION__",
    "__NEWSECTIONLINK__",
    "__NONEWSECTIONLINK__",
    "__NOGALLERY__",
    "__HIDDENCAT__",
    "__EXPECTUNUSEDCATEGORY__",
    "__NOCONTENTCONVERT__",
    "__NOCC__",
    "__NOTITLECONVERT__",
    "__NOTC__",
    "__START__",
    "__END__",
    "__INDEX__",
    "__NOINDEX__",
    "__STATICREDIRECT__",
    "__NOGLOBAL__",
    "__DISAMBIG__",
};

/// HTML tag-like names that are treated as literal text without a note.
static SILENT_HTML_LIKE: phf::Set<&'static str> = phf::phf_set! { "gu", "qu", "e" };

/// Options for [`Processor::parse_with`].
#[derive(Clone, Copy, Default)]
pub struct ParseOptions<'a> {
    /// Expand the templates flagged by the analyzer before parsing.
    pub pre_expand: bool,
    /// Expand all templates before parsing.
    pub expand_all: bool,
    /// Additional templates to expand before parsing.
    pub additional_expand: Option<&'a HashSet<String>>,
    /// Template override hook for the pre-parse expansion.
    pub template_fn: Option<crate::expand::TemplateFn<'a>>,
    /// Template observation hook for the pre-parse expansion.
    pub post_template_fn: Option<crate::expand::PostTemplateFn<'a>>,
}

impl Processor {
    /// Parses wikitext into a node tree without expanding any templates.
    pub fn parse(&mut self, text: &str) -> WikiNode {
        self.parse_with(text, &ParseOptions::default())
    }

    /// Parses wikitext into a node tree, optionally expanding some or all
    /// templates first. Parser functions and script invocations are
    /// expanded if they occur inside expanded templates.
    pub fn parse_with(&mut self, text: &str, options: &ParseOptions<'_>) -> WikiNode {
        assert!(self.title.is_some(), "start_page() must be called before parse()");

        let text = self.preprocess_text(text);
        let text = if options.expand_all {
            self.expand_with(
                &text,
                &ExpandOptions {
                    template_fn: options.template_fn,
                    post_template_fn: options.post_template_fn,
                    ..ExpandOptions::default()
                },
            )
        } else if options.pre_expand || options.additional_expand.is_some() {
            self.expand_with(
                &text,
                &ExpandOptions {
                    pre_expand: options.pre_expand,
                    templates_to_expand: options.additional_expand,
                    template_fn: options.template_fn,
                    post_template_fn: options.post_template_fn,
                    ..ExpandOptions::default()
                },
            )
        } else {
            text
        };

        let encoded = self.encode(&text);
        parse_encoded(self, &encoded)
    }
}

/// Mutable parser state, rebuilt for every parse.
pub(crate) struct ParseState {
    /// The stack of open nodes; index 0 is the root.
    stack: Vec<WikiNode>,
    /// The current source line, for node locations.
    linenum: u32,
    /// True when the previous token ended a line.
    beginning_of_line: bool,
    /// True when the line so far contains only whitespace.
    wsp_beginning_of_line: bool,
    /// True inside `<pre>`, where markup is not interpreted.
    pre_parse: bool,
    /// Nesting depth of contexts (template/link arguments) where
    /// beginning-of-line handling is disabled.
    begline_disabled: u32,
    /// Suppresses link trail handling after certain constructs.
    suppress_special: bool,
}

impl ParseState {
    /// The topmost open node.
    fn top(&mut self) -> &mut WikiNode {
        self.stack.last_mut().expect("parser stack underflow")
    }

    /// The kind of the topmost open node.
    fn top_kind(&self) -> NodeKind {
        self.stack.last().expect("parser stack underflow").kind
    }

    /// Whether beginning-of-line handling is currently enabled.
    fn begline(&self) -> bool {
        self.begline_disabled == 0 && self.beginning_of_line
    }
}

/// Parses text that has already been encoded, returning the root node.
pub(crate) fn parse_encoded(ctx: &mut Processor, text: &str) -> WikiNode {
    let mut root = WikiNode::new(NodeKind::Root, 0);
    root.args.push_list(vec![NodeChild::Text(ctx.current_title())]);

    let mut ps = ParseState {
        stack: vec![root],
        linenum: 1,
        beginning_of_line: true,
        wsp_beginning_of_line: false,
        pre_parse: false,
        begline_disabled: 0,
        suppress_special: false,
    };

    process_text(ctx, &mut ps, text);

    while ps.stack.len() > 1 {
        pop(ctx, &mut ps, true);
    }
    merge_str_children(ctx, ps.top());
    ps.stack.pop().expect("parser stack underflow")
}

// ---------------------------------------------------------------------------
// Stack plumbing

/// Pushes a new node of the given kind onto the stack.
fn push(ctx: &mut Processor, ps: &mut ParseState, kind: NodeKind) {
    merge_str_children(ctx, ps.top());
    let node = WikiNode::new(kind, ps.linenum);
    ps.stack.push(node);
    ps.suppress_special = false;
}

/// Merges consecutive string children into one, finalizing any residual
/// cookies so that text children never contain reserved codepoints.
fn merge_str_children(ctx: &mut Processor, node: &mut WikiNode) {
    if node.children.iter().all(|child| matches!(child, NodeChild::Node(_))) {
        return;
    }
    let mut merged = Vec::with_capacity(node.children.len());
    let mut run = String::new();
    for child in node.children.drain(..) {
        match child {
            NodeChild::Text(text) => run += &text,
            NodeChild::Node(child) => {
                if !run.is_empty() {
                    let text = ctx.finalize_expand(&run);
                    if !text.is_empty() {
                        merged.push(NodeChild::Text(text));
                    }
                    run.clear();
                }
                merged.push(NodeChild::Node(child));
            }
        }
    }
    if !run.is_empty() {
        let text = ctx.finalize_expand(&run);
        if !text.is_empty() {
            merged.push(NodeChild::Text(text));
        }
    }
    node.children = merged;
}

/// Pops the topmost node and attaches it to its parent, warning about
/// unclosed constructs when requested and applying the close-time fixups
/// (argument collection, parser function conversion, definition shuffling).
fn pop(ctx: &mut Processor, ps: &mut ParseState, warn_unclosed: bool) {
    merge_str_children(ctx, ps.top());
    let top = ps.stack.last().expect("parser stack underflow");
    let kind = top.kind;
    let loc = top.loc;
    let tag_name = top.args.scalar().to_string();
    let no_children = top.children.is_empty();

    if warn_unclosed && kind.must_close() {
        match kind {
            NodeKind::Html => {
                ctx.debug(
                    format!("HTML tag <{tag_name}> not properly closed"),
                    Some(format!("started on line {loc}, detected on line {}", ps.linenum)),
                );
            }
            NodeKind::ParserFn => {
                ctx.debug(
                    "parser function invocation not properly closed".to_string(),
                    Some(format!("started on line {loc}, detected on line {}", ps.linenum)),
                );
            }
            NodeKind::Url if no_children => {
                // A lone "[" (e.g. inside a template argument): drop the
                // node and reprocess the bracket as text.
                ps.stack.pop();
                text_fn(ctx, ps, "[");
                return;
            }
            NodeKind::Italic | NodeKind::Bold => {
                // Unbalanced bold/italic is endemic; close silently
            }
            _ => {
                ctx.debug(
                    format!("{kind:?} not properly closed"),
                    Some(format!("started on line {loc}, detected on line {}", ps.linenum)),
                );
            }
        }
    }

    // Out-of-order closing generates empty bold/italic nodes; drop them
    if matches!(kind, NodeKind::Bold | NodeKind::Italic) && ps.top().children.is_empty() {
        ps.stack.pop();
        return;
    }

    {
        let node = ps.top();
        if kind.has_args() {
            let children = std::mem::take(&mut node.children);
            node.args.push_list(children);
        }

        // A template whose name is a literal known parser function is one
        if node.kind == NodeKind::Template
            && let NodeArgs::Lists(lists) = &node.args
            && let [NodeChild::Text(name)] = lists.first().map_or(&[][..], Vec::as_slice)
            && parserfns::is_known(name)
        {
            node.kind = NodeKind::ParserFn;
        }

        // Move a parsed definition into place
        if node.kind == NodeKind::ListItem
            && node.args.scalar().ends_with(';')
            && node.head.is_some()
        {
            node.definition = Some(std::mem::take(&mut node.children));
            node.children = node.head.take().unwrap_or_default();
        }
    }

    let node = ps.stack.pop().expect("parser stack underflow");
    ps.top().children.push(NodeChild::Node(node));
}

/// Returns true if any open node is of the given kind.
fn have(ps: &ParseState, kind: NodeKind) -> bool {
    ps.stack.iter().any(|node| node.kind == kind)
}

/// Closes any open list when a non-list token starts a new line.
fn close_begline_lists(ctx: &mut Processor, ps: &mut ParseState) {
    if !ps.begline() {
        return;
    }
    while have(ps, NodeKind::List) {
        pop(ctx, ps, true);
    }
}

/// Pops open nodes until the list whose depth matches the new prefix is on
/// top of the stack.
fn pop_until_nth_list(ctx: &mut Processor, ps: &mut ParseState, list_token: &str) {
    if !ps.begline() {
        return;
    }
    let mut list_count = list_token.chars().count();
    let mut passed_nodes = 0;
    for node in &ps.stack {
        passed_nodes += 1;
        if node.kind == NodeKind::List {
            list_count -= 1;
        }
        if list_count == 0 {
            break;
        }
    }

    if list_token.starts_with([':', ';']) {
        // Leave the target list's item child on top so a nested definition
        // list opens inside it
        passed_nodes += 1;
    }

    for _ in 0..ps.stack.len().saturating_sub(passed_nodes) {
        pop(ctx, ps, true);
    }
}

// ---------------------------------------------------------------------------
// Token handlers

/// A plausible URL scheme at the start of external link content.
static URL_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(https?:|mailto:|//)").unwrap());

/// A link trail: word characters immediately following a link.
static LINK_TRAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)^(\w+)(.*)$").unwrap());

/// Inserts the token as raw text into the parse tree.
fn text_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if token.is_empty() {
        return;
    }
    close_begline_lists(ctx, ps);

    // External links [http://…] are only links if the content looks like a
    // URL; whitespace separates the target from the display text.
    if ps.top_kind() == NodeKind::Url {
        let top = ps.top();
        if top.args.is_empty() && top.children.is_empty() && !URL_START.is_match(token) {
            ps.stack.pop();
            let mut replacement = String::from("[");
            replacement += token;
            return text_fn(ctx, ps, &replacement);
        }
        if !token.is_empty() && token.chars().all(char::is_whitespace) && ps.top().args.is_empty()
        {
            merge_str_children(ctx, ps.top());
            let top = ps.top();
            let children = std::mem::take(&mut top.children);
            top.args.push_list(children);
            return;
        }
    }

    // Certain nodes close automatically at the start of a new line
    if ps.begline() {
        loop {
            match ps.top_kind() {
                NodeKind::ListItem => {
                    if token.starts_with(' ') || token.starts_with('\t') {
                        ps.top().children.push(NodeChild::Text(token.to_string()));
                        return;
                    }
                    merge_str_children(ctx, ps.top());
                    let top = ps.top();
                    if let Some(NodeChild::Text(last)) = top.children.last()
                        && last.ends_with('\n')
                        && (top.children.len() > 1 || !last.chars().all(char::is_whitespace))
                    {
                        pop(ctx, ps, false);
                        continue;
                    }
                }
                NodeKind::List => {
                    pop(ctx, ps, false);
                    continue;
                }
                NodeKind::Preformatted => {
                    merge_str_children(ctx, ps.top());
                    let top = ps.top();
                    if let Some(NodeChild::Text(last)) = top.children.last()
                        && last.ends_with('\n')
                        && !token.starts_with(' ')
                        && !token.chars().all(char::is_whitespace)
                    {
                        pop(ctx, ps, false);
                        continue;
                    }
                }
                NodeKind::Bold | NodeKind::Italic => {
                    merge_str_children(ctx, ps.top());
                    let kind = ps.top_kind();
                    ctx.debug(format!("{kind:?} not properly closed on the same line"), None);
                    pop(ctx, ps, false);
                }
                _ => {}
            }
            break;
        }

        // A space at the start of a line begins preformatted text
        if token.starts_with(' ') || token.starts_with('\t') {
            if matches!(ps.top_kind(), NodeKind::Table | NodeKind::TableRow) {
                return;
            }
            if ps.top_kind() != NodeKind::Preformatted && !ps.pre_parse {
                push(ctx, ps, NodeKind::Preformatted);
            }
        }
    }

    // Word characters right after a link become its trail
    let mut token = token;
    let trail_storage;
    if !ps.suppress_special
        && let Some(NodeChild::Node(last)) = ps.top().children.last()
        && last.kind == NodeKind::Link
        && last.children.is_empty()
        && let Some(caps) = LINK_TRAIL.captures(token)
    {
        let trail = caps.get(1).map_or("", |m| m.as_str()).to_string();
        trail_storage = caps.get(2).map_or("", |m| m.as_str()).to_string();
        if let Some(NodeChild::Node(last)) = ps.top().children.last_mut() {
            last.children.push(NodeChild::Text(trail));
        }
        if trail_storage.is_empty() {
            return;
        }
        token = &trail_storage;
    }

    ps.top().children.push(NodeChild::Text(token.to_string()));
}

/// Processes a horizontal rule token.
fn hline_fn(ctx: &mut Processor, ps: &mut ParseState, _token: &str) {
    close_begline_lists(ctx, ps);
    loop {
        match ps.top_kind() {
            NodeKind::Root
            | NodeKind::Level2
            | NodeKind::Table
            | NodeKind::TableCaption
            | NodeKind::TableRow
            | NodeKind::TableHeaderCell
            | NodeKind::TableCell
            | NodeKind::Html => break,
            _ => pop(ctx, ps, true),
        }
    }
    push(ctx, ps, NodeKind::Hline);
    pop(ctx, ps, true);
}

/// The heading kind for a run of equals signs.
fn heading_kind(token: &str) -> NodeKind {
    match token.len() {
        2 => NodeKind::Level2,
        3 => NodeKind::Level3,
        4 => NodeKind::Level4,
        5 => NodeKind::Level5,
        _ => NodeKind::Level6,
    }
}

/// Processes a heading start token (the token has `<` prepended by the
/// tokenizer).
fn subtitle_start_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    let kind = heading_kind(&token[1..]);
    let level = kind.heading_level().unwrap_or(6);

    // Pop until the open heading has a lower level, but never force-close
    // non-span HTML: headings occur inside <noinclude> and the like
    while ps.stack.iter().any(|node| node.kind.heading_level().is_some()) {
        let top = ps.stack.last().expect("parser stack underflow");
        if top.kind.heading_level().is_some_and(|open| open < level) {
            break;
        }
        if top.kind == NodeKind::Html && top.args.scalar() != "span" {
            break;
        }
        pop(ctx, ps, true);
    }

    push(ctx, ps, kind);
}

/// Processes a heading end token (the token has `>` prepended by the
/// tokenizer).
fn subtitle_end_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    let kind = heading_kind(&token[1..]);

    while ps.top_kind().heading_level().is_none() {
        pop(ctx, ps, true);
    }

    if ps.top_kind() != kind {
        ctx.debug("subtitle start and end markers level mismatch".to_string(), None);
    }
    merge_str_children(ctx, ps.top());
    let top = ps.top();
    let children = std::mem::take(&mut top.children);
    top.args.push_list(children);
}

/// Processes an italic start/end token (`''`).
fn italic_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);

    if matches!(ps.top_kind(), NodeKind::Template | NodeKind::TemplateArg) {
        return text_fn(ctx, ps, token);
    }

    if !have(ps, NodeKind::Italic) || ps.top_kind() == NodeKind::Link {
        push(ctx, ps, NodeKind::Italic);
        return;
    }

    // Closing the italic may cross an open bold; close both and re-open
    // the bold so they nest properly
    let mut push_bold = false;
    loop {
        let kind = ps.top_kind();
        if kind == NodeKind::Italic {
            pop(ctx, ps, false);
            break;
        }
        if kind == NodeKind::Bold {
            push_bold = true;
        }
        pop(ctx, ps, false);
    }
    if push_bold {
        push(ctx, ps, NodeKind::Bold);
    }
}

/// Processes a bold start/end token (`'''`).
fn bold_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);

    if matches!(ps.top_kind(), NodeKind::Template | NodeKind::TemplateArg) {
        return text_fn(ctx, ps, token);
    }

    if !have(ps, NodeKind::Bold) || ps.top_kind() == NodeKind::Link {
        push(ctx, ps, NodeKind::Bold);
        return;
    }

    let mut push_italic = false;
    loop {
        let kind = ps.top_kind();
        if kind == NodeKind::Bold {
            pop(ctx, ps, false);
            break;
        }
        if kind == NodeKind::Italic {
            push_italic = true;
        }
        pop(ctx, ps, false);
    }
    if push_italic {
        push(ctx, ps, NodeKind::Italic);
    }
}

/// Processes an external link start token `[`.
fn elink_start_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    push(ctx, ps, NodeKind::Url);
}

/// Processes an external link end token `]`.
fn elink_end_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    if !have(ps, NodeKind::Url) {
        return text_fn(ctx, ps, token);
    }
    loop {
        match ps.top_kind() {
            NodeKind::Url => {
                pop(ctx, ps, false);
                break;
            }
            NodeKind::Template
            | NodeKind::TemplateArg
            | NodeKind::Link
            | NodeKind::Italic
            | NodeKind::Bold => {
                return text_fn(ctx, ps, token);
            }
            _ => pop(ctx, ps, true),
        }
    }
}

/// Processes a bare URL written in the text.
fn url_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    close_begline_lists(ctx, ps);
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }

    // Common trailing punctuation stays outside the link
    let (token, suffix) = match token.chars().last() {
        Some(c @ ('.' | '!' | '?' | ',')) => (&token[..token.len() - c.len_utf8()], Some(c)),
        _ => (token, None),
    };

    if ps.top_kind() == NodeKind::Url {
        return text_fn(ctx, ps, token);
    }
    push(ctx, ps, NodeKind::Url);
    text_fn(ctx, ps, token);
    pop(ctx, ps, false);
    if let Some(suffix) = suffix {
        text_fn(ctx, ps, &suffix.to_string());
    }
}

/// Handles a cookie codepoint, building the corresponding subtree.
fn magic_fn(ctx: &mut Processor, ps: &mut ParseState, token: char) {
    close_begline_lists(ctx, ps);
    let Some(cookie) = cookie_index(token).and_then(|index| ctx.cookies.get(index).cloned())
    else {
        return text_fn(ctx, ps, &token.to_string());
    };
    ps.beginning_of_line = false;

    match cookie.kind {
        CookieKind::Template => {
            if cookie.nowiki {
                let text =
                    format!("&lbrace;&lbrace;{}&rbrace;&rbrace;", cookie.args.join("&vert;"));
                return process_text(ctx, ps, &text);
            }
            push(ctx, ps, NodeKind::Template);
            process_args(ctx, ps, &cookie.args);
            loop {
                match ps.top_kind() {
                    NodeKind::Root => break,
                    NodeKind::Template | NodeKind::ParserFn => {
                        pop(ctx, ps, false);
                        break;
                    }
                    _ => pop(ctx, ps, true),
                }
            }
        }
        CookieKind::Argument => {
            if cookie.nowiki {
                let text = format!(
                    "&lbrace;&lbrace;&lbrace;{}&rbrace;&rbrace;&rbrace;",
                    cookie.args.join("&vert;")
                );
                return process_text(ctx, ps, &text);
            }
            push(ctx, ps, NodeKind::TemplateArg);
            process_args(ctx, ps, &cookie.args);
            loop {
                match ps.top_kind() {
                    NodeKind::Root => break,
                    NodeKind::TemplateArg => {
                        pop(ctx, ps, false);
                        break;
                    }
                    _ => pop(ctx, ps, true),
                }
            }
        }
        CookieKind::Link => {
            if cookie.nowiki {
                let text = format!("&lsqb;&lsqb;{}&rsqb;&rsqb;", cookie.args.join("&vert;"));
                return process_text(ctx, ps, &text);
            }
            push(ctx, ps, NodeKind::Link);
            process_args(ctx, ps, &cookie.args);
            loop {
                match ps.top_kind() {
                    NodeKind::Root => break,
                    NodeKind::Link => {
                        pop(ctx, ps, false);
                        break;
                    }
                    _ => pop(ctx, ps, true),
                }
            }
        }
        CookieKind::ExtLink => {
            let url_like = cookie
                .args
                .first()
                .is_some_and(|arg| arg.contains(':') || arg.starts_with("//"));
            if !cookie.nowiki && url_like {
                push(ctx, ps, NodeKind::Url);
                process_args(ctx, ps, &cookie.args);
                if !have(ps, NodeKind::Url) {
                    // The content did not look like a URL and the node was
                    // already dismantled; keep the closing bracket as text
                    text_fn(ctx, ps, "]");
                } else {
                    loop {
                        match ps.top_kind() {
                            NodeKind::Root => break,
                            NodeKind::Url => {
                                pop(ctx, ps, false);
                                break;
                            }
                            _ => pop(ctx, ps, true),
                        }
                    }
                }
            } else {
                let text = format!("[{}]", cookie.args.join("&vert;"));
                process_text(ctx, ps, &text);
            }
        }
        CookieKind::Nowiki => {
            let text = nowiki_quote(&cookie.args[0]);
            text_fn(ctx, ps, &text);
        }
    }
}

/// Processes the pipe-separated arguments of an encoded construct with
/// beginning-of-line handling disabled.
fn process_args(ctx: &mut Processor, ps: &mut ParseState, args: &[String]) {
    ps.begline_disabled += 1;
    for (i, arg) in args.iter().enumerate() {
        if i != 0 {
            vbar_fn(ctx, ps, "|");
        }
        process_text(ctx, ps, arg);
    }
    ps.begline_disabled -= 1;
}

/// Handles the special colon inside a template call that marks a parser
/// function invocation.
fn colon_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.top_kind() != NodeKind::Template || !ps.top().args.is_empty() {
        return text_fn(ctx, ps, token);
    }

    merge_str_children(ctx, ps.top());

    {
        let top = ps.top();
        let is_fn = matches!(
            top.children.as_slice(),
            [NodeChild::Text(name)] if parserfns::is_known(name)
        );
        if !is_fn {
            return text_fn(ctx, ps, token);
        }
        top.kind = NodeKind::ParserFn;
        let children = std::mem::take(&mut top.children);
        top.args.push_list(children);
    }
}

/// Handler for the table start token `{|`.
fn table_start_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    push(ctx, ps, NodeKind::Table);
}

/// An HTML attribute assignment pair.
const ATTR_PAIR: &str = r#"\s*[^"'>/=\x00-\x1f\s]+\s*=\s*("[^"]*"|'[^']*'|[^"'<>`\s]+)"#;

/// One or more attribute assignments and nothing else.
static ATTR_ASSIGNMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^{ATTR_PAIR}({ATTR_PAIR})*\s*$")).unwrap());

/// Checks whether the children of the node look like table attribute
/// assignments; if so, returns the attribute text.
fn check_for_attributes(ctx: &mut Processor, ps: &mut ParseState) -> Option<String> {
    merge_str_children(ctx, ps.top());
    let top = ps.top();
    if let [NodeChild::Text(text)] = top.children.as_slice() {
        let text = text.clone();
        top.children.clear();
        return Some(text);
    }

    let mut candidate = String::new();
    for child in &top.children {
        match child {
            NodeChild::Text(text) => candidate += text,
            NodeChild::Node(node) => {
                candidate +=
                    &html_escape::encode_safe(&output::to_wikitext(node, None)).into_owned();
            }
        }
    }
    if candidate.trim().is_empty() {
        ps.top().children.clear();
        return Some(String::new());
    }
    if ATTR_ASSIGNMENTS.is_match(&candidate) {
        ps.top().children.clear();
        return Some(candidate);
    }
    None
}

/// Parses accumulated attribute text on a table node.
fn table_check_attrs(ctx: &mut Processor, ps: &mut ParseState) {
    if ps.top_kind() != NodeKind::Table || ps.top().children.is_empty() {
        return;
    }
    if let Some(attrs) = check_for_attributes(ctx, ps) {
        parse_attrs(ps.top(), &attrs);
    }
}

/// Parses accumulated attribute text on a table row node.
fn table_row_check_attrs(ctx: &mut Processor, ps: &mut ParseState) {
    close_begline_lists(ctx, ps);
    if ps.top_kind() != NodeKind::TableRow || ps.top().children.is_empty() {
        return;
    }
    if let Some(attrs) = check_for_attributes(ctx, ps) {
        parse_attrs(ps.top(), &attrs);
    }
}

/// Handler for the table caption token `|+`.
fn table_caption_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    table_check_attrs(ctx, ps);
    if !have(ps, NodeKind::Table) {
        return text_fn(ctx, ps, token);
    }
    while ps.top_kind() != NodeKind::Table {
        pop(ctx, ps, true);
    }
    push(ctx, ps, NodeKind::TableCaption);
}

/// Handler for the header cell tokens `!` and `!!`.
fn table_hdr_cell_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    table_row_check_attrs(ctx, ps);
    table_check_attrs(ctx, ps);

    if !have(ps, NodeKind::Table) {
        return text_fn(ctx, ps, token);
    }

    loop {
        match ps.top_kind() {
            NodeKind::TableRow => {
                push(ctx, ps, NodeKind::TableHeaderCell);
                return;
            }
            NodeKind::Table => {
                push(ctx, ps, NodeKind::TableRow);
                push(ctx, ps, NodeKind::TableHeaderCell);
                return;
            }
            NodeKind::TableCaption => {
                if ps.begline() {
                    pop(ctx, ps, false);
                    push(ctx, ps, NodeKind::TableRow);
                    push(ctx, ps, NodeKind::TableHeaderCell);
                } else {
                    text_fn(ctx, ps, token);
                }
                return;
            }
            NodeKind::Html | NodeKind::Template | NodeKind::Link | NodeKind::Url => {
                // Inside nested structures ! is just text
                return text_fn(ctx, ps, token);
            }
            NodeKind::TableCell if !ps.begline() && !ps.wsp_beginning_of_line => {
                // Inside a cell ! is text unless at the start of a line
                return text_fn(ctx, ps, token);
            }
            _ => pop(ctx, ps, true),
        }
    }
}

/// Handler for the table row token `|-`.
fn table_row_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    table_check_attrs(ctx, ps);
    if !have(ps, NodeKind::Table) {
        return text_fn(ctx, ps, token);
    }
    while ps.top_kind() != NodeKind::Table {
        pop(ctx, ps, true);
    }
    push(ctx, ps, NodeKind::TableRow);
}

/// Handler for the cell tokens `|` and `||` in table context.
fn table_cell_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    table_row_check_attrs(ctx, ps);
    table_check_attrs(ctx, ps);

    if !have(ps, NodeKind::Table) {
        return text_fn(ctx, ps, token);
    }

    if token == "|" && !ps.wsp_beginning_of_line && !ps.begline() {
        // Might separate attributes from cell content
        merge_str_children(ctx, ps.top());
        let top = ps.top();
        if top.attrs.is_empty()
            && matches!(
                top.kind,
                NodeKind::TableCaption | NodeKind::TableHeaderCell | NodeKind::TableCell
            )
            && let [NodeChild::Text(attrs)] = top.children.as_slice()
        {
            let attrs = attrs.clone();
            top.children.clear();
            parse_attrs(top, &attrs);
            return;
        }
        return text_fn(ctx, ps, token);
    }

    loop {
        match ps.top_kind() {
            NodeKind::TableRow => break,
            NodeKind::Table => {
                push(ctx, ps, NodeKind::TableRow);
                break;
            }
            NodeKind::TableCaption => return text_fn(ctx, ps, token),
            NodeKind::Html => return text_fn(ctx, ps, token),
            _ => pop(ctx, ps, true),
        }
    }
    push(ctx, ps, NodeKind::TableCell);
}

/// Handler for a vertical bar. Inside argument-bearing nodes it separates
/// arguments; otherwise it is table syntax.
fn vbar_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.top_kind().has_args() {
        merge_str_children(ctx, ps.top());
        let top = ps.top();
        let children = std::mem::take(&mut top.children);
        top.args.push_list(children);
        return;
    }
    table_cell_fn(ctx, ps, token);
}

/// Handler for a double vertical bar, which separates cells (or header
/// cells) on the same line.
fn double_vbar_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.top_kind().has_args() {
        vbar_fn(ctx, ps, "|");
        vbar_fn(ctx, ps, "|");
        return;
    }

    if ps.begline() {
        vbar_fn(ctx, ps, "|");
        vbar_fn(ctx, ps, "|");
        return;
    }

    loop {
        match ps.top_kind() {
            NodeKind::TableRow | NodeKind::Root => break,
            NodeKind::Table => {
                push(ctx, ps, NodeKind::TableRow);
                break;
            }
            NodeKind::TableCaption => return text_fn(ctx, ps, token),
            NodeKind::Html => return text_fn(ctx, ps, token),
            NodeKind::TableCell | NodeKind::TableHeaderCell => {
                pop(ctx, ps, true);
            }
            _ => break,
        }
    }

    let top = ps.stack.last().expect("parser stack underflow");
    let header = top.kind == NodeKind::TableRow
        && matches!(
            top.children.last(),
            Some(NodeChild::Node(node)) if node.kind == NodeKind::TableHeaderCell
        );
    if header {
        table_hdr_cell_fn(ctx, ps, token);
    } else {
        table_cell_fn(ctx, ps, token);
    }
}

/// Handler for the table end token `|}`.
fn table_end_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }
    close_begline_lists(ctx, ps);
    table_row_check_attrs(ctx, ps);
    table_check_attrs(ctx, ps);
    if !have(ps, NodeKind::Table) {
        return text_fn(ctx, ps, token);
    }
    loop {
        if ps.top_kind() == NodeKind::Table {
            pop(ctx, ps, false);
            break;
        }
        pop(ctx, ps, true);
    }
}

/// Handles list item prefixes, indented lines, and the colon that separates
/// a definition list head from its definition.
fn list_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }

    // A colon inside a template makes it a parser function call
    if token == ":" && ps.top_kind() == NodeKind::Template {
        return colon_fn(ctx, ps, token);
    }

    // Colons inside links are not list items
    if matches!(ps.top_kind(), NodeKind::Link | NodeKind::Url) {
        return text_fn(ctx, ps, token);
    }

    // List items must start a new line
    if !ps.begline() {
        let top = ps.top();
        if token == ":"
            && top.kind == NodeKind::ListItem
            && top.args.scalar().ends_with(';')
            && top.head.is_none()
        {
            // Definition for a head on the same line; shuffle children into
            // head, to be unshuffled at pop
            merge_str_children(ctx, ps.top());
            let top = ps.top();
            top.head = Some(std::mem::take(&mut top.children));
            return;
        }
        return text_fn(ctx, ps, token);
    }

    // Pop any lower-level list items
    loop {
        let top = ps.stack.last().expect("parser stack underflow");
        let kind = top.kind;

        if kind == NodeKind::ListItem
            && top.args.scalar().ends_with(';')
            && token.ends_with(':')
            && token[..token.len() - 1] == top.args.scalar()[..top.args.scalar().len() - 1]
            && top.head.is_none()
        {
            // Definition for a definition list item, on its own line
            merge_str_children(ctx, ps.top());
            let top = ps.top();
            top.head = Some(std::mem::take(&mut top.children));
            return;
        }

        if kind == NodeKind::ListItem
            && token.ends_with(':')
            && top.args.scalar() == &token[..token.len() - 1]
            && matches!(top.children.last(), Some(NodeChild::Node(_)))
        {
            // Continuation of the same item after an intervening sublist
            return;
        }

        if kind == NodeKind::ListItem && top.args.scalar() == token {
            pop(ctx, ps, false);
            break;
        }

        if kind == NodeKind::ListItem && top.args.scalar().len() < token.len() {
            let prefix = top.args.scalar();
            let matches = prefix.chars().zip(token.chars()).all(|(open, new)| {
                new == ':' || new == open
            });
            if matches {
                // A sublist of the open item
                break;
            }
        }

        if kind.heading_level().is_some() {
            break;
        }

        if matches!(
            kind,
            NodeKind::Html
                | NodeKind::Template
                | NodeKind::TemplateArg
                | NodeKind::ParserFn
                | NodeKind::Table
                | NodeKind::TableHeaderCell
                | NodeKind::TableRow
                | NodeKind::TableCell
        ) {
            break;
        }

        pop(ctx, ps, true);
    }

    pop_until_nth_list(ctx, ps, token);

    if ps.top_kind() != NodeKind::List {
        push(ctx, ps, NodeKind::List);
        ps.top().args = NodeArgs::Str(token.to_string());
    }
    push(ctx, ps, NodeKind::ListItem);
    ps.top().args = NodeArgs::Str(token.to_string());
}

/// One attribute within a tag.
static TAG_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?si)([^"'>/=\x00-\x1f\s]+)(?:=("[^"]*"|'[^']*'|[^"'<>`\s]*))?\s*"#).unwrap()
});

/// Parses HTML attributes into the node's attribute map.
fn parse_attrs(node: &mut WikiNode, attrs: &str) {
    for caps in TAG_ATTR.captures_iter(attrs) {
        let name = caps[1].to_string();
        let value = caps.get(2).map_or("", |m| m.as_str());
        let value = if value.starts_with('\'') || value.starts_with('"') {
            &value[1..value.len().saturating_sub(1).max(1)]
        } else {
            value
        };
        node.attrs.insert(name, value.to_string());
    }
}

/// An HTML start tag with optional attributes.
static START_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)^<([-a-zA-Z0-9]+)\s*((?:\b[-a-zA-Z0-9]+(?:=(?:"[^"]*"|'[^']*'|[^ \t\n"'`=<>/]*))?\s*)*)(/?)\s*>$"#,
    )
    .unwrap()
});

/// An HTML end tag.
static END_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^</([-a-zA-Z0-9]+)\s*>$").unwrap());

/// Handler for tokens that look like HTML start or end tags.
fn tag_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    // Strings like <<country>> occur in template arguments
    if token.starts_with("<<")
        || have(ps, NodeKind::Template)
        || have(ps, NodeKind::TemplateArg)
        || have(ps, NodeKind::ParserFn)
    {
        return text_fn(ctx, ps, token);
    }

    close_begline_lists(ctx, ps);

    if let Some(caps) = START_TAG.captures(token) {
        let name = caps[1].to_lowercase();
        let attrs = caps[2].to_string();
        let also_end = &caps[3] == "/";

        // Tags like <1> appear in template arguments; only valid HTML may
        // be parsed there
        if !html::is_allowed(&name)
            && (have(ps, NodeKind::Template) || have(ps, NodeKind::TemplateArg))
        {
            return text_fn(ctx, ps, token);
        }

        if ps.pre_parse {
            return text_fn(ctx, ps, token);
        }

        // <section> markers are only meaningful to #lst
        if name == "section" {
            return;
        }

        // <nowiki> is handled during preprocessing; an unmatched start tag
        // can still be seen here
        if name == "nowiki" {
            if also_end {
                return text_fn(ctx, ps, &MAGIC_NOWIKI.to_string());
            }
            ctx.debug("unmatched <nowiki>".to_string(), None);
            return text_fn(ctx, ps, token);
        }

        // <noinclude/> has done its job before parsing
        if name == "noinclude" && also_end {
            return;
        }

        if name == "pre" {
            push(ctx, ps, NodeKind::Pre);
            {
                let top = ps.top();
                top.args = NodeArgs::Str(name);
                parse_attrs(top, &attrs);
            }
            if also_end {
                pop(ctx, ps, false);
            } else {
                ps.pre_parse = true;
            }
            return;
        }

        if !html::is_allowed(&name) {
            if !name.chars().all(|c| c.is_ascii_digit()) && !SILENT_HTML_LIKE.contains(&name) {
                ctx.debug(format!("html tag <{name}> not allowed in WikiText"), None);
            }
            return text_fn(ctx, ps, token);
        }

        // Implicitly close open HTML tags that cannot contain this one
        let permitted = html::permitted_parents(&name);
        loop {
            let top = ps.stack.last().expect("parser stack underflow");
            if top.kind == NodeKind::Url && top.children.is_empty() {
                ps.stack.pop();
                text_fn(ctx, ps, "[");
                continue;
            }
            if top.kind != NodeKind::Html {
                break;
            }
            let open = top.args.scalar().to_string();
            if permitted.contains(open.as_str()) {
                break;
            }
            let close_next =
                html::tag_spec(&open).map_or(&[][..], |spec| spec.close_next);
            pop(ctx, ps, !close_next.contains(&name.as_str()));
        }

        push(ctx, ps, NodeKind::Html);
        {
            let top = ps.top();
            top.args = NodeArgs::Str(name.clone());
            parse_attrs(top, &attrs);
        }

        let no_end_tag = html::tag_spec(&name).is_some_and(|spec| spec.no_end_tag);
        if no_end_tag || also_end {
            pop(ctx, ps, false);
        }
        return;
    }

    let Some(caps) = END_TAG.captures(token) else {
        ctx.debug(format!("could not match end tag token {token:?}"), None);
        return text_fn(ctx, ps, token);
    };
    let name = caps[1].to_lowercase();

    if name == "section" {
        ctx.debug("unexpected </section>".to_string(), None);
        return;
    }

    if name == "pre" {
        ps.pre_parse = false;
        if ps.top_kind() != NodeKind::Pre {
            ctx.debug("unexpected </pre>".to_string(), None);
            return text_fn(ctx, ps, token);
        }
        pop(ctx, ps, false);
        return;
    }

    if ps.pre_parse {
        return text_fn(ctx, ps, token);
    }

    if !html::is_allowed(&name) && name != "nowiki" {
        ctx.debug(format!("html tag </{name}> not allowed in WikiText"), None);
    }

    // Find the matching start tag on the stack
    let matching = ps
        .stack
        .iter()
        .any(|node| node.kind == NodeKind::Html && node.args.scalar() == name);
    if !matching {
        if matches!(name.as_str(), "br" | "hl" | "wbr") {
            // Incorrect but occurs; synthesize an empty tag
            push(ctx, ps, NodeKind::Html);
            ps.top().args = NodeArgs::Str(name);
            pop(ctx, ps, false);
            return;
        }
        ctx.debug(format!("no corresponding start tag found for {token}"), None);
        return text_fn(ctx, ps, token);
    }

    loop {
        let top = ps.stack.last().expect("parser stack underflow");
        if top.kind == NodeKind::Url && top.children.is_empty() {
            ps.stack.pop();
            text_fn(ctx, ps, "[");
            continue;
        }
        if top.kind == NodeKind::Html {
            if top.args.scalar() == name {
                pop(ctx, ps, false);
                break;
            }
            // An optional end tag closes implicitly with its parent
            let has_close_next = html::tag_spec(top.args.scalar())
                .is_some_and(|spec| !spec.close_next.is_empty());
            if has_close_next {
                pop(ctx, ps, false);
                continue;
            }
        }
        pop(ctx, ps, true);
    }
}

/// Handles a magic word such as `__NOTOC__`.
fn magicword_fn(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    close_begline_lists(ctx, ps);
    push(ctx, ps, NodeKind::MagicWord);
    ps.top().args = NodeArgs::Str(token.to_string());
    pop(ctx, ps, false);
}

// ---------------------------------------------------------------------------
// Tokenizer

/// The master token pattern.
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let magic_words =
        MAGIC_WORDS.iter().map(|word| format!(r"\b{word}\b")).collect::<Vec<_>>().join("|");
    let pattern = String::new()
        + r"(?m)^(?P<heq1>={2,6})\s*(?P<htxt>([^=]|=[^=])+?)\s*(?P<heq2>={2,6})\s*$"
        + r"|'''''|'''|''|\n|\[|\]|\|\}|\{\||\|\+|\|-|!!"
        + r"|\s*https?://[a-zA-Z0-9.]+(/[^\]\[{}<>|\s]*)?"
        + r"|^[ \t]*!"
        + r"|\|\||\|"
        + r"|^----+"
        + r"|^[*:;#]+"
        + r"|[ \t]+\n*"
        + r"|:"
        + r"|<<[-a-zA-Z0-9/]*>>"
        + r#"|<[-a-zA-Z0-9]+\s*((\b[-a-zA-Z0-9]+(=("[^<>"]*"|'[^<>']*'|[^ \t\n"'`=<>]*))?\s*)*)(/\s*)?>"#
        + r"|</[-a-zA-Z0-9]+\s*>"
        + r"|("
        + &magic_words
        + r")"
        + r"|[\x{10203E}-\x{10FFF0}]";
    Regex::new(&pattern).unwrap()
});

/// A `</pre>` end token.
static PRE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^</pre\s*>$").unwrap());

/// A list item prefix.
static LIST_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[*:;#]+").unwrap());

/// An HTML opening tag with attributes, used to mask single quotes so that
/// they are not misread as bold/italic markers.
static INSIDE_HTML_TAG: LazyLock<Regex> = LazyLock::new(|| {
    let names = html::ALLOWED_HTML_TAGS.keys().copied().collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"(?i)<(?:{names})\s+[^><]*>")).unwrap()
});

/// One token: a flag telling whether the text is a markup token, plus the
/// token text.
type Token = (bool, String);

/// Splits `text` with `re`, keeping the separators as their own elements.
fn split_keep<'t>(re: &Regex, text: &'t str) -> Vec<&'t str> {
    let mut out = Vec::new();
    let mut pos = 0;
    for m in re.find_iter(text) {
        out.push(&text[pos..m.start()]);
        out.push(m.as_str());
        pos = m.end();
    }
    out.push(&text[pos..]);
    out
}

/// Checks whether a bold marker (`'''`) follows in the remaining parts of
/// the line, allowing intervening italics.
fn bold_follows(parts: &[&str], i: usize) -> bool {
    parts[i + 1..]
        .iter()
        .filter(|part| part.starts_with("''"))
        .any(|part| part.starts_with("'''"))
}

/// Tokenizes page content. Bold and italic are interpreted within a single
/// line; disambiguating `'''''` requires looking ahead at what follows on
/// the same line.
fn tokenize(text: &str) -> Vec<Token> {
    static QUOTE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'{2,}").unwrap());
    static LINE_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n+").unwrap());

    // Mask single quotes inside HTML opening tags
    let mut masked = String::with_capacity(text.len());
    let mut pos = 0;
    for m in INSIDE_HTML_TAG.find_iter(text) {
        masked += &text[pos..m.start()];
        masked.extend(m.as_str().chars().filter_map(|c| match c {
            '\'' => Some(MAGIC_SQUOTE),
            '\n' => None,
            c => Some(c),
        }));
        pos = m.end();
    }
    masked += &text[pos..];

    let mut out = Vec::new();
    for line in split_keep(&LINE_SPLIT, &masked) {
        let parts = split_keep(&QUOTE_RUN, line);
        // 1 = in italic, 2 = in bold, 3 = in both
        let mut state = 0;
        for (i, part) in parts.iter().enumerate() {
            if part.starts_with("''") {
                let rest: &str;
                if part.starts_with("'''''") {
                    match state {
                        1 => {
                            out.push((true, "''".to_string()));
                            out.push((true, "'''".to_string()));
                            state = 2;
                        }
                        2 => {
                            out.push((true, "'''".to_string()));
                            out.push((true, "''".to_string()));
                            state = 1;
                        }
                        3 => {
                            out.push((true, "'''".to_string()));
                            out.push((true, "''".to_string()));
                            state = 0;
                        }
                        _ => {
                            if bold_follows(&parts, i) {
                                out.push((true, "''".to_string()));
                                out.push((true, "'''".to_string()));
                            } else {
                                out.push((true, "'''".to_string()));
                                out.push((true, "''".to_string()));
                            }
                            state = 3;
                        }
                    }
                    rest = &part[5..];
                } else if part.starts_with("'''") {
                    match state {
                        1 => {
                            if bold_follows(&parts, i) {
                                out.push((true, "'''".to_string()));
                                rest = &part[3..];
                                state = 3;
                            } else {
                                out.push((true, "''".to_string()));
                                rest = &part[2..];
                                state = 0;
                            }
                        }
                        2 => {
                            out.push((true, "'''".to_string()));
                            rest = &part[3..];
                            state = 0;
                        }
                        3 => {
                            out.push((true, "'''".to_string()));
                            rest = &part[3..];
                            state = 1;
                        }
                        _ => {
                            out.push((true, "'''".to_string()));
                            rest = &part[3..];
                            state = 2;
                        }
                    }
                } else {
                    out.push((true, "''".to_string()));
                    state = match state {
                        1 => 0,
                        2 => 3,
                        3 => 2,
                        _ => 1,
                    };
                    rest = &part[2..];
                }
                if !rest.is_empty() {
                    out.push((false, rest.to_string()));
                }
                continue;
            }

            // Ordinary tokenization, with masked quotes restored
            let part = part.replace(MAGIC_SQUOTE, "'");
            let mut pos = 0;
            for caps in TOKEN_RE.captures_iter(&part) {
                let m = caps.get(0).expect("match group");
                if pos != m.start() {
                    out.push((false, part[pos..m.start()].to_string()));
                }
                pos = m.end();
                let token = m.as_str();
                if let (Some(heq1), Some(htxt), Some(heq2)) =
                    (caps.name("heq1"), caps.name("htxt"), caps.name("heq2"))
                {
                    out.push((true, format!("<{}", heq1.as_str())));
                    out.extend(tokenize(htxt.as_str()));
                    out.push((true, format!(">{}", heq2.as_str())));
                } else if token.trim_start().starts_with("https://")
                    || token.trim_start().starts_with("http://")
                {
                    if m.start() > 0 && part.as_bytes()[m.start() - 1] == b'=' {
                        // A URL in a template argument stays plain text so
                        // that it is not turned into a link
                        out.push((false, token.trim().to_string()));
                    } else if let Some(ws_len) = token.find("http").filter(|&len| len > 0) {
                        out.push((true, token[..ws_len].to_string()));
                        out.push((true, token.trim().to_string()));
                    } else {
                        out.push((true, token.to_string()));
                    }
                } else {
                    out.push((true, token.to_string()));
                }
            }
            if pos != part.len() {
                out.push((false, part[pos..].to_string()));
            }
        }
    }
    out
}

/// Tokenizes `text` and processes each token in sequence. Called
/// recursively for tokens inside encoded constructs.
pub(crate) fn process_text(ctx: &mut Processor, ps: &mut ParseState, text: &str) {
    for (is_token, token) in tokenize(text) {
        if !is_token {
            text_fn(ctx, ps, &token);
        } else if ps.top_kind() == NodeKind::Pre && !PRE_END.is_match(&token) {
            // Inside <pre> nothing is interpreted; strip the marker the
            // tokenizer prepended to heading tokens
            let token = token
                .strip_prefix('<')
                .filter(|rest| rest.starts_with("=="))
                .or_else(|| token.strip_prefix('>').filter(|rest| rest.starts_with("==")))
                .unwrap_or(&token);
            text_fn(ctx, ps, token);
        } else {
            dispatch_token(ctx, ps, &token);
        }
        ps.linenum += u32::try_from(token.matches('\n').count()).unwrap_or_default();
        ps.wsp_beginning_of_line =
            ps.beginning_of_line && token.chars().all(char::is_whitespace);
        ps.beginning_of_line = token.ends_with('\n');
    }
}

/// Routes one markup token to its handler. Some tokens are still
/// interpreted as text in some contexts.
fn dispatch_token(ctx: &mut Processor, ps: &mut ParseState, token: &str) {
    match token {
        "'''" => return bold_fn(ctx, ps, token),
        "''" => return italic_fn(ctx, ps, token),
        "[" => return elink_start_fn(ctx, ps, token),
        "]" => return elink_end_fn(ctx, ps, token),
        "{|" => return table_start_fn(ctx, ps, token),
        "|}" => return table_end_fn(ctx, ps, token),
        "|+" => return table_caption_fn(ctx, ps, token),
        "!" | "!!" => return table_hdr_cell_fn(ctx, ps, token),
        "|-" => return table_row_fn(ctx, ps, token),
        "||" => return double_vbar_fn(ctx, ps, token),
        "|" => return vbar_fn(ctx, ps, token),
        " " | "\n" | "\t" | "\n\n" => return text_fn(ctx, ps, token),
        _ => {}
    }
    if MAGIC_WORDS.contains(token) {
        return magicword_fn(ctx, ps, token);
    }
    if let Some(rest) = token.strip_prefix('<')
        && rest.starts_with("==")
    {
        return subtitle_start_fn(ctx, ps, token);
    }
    if let Some(rest) = token.strip_prefix('>')
        && rest.starts_with("==")
    {
        return subtitle_end_fn(ctx, ps, token);
    }
    if token.starts_with('<') {
        return tag_fn(ctx, ps, token);
    }
    if token.starts_with("----") {
        return hline_fn(ctx, ps, token);
    }
    if LIST_PREFIX.is_match(token) {
        return list_fn(ctx, ps, token);
    }
    if token.starts_with("https://") || token.starts_with("http://") {
        return url_fn(ctx, ps, token);
    }
    if token.chars().count() == 1
        && let Some(c) = token.chars().next()
        && cookie_index(c).is_some()
    {
        return magic_fn(ctx, ps, c);
    }
    let trimmed = token.trim();
    match trimmed {
        "'''" => bold_fn(ctx, ps, trimmed),
        "''" => italic_fn(ctx, ps, trimmed),
        "!" | "!!" => table_hdr_cell_fn(ctx, ps, trimmed),
        "|" => vbar_fn(ctx, ps, trimmed),
        "||" => double_vbar_fn(ctx, ps, trimmed),
        _ => text_fn(ctx, ps, token),
    }
}
