//! The expansion engine.
//!
//! Expansion walks cookie-encoded text outside-in: template names are
//! resolved, parser functions evaluated, script invocations dispatched to
//! the sandbox bridge, and argument references substituted, all against a
//! chain of frames that records who called whom.

use crate::{
    Processor,
    common::{self, MAGIC_NOWIKI, cookie_index, error_marker, nowiki_quote},
    encoder::CookieKind,
    parserfns,
    sandbox::{self, ArgKey, Frame, FrameArgs},
    title::qualify_template_title,
};
use regex::Regex;
use std::{
    collections::HashSet,
    rc::Rc,
    sync::LazyLock,
    time::{Duration, Instant},
};

/// Maximum depth of the expansion stack.
const MAX_EXPAND_DEPTH: usize = 100;

/// A hook that can override template expansion. Returning `None` falls back
/// to normal expansion.
pub type TemplateFn<'a> = &'a dyn Fn(&str, &FrameArgs) -> Option<String>;

/// A hook that observes (and may replace) a finished template expansion.
pub type PostTemplateFn<'a> = &'a dyn Fn(&str, &FrameArgs, &str) -> Option<String>;

/// Options for [`Processor::expand_with`].
#[derive(Clone, Copy, Default)]
pub struct ExpandOptions<'a> {
    /// Expand only the templates flagged by the analyzer (plus any in
    /// [`templates_to_expand`](Self::templates_to_expand)).
    pub pre_expand: bool,
    /// When set, only these canonical template names are expanded; `None`
    /// expands everything.
    pub templates_to_expand: Option<&'a HashSet<String>>,
    /// Disable parser function evaluation, emitting calls unexpanded.
    pub no_parserfns: bool,
    /// Disable `#invoke` dispatch, emitting invocations unexpanded.
    pub no_invoke: bool,
    /// Report undefined templates as warnings instead of errors.
    pub quiet: bool,
    /// Hard deadline for script invocations.
    pub timeout: Option<Duration>,
    /// Template override hook.
    pub template_fn: Option<TemplateFn<'a>>,
    /// Template observation hook.
    pub post_template_fn: Option<PostTemplateFn<'a>>,
}

/// Resolved per-call expansion state.
pub(crate) struct ExpandState<'a> {
    /// The caller’s options.
    pub options: ExpandOptions<'a>,
    /// The canonical names of templates that may be expanded; `None` means
    /// all of them.
    pub selected: Option<HashSet<String>>,
    /// The script invocation deadline, resolved from the timeout.
    pub deadline: Option<Instant>,
}

/// An argument expander handed to parser functions: either re-enter the
/// engine in the scope of the calling frame, or pass already-expanded text
/// through unchanged (used by the sandbox bridge).
pub(crate) enum ArgExpander<'a> {
    /// Expand in the given frame scope.
    Scope {
        /// The frame whose arguments are visible.
        parent: Option<Rc<Frame>>,
        /// The surrounding call state.
        state: &'a ExpandState<'a>,
    },
    /// The arguments were already expanded.
    Identity,
}

impl ArgExpander<'_> {
    /// Expands `text` according to this expander’s scope.
    pub(crate) fn expand(&self, ctx: &mut Processor, text: &str) -> String {
        match self {
            ArgExpander::Scope { parent, state } => {
                ctx.expand_recurse(text, parent.as_ref(), false, state)
            }
            ArgExpander::Identity => text.to_string(),
        }
    }
}

/// Matches a `name=value` template argument, trimming whitespace around both
/// sides.
static NAMED_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)^\s*([^\[\]&<>="']+?)\s*=\s*(.*?)\s*$"#).unwrap());

impl Processor {
    /// Expands templates, parser functions, and script invocations in `text`
    /// with default options.
    pub fn expand(&mut self, text: &str) -> String {
        self.expand_with(text, &ExpandOptions::default())
    }

    /// Expands templates, parser functions, and script invocations in `text`.
    ///
    /// `start_page` must have been called. Expansion itself never fails;
    /// problems turn into error markers in the output and messages on the
    /// context.
    pub fn expand_with(&mut self, text: &str, options: &ExpandOptions<'_>) -> String {
        self.expand_in_frame(text, None, options)
    }

    /// Expands `text` with an explicit current frame. This is the entry
    /// point the sandbox bridge uses for `preprocess` and `expandTemplate`.
    pub(crate) fn expand_in_frame(
        &mut self,
        text: &str,
        parent: Option<&Rc<Frame>>,
        options: &ExpandOptions<'_>,
    ) -> String {
        assert!(self.title.is_some(), "start_page() must be called before expand()");

        let selected = self.selected_templates(options);
        let state = ExpandState {
            options: *options,
            selected,
            deadline: options.timeout.map(|timeout| Instant::now() + timeout),
        };

        let text = self.preprocess_text(text);
        let encoded = self.encode(&text);
        let expanded = self.expand_recurse(&encoded, parent, true, &state);
        self.finalize_expand(&expanded)
    }

    /// Computes the set of templates that may be expanded, or `None` for
    /// all of them.
    fn selected_templates(&mut self, options: &ExpandOptions<'_>) -> Option<HashSet<String>> {
        if options.pre_expand {
            if self.need_pre_expand.is_none() {
                self.error("analyze_templates() must be run before pre-expanding", None);
                return Some(HashSet::new());
            }
            let mut set: HashSet<String> = self
                .need_pre_expand
                .as_ref()
                .map(|need| need.iter().cloned().collect())
                .unwrap_or_default();
            if let Some(extra) = options.templates_to_expand {
                set.extend(extra.iter().cloned());
            }
            Some(set)
        } else {
            options.templates_to_expand.map(|set| set.iter().cloned().collect())
        }
    }

    /// The body of expansion: substitutes each cookie in `coded` in order.
    /// `use_selected` restricts template expansion to the selected set;
    /// argument names and values always expand against all templates.
    pub(crate) fn expand_recurse(
        &mut self,
        coded: &str,
        parent: Option<&Rc<Frame>>,
        use_selected: bool,
        state: &ExpandState<'_>,
    ) -> String {
        let mut out = String::with_capacity(coded.len());
        for piece in split_cookies(coded) {
            let (ch, index) = match piece {
                Piece::Text(text) => {
                    out += text;
                    continue;
                }
                Piece::Cookie(ch, index) => (ch, index),
            };
            let Some(cookie) = self.cookies.get(index).cloned() else {
                out.push(ch);
                continue;
            };

            match cookie.kind {
                CookieKind::Template => {
                    if cookie.nowiki {
                        out += &unexpanded_template(&cookie.args, true);
                        continue;
                    }
                    out += &self.expand_template_cookie(&cookie.args, parent, use_selected, state);
                }
                CookieKind::Argument => {
                    // Outside any template body there is nothing to look the
                    // reference up in, so it is emitted in its original form.
                    out += &unexpanded_arg(&cookie.args, cookie.nowiki);
                }
                CookieKind::Link => {
                    if cookie.nowiki {
                        out += &unexpanded_link(&cookie.args, true);
                    } else {
                        self.expand_stack.push("[[link]]".to_string());
                        let args = cookie
                            .args
                            .iter()
                            .map(|arg| self.expand_recurse(arg, parent, use_selected, state))
                            .collect::<Vec<_>>();
                        self.expand_stack.pop();
                        out += &unexpanded_link(&args, false);
                    }
                }
                CookieKind::ExtLink => {
                    if cookie.nowiki {
                        out += &unexpanded_extlink(&cookie.args, true);
                    } else {
                        self.expand_stack.push("[extlink]".to_string());
                        let args = cookie
                            .args
                            .iter()
                            .map(|arg| self.expand_recurse(arg, parent, use_selected, state))
                            .collect::<Vec<_>>();
                        self.expand_stack.pop();
                        out += &unexpanded_extlink(&args, false);
                    }
                }
                CookieKind::Nowiki => out.push(ch),
            }
        }
        out
    }

    /// Expands a single template (or parser function) cookie.
    fn expand_template_cookie(
        &mut self,
        args: &[String],
        parent: Option<&Rc<Frame>>,
        use_selected: bool,
        state: &ExpandState<'_>,
    ) -> String {
        if self.expand_stack.len() >= MAX_EXPAND_DEPTH {
            self.error("too deep recursion during template expansion", None);
            return error_marker(format!(
                "too deep recursion while expanding template {}",
                unexpanded_template(args, true)
            ));
        }

        // The name itself may contain cookies, e.g. {{ {{#if:1|#if:}} 1|y|n }}
        self.expand_stack.push("TEMPLATE_NAME".to_string());
        let tname = self.expand_recurse(&args[0], parent, use_selected, state);
        self.expand_stack.pop();

        let mut tname = tname.trim().to_string();
        // get() keeps a multi-byte character at the prefix boundary from
        // panicking the slice
        if tname.get(..10).is_some_and(|prefix| prefix.eq_ignore_ascii_case("safesubst:")) {
            tname = tname[10..].to_string();
        } else if tname.get(..6).is_some_and(|prefix| prefix.eq_ignore_ascii_case("subst:")) {
            tname = tname[6..].to_string();
        }

        // A leading colon marks a parser function call; the remainder after
        // the colon becomes the first positional argument.
        if let Some(ofs) = tname.find(':').filter(|&ofs| ofs > 0) {
            let fn_name = parserfns::canonicalize_name(&tname[..ofs]);
            if parserfns::is_known(&fn_name) || fn_name.starts_with('#') {
                let mut fn_args = vec![tname[ofs + 1..].trim_start().to_string()];
                fn_args.extend(args[1..].iter().cloned());
                return self.expand_parserfn(&fn_name, fn_args, parent, state);
            }
        }

        // A bare known function name is also accepted, for magic-word style
        // usage such as {{PAGENAME}}.
        let fn_name = parserfns::canonicalize_name(&tname);
        if parserfns::is_known(&fn_name) || fn_name.starts_with('#') {
            return self.expand_parserfn(&fn_name, args[1..].to_vec(), parent, state);
        }

        let name = crate::title::canonicalize_template_name(&tname, &self.config);

        if !self.has_template(&name) {
            let marker = error_marker(format!(
                "Template:{}",
                html_escape::encode_text(&name)
            ));
            if state.options.quiet {
                self.warning(format!("undefined template {tname:?}"), None);
            } else {
                self.error(format!("undefined template {tname:?}"), None);
            }
            return marker;
        }

        // A template outside the selected set stays unexpanded, but its
        // arguments are still processed: parser functions inside them could
        // refer to this frame and would misbehave if deferred.
        if use_selected
            && let Some(selected) = &state.selected
            && !selected.contains(&name)
        {
            let args = args
                .iter()
                .map(|arg| self.expand_recurse(arg, parent, use_selected, state))
                .collect::<Vec<_>>();
            return unexpanded_template(&args, false);
        }

        // Template loops would otherwise recurse to the depth limit.
        if self.template_chain.contains(&name) {
            self.error(format!("template loop detected: {name}"), None);
            return error_marker(format!(
                "Template loop detected: [[:Template:{name}]]"
            ));
        }

        self.expand_stack.push(name.clone());
        self.template_chain.push(name.clone());

        let argmap = self.build_argmap(&args[1..], parent, state);

        let unquoted = percent_encoding::percent_decode_str(&name)
            .decode_utf8_lossy()
            .into_owned();

        let mut expanded = state
            .options
            .template_fn
            .and_then(|hook| hook(&unquoted, &argmap));

        if expanded.is_none() {
            let body = self.template_body(&name).unwrap_or_default();
            // A template starting with a list item must begin a new line
            // when transcluded.
            let body = if body.starts_with(['#', '*', ';', ':']) {
                format!("\n{body}")
            } else {
                body
            };
            let encoded = self.encode(&body);
            let substituted = self.expand_args(&encoded, &argmap, parent, state);

            let title = qualify_template_title(tname.trim(), &self.config).into_owned();
            let frame = Rc::new(Frame {
                title,
                args: argmap.clone(),
                parent: parent.cloned(),
            });
            expanded = Some(self.expand_recurse(&substituted, Some(&frame), use_selected, state));
        }

        let mut expanded = expanded.unwrap_or_default();
        if let Some(hook) = state.options.post_template_fn
            && let Some(replaced) = hook(&unquoted, &argmap, &expanded)
        {
            expanded = replaced;
        }

        self.template_chain.pop();
        self.expand_stack.pop();
        expanded
    }

    /// Builds the argument map for a template invocation. Positional
    /// arguments are numbered from 1; `k=v` assigns to `k` with whitespace
    /// trimmed on both sides, and numeric names decode to positional slots.
    /// Both forms share one namespace; the later definition wins. Values are
    /// expanded in the *calling* frame, so a script invocation inside an
    /// argument sees the caller as its parent.
    pub(crate) fn build_argmap(
        &mut self,
        args: &[String],
        parent: Option<&Rc<Frame>>,
        state: &ExpandState<'_>,
    ) -> FrameArgs {
        let mut map = FrameArgs::default();
        let mut num = 1_u32;
        for arg in args {
            let (key, value) = if let Some(caps) = NAMED_ARG.captures(arg) {
                let k = caps.get(1).map_or("", |m| m.as_str());
                let value = caps.get(2).map_or("", |m| m.as_str()).to_string();
                if let Ok(mut n) = k.parse::<u32>() {
                    if !(1..=1000).contains(&n) {
                        self.debug(format!("invalid argument number {n}"), None);
                        n = 1000;
                    }
                    if num <= n {
                        num = n + 1;
                    }
                    (ArgKey::Pos(n), value)
                } else {
                    self.expand_stack.push("ARGNAME".to_string());
                    let k = self.expand_recurse(k, parent, false, state);
                    self.expand_stack.pop();
                    (ArgKey::Named(common::collapse_spaces(&k).into_owned()), value)
                }
            } else {
                let key = ArgKey::Pos(num);
                num += 1;
                (key, arg.clone())
            };

            self.expand_stack.push(format!("ARGVAL-{key}"));
            let value = self.expand_recurse(&value, parent, false, state);
            self.expand_stack.pop();
            map.insert(key, value);
        }
        map
    }

    /// Substitutes argument references in an encoded template body against
    /// `argmap`. Template cookies are re-encoded with their arguments
    /// substituted; links keep their surface form.
    fn expand_args(
        &mut self,
        coded: &str,
        argmap: &FrameArgs,
        parent: Option<&Rc<Frame>>,
        state: &ExpandState<'_>,
    ) -> String {
        let mut out = String::with_capacity(coded.len());
        for piece in split_cookies(coded) {
            let (ch, index) = match piece {
                Piece::Text(text) => {
                    out += text;
                    continue;
                }
                Piece::Cookie(ch, index) => (ch, index),
            };
            let Some(cookie) = self.cookies.get(index).cloned() else {
                out.push(ch);
                continue;
            };
            if cookie.nowiki {
                // Will be emitted literally by the finalizer
                out.push(ch);
                continue;
            }
            match cookie.kind {
                CookieKind::Template => {
                    let args = cookie
                        .args
                        .iter()
                        .map(|arg| self.expand_args(arg, argmap, parent, state))
                        .collect::<Vec<_>>();
                    out += &self.save_value(CookieKind::Template, args, false);
                }
                CookieKind::Argument => {
                    if cookie.args.len() > 2 {
                        self.debug(
                            format!(
                                "too many args ({}) in argument reference",
                                cookie.args.len()
                            ),
                            None,
                        );
                    }
                    self.expand_stack.push("ARG-NAME".to_string());
                    let name = self.expand_args(&cookie.args[0], argmap, parent, state);
                    let name = self.expand_recurse(&name, parent, false, state);
                    self.expand_stack.pop();
                    let key = ArgKey::parse(name.trim());
                    if let Some(value) = argmap.get(&key) {
                        out += value;
                    } else if let Some(default) = cookie.args.get(1) {
                        self.expand_stack.push("ARG-DEFVAL".to_string());
                        let default = self.expand_args(default, argmap, parent, state);
                        self.expand_stack.pop();
                        out += &default;
                    } else {
                        out += &unexpanded_arg(&[key.to_string()], false);
                    }
                }
                CookieKind::Link => {
                    let args = cookie
                        .args
                        .iter()
                        .map(|arg| self.expand_args(arg, argmap, parent, state))
                        .collect::<Vec<_>>();
                    out += &unexpanded_link(&args, false);
                }
                CookieKind::ExtLink => {
                    let args = cookie
                        .args
                        .iter()
                        .map(|arg| self.expand_args(arg, argmap, parent, state))
                        .collect::<Vec<_>>();
                    out += &unexpanded_extlink(&args, false);
                }
                CookieKind::Nowiki => out.push(ch),
            }
        }
        out
    }

    /// Evaluates a parser function call (or emits it unexpanded when parser
    /// function expansion is disabled).
    fn expand_parserfn(
        &mut self,
        fn_name: &str,
        args: Vec<String>,
        parent: Option<&Rc<Frame>>,
        state: &ExpandState<'_>,
    ) -> String {
        if state.options.no_parserfns {
            return if args.is_empty() {
                format!("{{{{{fn_name}}}}}")
            } else {
                format!("{{{{{fn_name}:{}}}}}", args.join("|"))
            };
        }

        self.expand_stack.push(fn_name.to_string());
        let ret = if fn_name == "#invoke" {
            if state.options.no_invoke {
                format!("{{{{#invoke:{}}}}}", args.join("|"))
            } else {
                sandbox::invoke(self, &args, parent, state)
            }
        } else {
            let expander = ArgExpander::Scope { parent: parent.cloned(), state };
            parserfns::call(self, fn_name, &args, &expander)
        };
        self.expand_stack.pop();
        ret
    }

    /// Replaces any remaining cookies with their literal surface form and
    /// converts the reserved nowiki codepoint back to `<nowiki />`. Cookie
    /// expansion may introduce new cookies, so this iterates to a fixed
    /// point.
    pub(crate) fn finalize_expand(&mut self, text: &str) -> String {
        if !common::has_reserved(text) {
            return text.to_string();
        }
        let mut text = text.to_string();
        loop {
            if !text.chars().any(|c| cookie_index(c).is_some()) {
                break;
            }
            let mut out = String::with_capacity(text.len());
            for piece in split_cookies(&text) {
                match piece {
                    Piece::Text(text) => out += text,
                    Piece::Cookie(ch, index) => match self.cookies.get(index) {
                        None => out.push(ch),
                        Some(cookie) => match cookie.kind {
                            CookieKind::Template => {
                                out += &unexpanded_template(&cookie.args, cookie.nowiki);
                            }
                            CookieKind::Argument => {
                                out += &unexpanded_arg(&cookie.args, cookie.nowiki);
                            }
                            CookieKind::Link => {
                                out += &unexpanded_link(&cookie.args, cookie.nowiki);
                            }
                            CookieKind::ExtLink => {
                                out += &unexpanded_extlink(&cookie.args, cookie.nowiki);
                            }
                            CookieKind::Nowiki => out += &nowiki_quote(&cookie.args[0]),
                        },
                    },
                }
            }
            text = out;
        }
        if text.contains(MAGIC_NOWIKI) {
            text = text.replace(MAGIC_NOWIKI, "<nowiki />");
        }
        text
    }
}

/// A fragment of encoded text.
enum Piece<'a> {
    /// Plain text between cookies.
    Text(&'a str),
    /// A cookie codepoint and its table index.
    Cookie(char, usize),
}

/// Splits encoded text into plain fragments and cookie codepoints.
fn split_cookies(coded: &str) -> impl Iterator<Item = Piece<'_>> {
    let mut rest = coded;
    let mut done = false;
    std::iter::from_fn(move || {
        loop {
            if done || rest.is_empty() {
                return None;
            }
            match rest.char_indices().find(|&(_, c)| cookie_index(c).is_some()) {
                None => {
                    done = true;
                    return Some(Piece::Text(rest));
                }
                Some((0, c)) => {
                    rest = &rest[c.len_utf8()..];
                    return Some(Piece::Cookie(c, cookie_index(c).unwrap()));
                }
                Some((pos, _)) => {
                    let (text, tail) = rest.split_at(pos);
                    rest = tail;
                    return Some(Piece::Text(text));
                }
            }
        }
    })
}

/// Formats an unexpanded template whose arguments may have been partially or
/// fully expanded.
pub(crate) fn unexpanded_template(args: &[String], nowiki: bool) -> String {
    if nowiki {
        format!("&lbrace;&lbrace;{}&rbrace;&rbrace;", args.join("&vert;"))
    } else {
        format!("{{{{{}}}}}", args.join("|"))
    }
}

/// Formats an unexpanded template argument reference.
pub(crate) fn unexpanded_arg(args: &[String], nowiki: bool) -> String {
    if nowiki {
        format!("&lbrace;&lbrace;&lbrace;{}&rbrace;&rbrace;&rbrace;", args.join("&vert;"))
    } else {
        format!("{{{{{{{}}}}}}}", args.join("|"))
    }
}

/// Formats an unexpanded internal link.
pub(crate) fn unexpanded_link(args: &[String], nowiki: bool) -> String {
    if nowiki {
        format!("&lsqb;&lsqb;{}&rsqb;&rsqb;", args.join("&vert;"))
    } else {
        format!("[[{}]]", args.join("|"))
    }
}

/// Formats an unexpanded external link.
pub(crate) fn unexpanded_extlink(args: &[String], nowiki: bool) -> String {
    if nowiki {
        format!("&lsqb;{}&rsqb;", args.join("&vert;"))
    } else {
        format!("[{}]", args.join("|"))
    }
}

#[cfg(test)]
mod tests;
