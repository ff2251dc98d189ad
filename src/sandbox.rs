//! The script sandbox bridge.
//!
//! The embedded scripting runtime itself is an external collaborator. This
//! module defines the narrow interface between it and the engine: the
//! [`ScriptHost`] trait an embeddable runtime implements, the
//! [`ScriptBridge`] callbacks the engine exposes back to it, and the
//! [`Frame`] objects that carry invocation arguments and parent links.
//!
//! The runtime is expected to deny all host-process access (filesystem,
//! network, reflection); only the bridge callbacks are reachable from
//! scripts. Module source is resolved through the bridge’s loader hook,
//! which consults the page store’s script-module pages first and any
//! bundled standard library second.

use crate::{
    Processor,
    common::{self, error_marker},
    encoder::CookieKind,
    expand::{ArgExpander, ExpandOptions, ExpandState},
    parserfns,
    store::ContentModel,
};
use indexmap::IndexMap;
use std::{fmt, rc::Rc, time::Instant};

/// An argument key. Positional and named arguments share one namespace;
/// numeric names decode to positional slots.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ArgKey {
    /// A positional argument, numbered from 1.
    Pos(u32),
    /// A named argument, whitespace-normalized.
    Named(String),
}

impl ArgKey {
    /// Parses a key from its textual form: all-digit keys are positional,
    /// anything else is a whitespace-normalized name.
    pub fn parse(text: &str) -> Self {
        if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
            text.parse().map_or_else(
                |_| ArgKey::Named(text.to_string()),
                ArgKey::Pos,
            )
        } else {
            ArgKey::Named(common::collapse_spaces(text).into_owned())
        }
    }
}

impl fmt::Display for ArgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKey::Pos(n) => write!(f, "{n}"),
            ArgKey::Named(name) => f.write_str(name),
        }
    }
}

/// An ordered argument map. Later definitions of the same key win.
pub type FrameArgs = IndexMap<ArgKey, String>;

/// The execution context of one template or script invocation.
#[derive(Clone, Debug)]
pub struct Frame {
    /// The full title this frame executes, e.g. `Module:testmod` or
    /// `Template:greet`.
    pub title: String,
    /// The arguments passed in from the caller, already expanded.
    pub args: FrameArgs,
    /// The calling frame, if any.
    pub parent: Option<Rc<Frame>>,
}

impl Frame {
    /// Creates a root frame.
    pub fn new(title: impl Into<String>, args: FrameArgs) -> Rc<Self> {
        Rc::new(Self { title: title.into(), args, parent: None })
    }

    /// Creates a child frame whose parent is this frame (`newChild`).
    pub fn child(self: &Rc<Self>, title: impl Into<String>, args: FrameArgs) -> Rc<Frame> {
        Rc::new(Frame { title: title.into(), args, parent: Some(Rc::clone(self)) })
    }

    /// Looks up an argument by key.
    pub fn get(&self, key: &ArgKey) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Looks up an argument by its textual key form (`getArgument`).
    pub fn get_argument(&self, key: &str) -> Option<&str> {
        self.get(&ArgKey::parse(key))
    }

    /// Iterates over the arguments in order (`argumentPairs`).
    pub fn argument_pairs(&self) -> impl Iterator<Item = (&ArgKey, &str)> {
        self.args.iter().map(|(key, value)| (key, value.as_str()))
    }

    /// The calling frame (`getParent`).
    pub fn get_parent(&self) -> Option<&Rc<Frame>> {
        self.parent.as_ref()
    }
}

/// Errors surfaced by a script runtime.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The invocation exceeded its deadline and was aborted.
    #[error("script timed out")]
    Timeout,
    /// The script raised a deliberate user-facing error (the runtime’s
    /// user-error marker). Reported as a warning; output is empty.
    #[error("{0}")]
    User(String),
    /// The runtime failed with a trace. Reported as an error; output is
    /// empty.
    #[error("{0}")]
    Runtime(String),
    /// The requested module could not be loaded.
    #[error("module not found: {0}")]
    ModuleNotFound(String),
    /// The module loaded but does not export the requested function.
    #[error("function not found: {0}")]
    FunctionNotFound(String),
}

/// One `#invoke` dispatch into the runtime.
pub struct Invocation<'a> {
    /// The module name, without the `Module:` prefix.
    pub module: &'a str,
    /// The function to call within the module.
    pub function: &'a str,
    /// The current frame for the invoked module.
    pub frame: Rc<Frame>,
    /// The title of the page being processed.
    pub page_title: &'a str,
    /// Cooperative deadline; the runtime aborts when it passes.
    pub deadline: Option<Instant>,
}

/// An embeddable script runtime.
///
/// Implementations receive each `#invoke` with a [`ScriptBridge`] through
/// which all engine callbacks (frame expansion, parser functions, page
/// access, module loading) flow.
pub trait ScriptHost {
    /// Calls `function` in `module` with the given frame. The returned text
    /// is substituted for the `#invoke` call.
    fn invoke(
        &mut self,
        bridge: &mut dyn ScriptBridge,
        call: &Invocation<'_>,
    ) -> Result<String, ScriptError>;

    /// Discards the per-page runtime environment. Called by `start_page`.
    fn reset(&mut self);
}

/// Engine callbacks reachable from a script runtime.
pub trait ScriptBridge {
    /// Cookie-encodes and fully expands `text` in the scope of `frame`
    /// (`frame:preprocess`).
    fn preprocess(&mut self, frame: &Frame, text: &str) -> String;

    /// Synthesizes a template call and expands it
    /// (`frame:expandTemplate`).
    fn expand_template(&mut self, frame: &Frame, title: &str, args: &FrameArgs) -> String;

    /// Dispatches directly into the parser function library
    /// (`frame:callParserFunction`). Arguments must already be expanded.
    fn call_parser_function(&mut self, name: &str, args: Vec<String>) -> String;

    /// Builds an extension tag the way `#tag` does
    /// (`frame:extensionTag`).
    fn extension_tag(
        &mut self,
        frame: &Frame,
        name: &str,
        content: &str,
        attrs: &[(String, String)],
    ) -> String;

    /// Returns the source of a stored script module, or `None` if the page
    /// store has no such module. The runtime’s loader hook tries this first
    /// and falls back to its bundled standard library (`mw.text`,
    /// `mw.title`, `mw.uri`, `mw.ustring`, `mw.html`, `mw.language`,
    /// `mw.wikibase`, …).
    fn module_source(&mut self, name: &str) -> Option<String>;

    /// Returns the raw body of any stored page.
    fn page_content(&mut self, title: &str) -> Option<String>;

    /// Returns true if a page exists.
    fn page_exists(&mut self, title: &str) -> bool;

    /// Records a warning on the current page.
    fn warning(&mut self, message: &str);
}

impl ScriptBridge for Processor {
    fn preprocess(&mut self, frame: &Frame, text: &str) -> String {
        // Expand everything, and stay quiet about undefined templates:
        // module-generated text probes for them routinely.
        let options = ExpandOptions { quiet: true, ..ExpandOptions::default() };
        self.expand_in_frame(text, frame.parent.as_ref(), &options)
    }

    fn expand_template(&mut self, frame: &Frame, title: &str, args: &FrameArgs) -> String {
        let mut cookie_args = vec![title.to_string()];
        for (key, value) in args {
            cookie_args.push(format!("{key}={value}"));
        }
        let encoded = self.save_value(CookieKind::Template, cookie_args, false);
        let options = ExpandOptions { quiet: true, ..ExpandOptions::default() };
        let state = ExpandState { options, selected: None, deadline: None };
        let expanded = self.expand_recurse(&encoded, frame.parent.as_ref(), true, &state);
        self.finalize_expand(&expanded)
    }

    fn call_parser_function(&mut self, name: &str, args: Vec<String>) -> String {
        let name = parserfns::canonicalize_name(name);
        if !parserfns::is_known(&name) {
            self.error(format!("callParserFunction: undefined function {name:?}"), None);
            return String::new();
        }
        parserfns::call(self, &name, &args, &ArgExpander::Identity)
    }

    fn extension_tag(
        &mut self,
        frame: &Frame,
        name: &str,
        content: &str,
        attrs: &[(String, String)],
    ) -> String {
        let mut args = vec![name.to_string(), content.to_string()];
        for (key, value) in attrs {
            args.push(format!("{key}={value}"));
        }
        let built = parserfns::call(self, "#tag", &args, &ArgExpander::Identity);
        // The result may contain templates from attribute values; run it
        // back through the engine like the runtime would see it rendered.
        self.preprocess(frame, &built)
    }

    fn module_source(&mut self, name: &str) -> Option<String> {
        let name = name.trim();
        let name = name.strip_prefix("Module:").unwrap_or(name);
        let canonical = crate::title::canonicalize_template_name(name, &self.config);
        let page = self.get_page_resolve_redirect(&format!("Module:{canonical}"))?;
        match page.model {
            ContentModel::ScriptModule => Some(page.body),
            _ => None,
        }
    }

    fn page_content(&mut self, title: &str) -> Option<String> {
        let content = self.read_by_title(title);
        if content.is_none() {
            Processor::warning(
                self,
                format!("attempted to access page content for {title:?} which is not available"),
                None,
            );
        }
        content
    }

    fn page_exists(&mut self, title: &str) -> bool {
        Processor::page_exists(self, title)
    }

    fn warning(&mut self, message: &str) {
        Processor::warning(self, message, None);
    }
}

/// Expands a `#invoke` parser function call by dispatching into the
/// installed script host.
pub(crate) fn invoke(
    ctx: &mut Processor,
    args: &[String],
    parent: Option<&Rc<Frame>>,
    state: &ExpandState<'_>,
) -> String {
    if args.len() < 2 {
        ctx.error(format!("#invoke: too few arguments ({})", args.len()), None);
        return format!("{{{{#invoke:{}}}}}", args.join("|"));
    }

    let expander = ArgExpander::Scope { parent: parent.cloned(), state };
    let module = expander.expand(ctx, &args[0]).trim().to_string();
    let function = expander.expand(ctx, &args[1]).trim().to_string();

    // The module frame: args 1..n are the remaining arguments, name=value
    // pairs included, with the same rules as template arguments. The parent
    // link is the frame of the template containing the #invoke.
    let frame_args = ctx.build_argmap(&args[2..], parent, state);
    let title = if module.starts_with("Module:") {
        module.clone()
    } else {
        format!("Module:{module}")
    };
    let frame = Rc::new(Frame { title, args: frame_args, parent: parent.cloned() });

    let page_title = ctx.title.clone().unwrap_or_default();
    let Some(mut host) = ctx.script_host.take() else {
        ctx.error(format!("#invoke:{module}|{function}: no script host installed"), None);
        return String::new();
    };

    let call = Invocation {
        module: &module,
        function: &function,
        frame,
        page_title: &page_title,
        deadline: state.deadline,
    };
    let result = host.invoke(ctx, &call);
    ctx.script_host = Some(host);

    match result {
        Ok(text) => text,
        Err(ScriptError::Timeout) => {
            ctx.error(format!("timeout in #invoke:{module}|{function}"), None);
            error_marker(format!("Timeout in {module}:{function}"))
        }
        Err(ScriptError::User(message)) => {
            ctx.warning(message, None);
            String::new()
        }
        Err(err) => {
            ctx.error(
                format!("script error in #invoke:{module}|{function}"),
                Some(err.to_string()),
            );
            String::new()
        }
    }
}
