//! A MediaWiki wikitext preprocessor, template expander, and parser for
//! offline dump processing.
//!
//! The intended usage pattern is to create one [`Processor`] per project,
//! feed it every page of a dump (directly or through [`dump`]), run
//! [`analyze_templates`](Processor::analyze_templates), and then call
//! [`expand`](Processor::expand) and [`parse`](Processor::parse) for each
//! page of interest. Expansion and parsing never fail; problems become
//! `<strong class="error">…</strong>` markers in the output plus messages
//! accumulated on the processor, cleared by each
//! [`start_page`](Processor::start_page).

pub use config::SiteConfig;
pub use expand::{ExpandOptions, PostTemplateFn, TemplateFn};
pub use parser::{NodeArgs, NodeChild, NodeKind, ParseOptions, WikiNode, output::NodeHandlerFn};
pub use sandbox::{ArgKey, Frame, FrameArgs, Invocation, ScriptBridge, ScriptError, ScriptHost};
pub use store::{ContentModel, Page, PageStore};

use encoder::Cookie;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Arc,
};
use title::canonicalize_template_name;

mod analyze;
mod common;
pub mod config;
pub mod dump;
mod encoder;
mod expand;
pub mod expr;
pub mod parser;
mod parserfns;
pub mod sandbox;
pub mod store;
pub mod title;

/// The type of an injected Wikidata statements lookup.
type StatementsLookup = Arc<dyn Fn(&[String]) -> Option<String> + Send + Sync>;

/// One accumulated processing message.
#[derive(Clone, Debug, Serialize)]
pub struct Message {
    /// The message text.
    pub message: String,
    /// An optional traceback or extra detail.
    pub trace: Option<String>,
    /// The page being processed when the message was recorded.
    pub title: Option<String>,
    /// The section within the page, if one was started.
    pub section: Option<String>,
    /// The subsection within the section, if one was started.
    pub subsection: Option<String>,
    /// The expansion stack at the time of the message.
    pub path: Vec<String>,
}

/// The per-page message lists, as returned by [`Processor::to_return`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct MessageLists {
    /// Operations that aborted or produced an error marker.
    pub errors: Vec<Message>,
    /// Output was produced but its semantics are uncertain.
    pub warnings: Vec<Message>,
    /// Benign recoveries.
    pub debugs: Vec<Message>,
}

/// The processing context: owns the page store and per-project template
/// data, and carries the per-page scratch state (cookies, messages, the
/// expansion stack) that [`start_page`](Processor::start_page) clears.
pub struct Processor {
    /// Project configuration.
    pub(crate) config: SiteConfig,
    /// The page store.
    pub(crate) store: PageStore,
    /// Canonical template name to transcluded body. Shared with worker
    /// forks; frozen before replay begins.
    pub(crate) templates: Arc<HashMap<String, String>>,
    /// Unsaved template definitions that shadow stored ones.
    transient_templates: HashMap<String, String>,
    /// The canonical names of templates that must be expanded before
    /// parsing; `None` until analysis has run.
    pub(crate) need_pre_expand: Option<Arc<HashSet<String>>>,
    /// Set when a page is re-added after analysis, signalling that the
    /// analysis is stale.
    pub(crate) needs_reanalysis: bool,
    /// Suppress progress reporting.
    pub(crate) quiet: bool,
    /// Injected lookup for `#statements`.
    pub(crate) statements_lookup: Option<StatementsLookup>,
    /// The installed script runtime, if any.
    pub(crate) script_host: Option<Box<dyn ScriptHost>>,

    /// The current page title.
    pub(crate) title: Option<String>,
    /// The current section, for message locations.
    section: Option<String>,
    /// The current subsection, for message locations.
    subsection: Option<String>,
    /// The per-page cookie table.
    pub(crate) cookies: Vec<Cookie>,
    /// Reverse map deduplicating identical cookies.
    pub(crate) cookie_rev: HashMap<Cookie, usize>,
    /// Accumulated errors.
    errors: Vec<Message>,
    /// Accumulated warnings.
    warnings: Vec<Message>,
    /// Accumulated debug notes.
    debugs: Vec<Message>,
    /// The chain of expansions in progress, for messages and the recursion
    /// limit.
    pub(crate) expand_stack: Vec<String>,
    /// The chain of template names being expanded, for loop detection.
    pub(crate) template_chain: Vec<String>,
}

impl Processor {
    /// Creates a processor with default configuration, backed by an
    /// anonymous temporary data file.
    pub fn new() -> Result<Self, store::Error> {
        Self::with_store(PageStore::temporary()?, SiteConfig::default())
    }

    /// Creates a processor over an explicit store and configuration.
    pub fn with_store(store: PageStore, config: SiteConfig) -> Result<Self, store::Error> {
        Ok(Self {
            templates: Arc::new(predefined_templates(&config)),
            config,
            store,
            transient_templates: HashMap::new(),
            need_pre_expand: None,
            needs_reanalysis: false,
            quiet: false,
            statements_lookup: None,
            script_host: None,
            title: None,
            section: None,
            subsection: None,
            cookies: Vec::new(),
            cookie_rev: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            debugs: Vec::new(),
            expand_stack: Vec::new(),
            template_chain: Vec::new(),
        })
    }

    /// The page store.
    pub fn store(&self) -> &PageStore {
        &self.store
    }

    /// Mutable access to the page store, for flushing.
    pub(crate) fn store_mut(&mut self) -> &mut PageStore {
        &mut self.store
    }

    /// Suppresses progress reporting.
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    /// Installs an embeddable script runtime for `#invoke`.
    pub fn set_script_host(&mut self, host: Box<dyn ScriptHost>) {
        self.script_host = Some(host);
    }

    /// Installs a Wikidata lookup consulted by `#statements`.
    pub fn set_statements_lookup(&mut self, lookup: StatementsLookup) {
        self.statements_lookup = Some(lookup);
    }

    /// Adds a page to the store. For templates this also registers the
    /// transcluded body under the canonical template name.
    ///
    /// Re-adding a page after [`analyze_templates`](Self::analyze_templates)
    /// has run marks the analysis stale; see
    /// [`needs_reanalysis`](Self::needs_reanalysis).
    pub fn add_page(
        &mut self,
        model: ContentModel,
        title: &str,
        text: &str,
    ) -> Result<(), store::Error> {
        if self.need_pre_expand.is_some() {
            self.needs_reanalysis = true;
            log::warn!("page {title:?} added after template analysis; re-analysis required");
        }

        self.store.add_page(model.clone(), title, text, &self.config)?;

        if model != ContentModel::Redirect
            && let Some(name) = template_name_of(title, &self.config)
        {
            let body = encoder::template_to_body(text);
            Arc::make_mut(&mut self.templates).insert(name, body);
        }
        Ok(())
    }

    /// Registers a transient page that shadows any stored page without
    /// being written to the data file. Useful for injecting script modules
    /// or template overrides during extraction.
    pub fn add_page_transient(&mut self, model: ContentModel, title: &str, text: &str) {
        if let Some(name) = template_name_of(title, &self.config) {
            self.transient_templates
                .insert(name, encoder::template_to_body(text));
        }
        self.store.add_transient(Page {
            title: title.to_string(),
            namespace_id: title::namespace_of(title, &self.config),
            model,
            body: text.to_string(),
        });
    }

    /// Returns true if a template with the canonical name is defined.
    pub fn has_template(&self, name: &str) -> bool {
        self.transient_templates.contains_key(name) || self.templates.contains_key(name)
    }

    /// The transcluded body of a template, by canonical name.
    pub(crate) fn template_body(&self, name: &str) -> Option<String> {
        self.transient_templates
            .get(name)
            .or_else(|| self.templates.get(name))
            .cloned()
    }

    /// Returns true if the page exists.
    pub fn page_exists(&self, title: &str) -> bool {
        self.store.page_exists(title)
    }

    /// Reads the raw body of a page, or `None` if it does not exist.
    pub fn read_by_title(&self, title: &str) -> Option<String> {
        self.store.read_by_title(title)
    }

    /// Returns the page record for `title` without following redirects.
    pub fn get_page(&self, title: &str) -> Option<Page> {
        self.store.get_page(title)
    }

    /// Returns the page record for `title`, resolving one redirect hop.
    pub fn get_page_resolve_redirect(&self, title: &str) -> Option<Page> {
        self.store.get_page_resolve_redirect(title)
    }

    /// The pre-expand set computed by
    /// [`analyze_templates`](Self::analyze_templates), if it has run.
    pub fn need_pre_expand(&self) -> Option<&HashSet<String>> {
        self.need_pre_expand.as_deref()
    }

    /// True when a page was added after analysis ran, so the pre-expand set
    /// may be stale.
    pub fn needs_reanalysis(&self) -> bool {
        self.needs_reanalysis
    }

    /// Starts processing a new page. This is mandatory before `expand` or
    /// `parse`; it clears the per-page cookie table, message lists, and
    /// script environment.
    pub fn start_page(&mut self, title: &str) {
        self.title = Some(title.to_string());
        self.section = None;
        self.subsection = None;
        self.cookies.clear();
        self.cookie_rev.clear();
        self.errors.clear();
        self.warnings.clear();
        self.debugs.clear();
        self.expand_stack.clear();
        self.expand_stack.push(title.to_string());
        self.template_chain.clear();
        if let Some(host) = &mut self.script_host {
            host.reset();
        }
    }

    /// Starts a new section of the current page. Optional; improves message
    /// locations. Clears any current subsection.
    pub fn start_section(&mut self, title: Option<&str>) {
        self.section = title.map(str::to_string);
        self.subsection = None;
    }

    /// Starts a new subsection of the current section. Optional; improves
    /// message locations.
    pub fn start_subsection(&mut self, title: Option<&str>) {
        self.subsection = title.map(str::to_string);
    }

    /// The current page title, or empty if `start_page` has not run.
    pub(crate) fn current_title(&self) -> String {
        self.title.clone().unwrap_or_default()
    }

    /// Returns the accumulated message lists for the current page.
    pub fn to_return(&self) -> MessageLists {
        MessageLists {
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            debugs: self.debugs.clone(),
        }
    }

    /// Records an error: an operation was aborted or produced an error
    /// marker.
    pub(crate) fn error(&mut self, message: impl Into<String>, trace: Option<String>) {
        let message = self.make_message(message.into(), trace);
        log::error!("{}", format_message(&message));
        self.errors.push(message);
    }

    /// Records a warning: output was produced but its semantics are
    /// uncertain.
    pub(crate) fn warning(&mut self, message: impl Into<String>, trace: Option<String>) {
        let message = self.make_message(message.into(), trace);
        log::warn!("{}", format_message(&message));
        self.warnings.push(message);
    }

    /// Records a debug note: a benign recovery.
    pub(crate) fn debug(&mut self, message: impl Into<String>, trace: Option<String>) {
        let message = self.make_message(message.into(), trace);
        log::debug!("{}", format_message(&message));
        self.debugs.push(message);
    }

    /// Builds a message with the current location attached.
    fn make_message(&self, message: String, trace: Option<String>) -> Message {
        Message {
            message,
            trace,
            title: self.title.clone(),
            section: self.section.clone(),
            subsection: self.subsection.clone(),
            path: self.expand_stack.clone(),
        }
    }

    /// Creates an independent worker processor sharing this processor's
    /// read-only data (store file, templates, pre-expand set) with fresh
    /// per-page scratch state.
    pub fn fork(&mut self) -> Result<Processor, store::Error> {
        self.store.flush()?;
        self.fork_seed()?.spawn()
    }

    /// Captures the shareable state needed to spawn worker processors.
    pub(crate) fn fork_seed(&self) -> Result<ForkSeed, store::Error> {
        Ok(ForkSeed {
            config: self.config.clone(),
            store: self.store.fork()?,
            templates: Arc::clone(&self.templates),
            transient_templates: self.transient_templates.clone(),
            need_pre_expand: self.need_pre_expand.clone(),
            quiet: self.quiet,
            statements_lookup: self.statements_lookup.clone(),
        })
    }

    /// Saves the in-memory index, redirects, templates, and pre-expand set
    /// next to the data file so a later run can skip ingest.
    pub fn save_snapshot(&mut self, path: impl AsRef<Path>) -> Result<(), store::Error> {
        self.store.flush()?;
        store::snapshot::save(
            path,
            &self.store,
            &self.templates,
            self.need_pre_expand.as_deref(),
        )
    }

    /// Restores a processor from a snapshot and its data file.
    pub fn load_snapshot(
        snapshot_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
        config: SiteConfig,
    ) -> Result<Self, store::Error> {
        let (store, snapshot) = store::snapshot::load(snapshot_path, data_path)?;
        let mut processor = Self::with_store(store, config)?;
        processor.templates = Arc::new(snapshot.templates);
        processor.need_pre_expand = snapshot
            .pre_expand
            .map(|set| Arc::new(set.into_iter().collect()));
        Ok(processor)
    }

    /// Drops all stored pages and derived template data, returning the
    /// processor to its initial state with a fresh data file.
    pub fn reset(&mut self) -> Result<(), store::Error> {
        self.store.reset(tempfile::tempfile()?);
        self.templates = Arc::new(predefined_templates(&self.config));
        self.transient_templates.clear();
        self.need_pre_expand = None;
        self.needs_reanalysis = false;
        Ok(())
    }
}

/// The shareable part of a processor, used to spawn per-worker instances.
pub(crate) struct ForkSeed {
    /// Project configuration.
    config: SiteConfig,
    /// A read-only store view.
    store: PageStore,
    /// Shared templates.
    templates: Arc<HashMap<String, String>>,
    /// Transient template definitions.
    transient_templates: HashMap<String, String>,
    /// Shared pre-expand set.
    need_pre_expand: Option<Arc<HashSet<String>>>,
    /// Progress suppression flag.
    quiet: bool,
    /// The `#statements` lookup.
    statements_lookup: Option<StatementsLookup>,
}

impl ForkSeed {
    /// Spawns a worker processor. Each call opens an independent read-only
    /// handle on the shared data file.
    pub(crate) fn spawn(&self) -> Result<Processor, store::Error> {
        let mut processor =
            Processor::with_store(self.store.fork()?, self.config.clone())?;
        processor.templates = Arc::clone(&self.templates);
        processor.transient_templates = self.transient_templates.clone();
        processor.need_pre_expand = self.need_pre_expand.clone();
        processor.quiet = self.quiet;
        processor.statements_lookup = self.statements_lookup.clone();
        Ok(processor)
    }
}

/// Seeds the template table with the predefined escape templates.
fn predefined_templates(config: &SiteConfig) -> HashMap<String, String> {
    let mut templates = HashMap::new();
    templates.insert("!".to_string(), "|".to_string());
    templates.insert("!-".to_string(), "|-".to_string());
    templates.insert(
        canonicalize_template_name("((", config),
        "&lbrace;&lbrace;".to_string(),
    );
    templates.insert(
        canonicalize_template_name("))", config),
        "&rbrace;&rbrace;".to_string(),
    );
    templates
}

/// Extracts the canonical template name from a page title, or `None` if the
/// page does not define a template. Documentation and testcase subpages are
/// stored but never registered as templates.
fn template_name_of(title: &str, config: &SiteConfig) -> Option<String> {
    if !title.starts_with("Template:")
        || title.ends_with("/documentation")
        || title.ends_with("/testcases")
    {
        return None;
    }
    Some(canonicalize_template_name(title, config))
}

/// Formats a message the way it appears in the log: location, then text,
/// then the expansion path.
fn format_message(message: &Message) -> String {
    let mut out = String::new();
    if let Some(title) = &message.title {
        out += title;
        if let Some(section) = &message.section {
            out.push('/');
            out += section;
        }
        if let Some(subsection) = &message.subsection {
            out.push('/');
            out += subsection;
        }
        out += ": ";
    }
    out += &message.message;
    if message.path.len() > 1 {
        out += &format!(" at {:?}", message.path);
    }
    out
}
