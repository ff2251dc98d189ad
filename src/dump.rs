//! The dump driver: streams a MediaWiki XML export (0.10), stores each page,
//! runs template analysis, and replays pages through a user handler across a
//! worker pool.

use crate::{Processor, store::ContentModel};
use bzip2_rs::DecoderReader;
use quick_xml::{Reader, events::Event};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::{
    collections::HashSet,
    fs::File,
    io::{BufRead, BufReader},
    panic::{AssertUnwindSafe, catch_unwind},
    path::Path,
};

/// Errors that may occur while reading a dump.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error on the dump file.
    #[error("dump I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed XML in the dump.
    #[error("dump XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    /// A malformed attribute in the dump.
    #[error("dump XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    /// A page store failure while ingesting.
    #[error(transparent)]
    Store(#[from] crate::store::Error),
}

/// Options controlling dump processing.
#[derive(Clone, Debug, Default)]
pub struct DumpOptions {
    /// When set, pages outside these namespaces are skipped during ingest.
    pub namespaces: Option<HashSet<i32>>,
    /// Stop after ingest and analysis, without replaying pages.
    pub phase1_only: bool,
}

/// One page yielded by the dump reader.
#[derive(Debug, Default)]
struct RawPage {
    /// The page title.
    title: String,
    /// The namespace number from the `<ns>` element.
    namespace: i32,
    /// The content model, or `redirect`.
    model: String,
    /// The page text, or the redirect target.
    text: String,
    /// Set when a `<redirect>` element was seen.
    is_redirect: bool,
}

/// Streams the pages of a MediaWiki XML export, calling `page_cb` with
/// `(model, title, text)` for each page that passes the namespace filter.
/// A `.bz2` dump is decompressed on the fly.
pub fn read_pages(
    path: impl AsRef<Path>,
    namespaces: Option<&HashSet<i32>>,
    mut page_cb: impl FnMut(&str, &str, &str) -> Result<(), crate::store::Error>,
) -> Result<(), Error> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "bz2") {
        Box::new(BufReader::new(DecoderReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut xml = Reader::from_reader(reader);
    let mut buf = Vec::new();
    let mut page: Option<RawPage> = None;
    // The element whose text content is currently being collected
    let mut field: Option<&'static str> = None;

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(start) => match start.local_name().as_ref() {
                b"page" => page = Some(RawPage::default()),
                b"title" => field = Some("title"),
                b"ns" => field = Some("ns"),
                b"model" => field = Some("model"),
                b"text" => field = Some("text"),
                _ => field = None,
            },
            Event::Empty(empty) => {
                if empty.local_name().as_ref() == b"redirect"
                    && let Some(page) = &mut page
                    && let Some(attr) = empty.try_get_attribute("title")?
                {
                    page.is_redirect = true;
                    page.text = attr.unescape_value()?.into_owned();
                }
            }
            Event::Text(text) => {
                if let (Some(page), Some(field)) = (&mut page, field) {
                    let text = text.unescape()?;
                    match field {
                        "title" => page.title += &text,
                        "ns" => page.namespace = text.trim().parse().unwrap_or(0),
                        "model" => page.model += &text,
                        // A redirect's target came from the redirect element
                        "text" if !page.is_redirect => page.text += &text,
                        _ => {}
                    }
                }
            }
            Event::End(end) => match end.local_name().as_ref() {
                b"page" => {
                    if let Some(page) = page.take() {
                        let allowed = namespaces
                            .is_none_or(|namespaces| namespaces.contains(&page.namespace));
                        if allowed && !page.title.is_empty() {
                            let model =
                                if page.is_redirect { "redirect" } else { page.model.as_str() };
                            page_cb(model, &page.title, &page.text)?;
                        }
                    }
                }
                _ => field = None,
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

impl Processor {
    /// Processes a dump file in two phases: ingest every page (and analyze
    /// templates), then replay page bodies through `handler` across a worker
    /// pool. Results are returned in arbitrary order with `None`s filtered.
    ///
    /// The handler receives a worker-local processor (with `start_page`
    /// already called), the content model, the title, and the page body. It
    /// must not assume any page ordering.
    pub fn process<R, F>(
        &mut self,
        path: impl AsRef<Path>,
        handler: F,
        options: &DumpOptions,
    ) -> Result<Vec<R>, Error>
    where
        R: Send,
        F: Fn(&mut Processor, &str, &str, Option<&str>) -> Option<R> + Sync,
    {
        read_pages(&path, options.namespaces.as_ref(), |model, title, text| {
            self.add_page(ContentModel::parse(model), title, text)
        })?;

        if !self.quiet {
            log::info!("collected {} raw pages", self.store().len());
        }
        self.analyze_templates();

        if options.phase1_only {
            return Ok(Vec::new());
        }
        self.reprocess(handler, true)
    }

    /// Replays all stored pages through `handler` in parallel. When
    /// `autoload` is false, the handler receives `None` for the body and
    /// must read what it needs through the processor.
    pub fn reprocess<R, F>(&mut self, handler: F, autoload: bool) -> Result<Vec<R>, Error>
    where
        R: Send,
        F: Fn(&mut Processor, &str, &str, Option<&str>) -> Option<R> + Sync,
    {
        // Freeze the store so every worker handle sees all bodies
        self.store_mut().flush()?;
        let order = self.store().order();
        let seed = self.fork_seed()?;

        let results: Vec<Option<R>> = order
            .par_iter()
            .map_init(
                || seed.spawn(),
                |worker, (model, title)| {
                    let worker = worker.as_mut().ok()?;
                    worker.start_page(title);
                    let text = if autoload { worker.read_by_title(title) } else { None };
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        handler(worker, model, title, text.as_deref())
                    }));
                    match outcome {
                        Ok(result) => result,
                        Err(panic) => {
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| (*s).to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            log::error!("EXCEPTION while parsing page {title:?}: {message}");
                            None
                        }
                    }
                },
            )
            .collect();

        Ok(results.into_iter().flatten().collect())
    }
}
