//! The page store: every ingested page body lives in an append-only data
//! file, indexed in memory by title. The store also tracks redirects and the
//! ingest order used for the replay phase.

use crate::{config::SiteConfig, title::namespace_of};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io,
    path::Path,
    sync::Arc,
};

pub(crate) mod snapshot;

/// Errors that may occur when interacting with the page store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A page was added with an empty title.
    #[error("page title must not be empty")]
    EmptyTitle,
    /// An I/O error occurred on the data file.
    #[error("data file I/O error: {0}")]
    Io(#[from] io::Error),
    /// A snapshot could not be encoded or decoded.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
    /// A snapshot was written by an incompatible version.
    #[error("unsupported snapshot version {0}")]
    SnapshotVersion(u32),
    /// A page body was not valid UTF-8.
    #[error("invalid utf-8 in stored page: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),
}

/// The content model of a stored page.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ContentModel {
    /// Ordinary wikitext.
    Wikitext,
    /// A redirect; the body is the target title.
    Redirect,
    /// An embedded script module (`Scribunto` in dump files).
    ScriptModule,
    /// Any other model encountered in a dump (CSS, JSON, …).
    Other(String),
}

impl ContentModel {
    /// Parses a dump file model string.
    pub fn parse(model: &str) -> Self {
        match model {
            "wikitext" => ContentModel::Wikitext,
            "redirect" => ContentModel::Redirect,
            "Scribunto" | "scribunto" => ContentModel::ScriptModule,
            other => ContentModel::Other(other.to_string()),
        }
    }

    /// The dump file model string for this model.
    pub fn as_str(&self) -> &str {
        match self {
            ContentModel::Wikitext => "wikitext",
            ContentModel::Redirect => "redirect",
            ContentModel::ScriptModule => "Scribunto",
            ContentModel::Other(other) => other,
        }
    }
}

/// A stored page record. Immutable after ingest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Page {
    /// The full page title, including any namespace prefix.
    pub title: String,
    /// The namespace ID derived from the title prefix.
    pub namespace_id: i32,
    /// The content model.
    pub model: ContentModel,
    /// The page body. For redirects this is the target title.
    pub body: String,
}

/// An index entry locating one page body in the data file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Entry {
    /// Byte offset of the body in the data file.
    pub offset: u64,
    /// Byte length of the body.
    pub len: u32,
    /// The content model string.
    pub model: ContentModel,
    /// The namespace ID derived from the title.
    pub namespace_id: i32,
}

/// The append-only data file plus its write buffer.
///
/// Bodies are buffered in memory and flushed in large chunks. A body is
/// always flushed as a unit, so any byte range for a single page is either
/// fully on disk or fully in the buffer, which keeps reads lock-free.
struct DataFile {
    /// The backing file.
    file: File,
    /// Unflushed tail of the file.
    buf: Vec<u8>,
    /// Number of bytes already flushed to disk.
    flushed: u64,
}

/// Flush the write buffer once it exceeds this many bytes.
const WRITE_BUFFER_SIZE: usize = 1 << 22;

impl DataFile {
    /// Appends a body, returning its offset.
    fn append(&mut self, body: &[u8]) -> io::Result<u64> {
        if self.buf.len() + body.len() > WRITE_BUFFER_SIZE {
            self.flush()?;
        }
        let offset = self.flushed + self.buf.len() as u64;
        self.buf.extend_from_slice(body);
        Ok(offset)
    }

    /// Flushes the write buffer to disk.
    fn flush(&mut self) -> io::Result<()> {
        use io::Write as _;
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
            self.flushed += self.buf.len() as u64;
            self.buf.clear();
        }
        Ok(())
    }

    /// Reads `len` bytes at `offset` using a positional read, so that
    /// parallel workers can share the handle without seek races.
    fn read(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if offset >= self.flushed {
            let start = usize::try_from(offset - self.flushed).expect("offset out of range");
            return Ok(self.buf[start..start + len].to_vec());
        }
        let mut out = vec![0; len];
        read_exact_at(&self.file, &mut out, offset)?;
        Ok(out)
    }

    /// Opens an independent handle on the same file for a worker. The write
    /// buffer must have been flushed first.
    fn reopen(&self) -> io::Result<DataFile> {
        debug_assert!(self.buf.is_empty(), "fork of unflushed data file");
        Ok(DataFile {
            file: self.file.try_clone()?,
            buf: Vec::new(),
            flushed: self.flushed,
        })
    }
}

/// Reads exactly `buf.len()` bytes at `offset` without moving the file
/// cursor.
#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt as _;
    file.read_exact_at(buf, offset)
}

/// Reads exactly `buf.len()` bytes at `offset`. Windows positional reads
/// move the cursor, which is harmless here because nothing else uses it.
#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt as _;
    let mut done = 0;
    while done < buf.len() {
        let n = file.seek_read(&mut buf[done..], offset + done as u64)?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        done += n;
    }
    Ok(())
}

/// The page store.
pub struct PageStore {
    /// The append-only data file.
    data: DataFile,
    /// Index from title to data file location.
    index: Arc<HashMap<String, Entry>>,
    /// `(model, title)` pairs in ingest order, replayed by phase 2.
    order: Arc<Vec<(String, String)>>,
    /// Redirect source title to target title.
    redirects: Arc<HashMap<String, String>>,
    /// Unsaved pages that shadow stored pages.
    transient: HashMap<String, Page>,
}

impl PageStore {
    /// Creates a store backed by an anonymous temporary file.
    pub fn temporary() -> Result<Self, Error> {
        Ok(Self::from_file(tempfile::tempfile()?))
    }

    /// Creates a store backed by a data file at `path`, truncating any
    /// existing file.
    pub fn at_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_file(file))
    }

    /// Creates a store over an already-open data file.
    fn from_file(file: File) -> Self {
        Self {
            data: DataFile { file, buf: Vec::new(), flushed: 0 },
            index: Arc::default(),
            order: Arc::default(),
            redirects: Arc::default(),
            transient: HashMap::new(),
        }
    }

    /// Adds a page body to the store. Re-adding a title replaces the index
    /// entry; the old body remains as dead space in the data file.
    pub fn add_page(
        &mut self,
        model: ContentModel,
        title: &str,
        text: &str,
        config: &SiteConfig,
    ) -> Result<(), Error> {
        if title.is_empty() {
            return Err(Error::EmptyTitle);
        }

        let offset = self.data.append(text.as_bytes())?;
        let entry = Entry {
            offset,
            len: u32::try_from(text.len()).unwrap_or(u32::MAX),
            model: model.clone(),
            namespace_id: namespace_of(title, config),
        };
        Arc::make_mut(&mut self.index).insert(title.to_string(), entry);
        Arc::make_mut(&mut self.order).push((model.as_str().to_string(), title.to_string()));

        if model == ContentModel::Redirect {
            Arc::make_mut(&mut self.redirects).insert(title.to_string(), text.to_string());
        }
        Ok(())
    }

    /// Registers a transient page that shadows any stored page with the same
    /// title. Transient pages are not written to the data file and do not
    /// appear in the replay order.
    pub fn add_transient(&mut self, page: Page) {
        self.transient.insert(page.title.clone(), page);
    }

    /// Returns the page record for `title`, or `None` if no such page
    /// exists. Does not follow redirects.
    pub fn get_page(&self, title: &str) -> Option<Page> {
        let title = title.strip_prefix("Main:").unwrap_or(title);
        if let Some(page) = self.transient.get(title) {
            return Some(page.clone());
        }
        let entry = self.index.get(title)?;
        let body = self
            .data
            .read(entry.offset, entry.len as usize)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())?;
        Some(Page {
            title: title.to_string(),
            namespace_id: entry.namespace_id,
            model: entry.model.clone(),
            body,
        })
    }

    /// Returns the page record for `title`, resolving exactly one level of
    /// redirect. A redirect chain is not followed further, so a redirect
    /// cycle cannot loop this operation.
    pub fn get_page_resolve_redirect(&self, title: &str) -> Option<Page> {
        let page = self.get_page(title)?;
        if page.model == ContentModel::Redirect {
            self.get_page(&page.body)
        } else {
            Some(page)
        }
    }

    /// Returns the raw body of the page, or `None` if the page does not
    /// exist. A missing page is not an error.
    pub fn read_by_title(&self, title: &str) -> Option<String> {
        self.get_page(title).map(|page| page.body)
    }

    /// Returns true if the page exists.
    pub fn page_exists(&self, title: &str) -> bool {
        let title = title.strip_prefix("Main:").unwrap_or(title);
        self.transient.contains_key(title) || self.index.contains_key(title)
    }

    /// Iterates over `(model, title)` pairs in ingest order.
    pub fn iterate(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().map(|(model, title)| (model.as_str(), title.as_str()))
    }

    /// The number of stored pages (excluding transient pages).
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if no pages have been stored.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The redirect map.
    pub(crate) fn redirects(&self) -> &HashMap<String, String> {
        &self.redirects
    }

    /// The ingest order, shared for parallel replay.
    pub(crate) fn order(&self) -> Arc<Vec<(String, String)>> {
        Arc::clone(&self.order)
    }

    /// Flushes buffered writes so that forks and snapshots see every body.
    pub(crate) fn flush(&mut self) -> Result<(), Error> {
        self.data.flush()?;
        Ok(())
    }

    /// Creates a read-only view of this store for a parallel worker, with
    /// its own handle on the shared data file.
    pub(crate) fn fork(&self) -> Result<PageStore, Error> {
        Ok(PageStore {
            data: self.data.reopen()?,
            index: Arc::clone(&self.index),
            order: Arc::clone(&self.order),
            redirects: Arc::clone(&self.redirects),
            transient: self.transient.clone(),
        })
    }

    /// Drops all stored pages, redirects, and transient pages.
    pub(crate) fn reset(&mut self, file: File) {
        self.data = DataFile { file, buf: Vec::new(), flushed: 0 };
        self.index = Arc::default();
        self.order = Arc::default();
        self.redirects = Arc::default();
        self.transient.clear();
    }
}
