//! The store snapshot sidecar.
//!
//! After ingest and analysis, the in-memory index, redirect map, templates
//! map, and pre-expand set can be saved next to the data file so that a
//! subsequent run can skip ingest entirely.

use super::{Entry, Error, PageStore};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    sync::Arc,
};

/// The only supported snapshot format version.
const VERSION: u32 = 1;

/// The serialised snapshot contents.
#[derive(Serialize, Deserialize)]
pub(crate) struct Snapshot {
    /// Format version tag.
    version: u32,
    /// The page index.
    index: HashMap<String, Entry>,
    /// `(model, title)` ingest order.
    order: Vec<(String, String)>,
    /// Redirect map.
    redirects: HashMap<String, String>,
    /// Canonical template name to body.
    pub templates: HashMap<String, String>,
    /// The sorted pre-expand set, or `None` if analysis has not run.
    pub pre_expand: Option<Vec<String>>,
}

/// Writes a snapshot of the store and the derived template data to `path`.
pub(crate) fn save(
    path: impl AsRef<Path>,
    store: &PageStore,
    templates: &HashMap<String, String>,
    pre_expand: Option<&HashSet<String>>,
) -> Result<(), Error> {
    let mut sorted = pre_expand.map(|set| set.iter().cloned().collect::<Vec<_>>());
    if let Some(sorted) = &mut sorted {
        sorted.sort_unstable();
    }
    let snapshot = Snapshot {
        version: VERSION,
        index: (*store.index).clone(),
        order: (*store.order).clone(),
        redirects: (*store.redirects).clone(),
        templates: templates.clone(),
        pre_expand: sorted,
    };
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer(file, &snapshot)?;
    Ok(())
}

/// Reads a snapshot from `snapshot_path` and reconstitutes a store over the
/// existing data file at `data_path`.
pub(crate) fn load(
    snapshot_path: impl AsRef<Path>,
    data_path: impl AsRef<Path>,
) -> Result<(PageStore, Snapshot), Error> {
    let file = BufReader::new(File::open(snapshot_path)?);
    let snapshot: Snapshot = serde_json::from_reader(file)?;
    if snapshot.version != VERSION {
        return Err(Error::SnapshotVersion(snapshot.version));
    }

    let file = File::options().read(true).open(data_path)?;
    let flushed = file.metadata()?.len();
    let store = PageStore {
        data: super::DataFile { file, buf: Vec::new(), flushed },
        index: Arc::new(snapshot.index.clone()),
        order: Arc::new(snapshot.order.clone()),
        redirects: Arc::new(snapshot.redirects.clone()),
        transient: HashMap::new(),
    };
    Ok((store, snapshot))
}
