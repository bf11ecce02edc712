//! Payload file indexes.
//!
//! A [`PayloadIndex`] is the set of relative paths one overlay contributes to the
//! install tree, plus where each file comes from. It is the same shape for folder
//! and archive overlays, so the conflict detector and the applier never care about
//! the source kind.
//!
//! - **Folder** overlays contribute every file below the folder, recursively.
//! - **Archive** overlays contribute every non-directory entry below
//!   `<internal_root>/Mod/`, with that prefix stripped.
//!
//! Relative paths are always forward-slash normalized.

use crate::archive::{ArchiveEntry, ArchiveFormats, ArchiveReader};
use crate::error::{Error, Result};
use crate::paths::{file_stamp, is_contained_rel_path, normalize_rel_path};
use crate::source::{payload_prefix, OverlaySource, SourceIdentity};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use walkdir::WalkDir;

/// Where the bytes for a payload file are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOrigin {
    /// Absolute path of a file inside a folder overlay.
    Disk(Utf8PathBuf),
    /// Entry name inside the overlay's archive.
    ArchiveEntry(String),
}

/// One file contributed by an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    /// Path relative to the install root, `/`-separated.
    pub relative_path: String,
    pub origin: FileOrigin,
}

/// The files one overlay contributes, sorted by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadIndex {
    files: Vec<PayloadFile>,
}

impl PayloadIndex {
    fn from_map(files: BTreeMap<String, FileOrigin>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(relative_path, origin)| PayloadFile {
                    relative_path,
                    origin,
                })
                .collect(),
        }
    }

    /// Index any overlay source, opening archives through `formats`.
    ///
    /// Alongside the index, returns the folder entries that could not be listed.
    /// Archives are listed in one piece, so their error list is always empty.
    pub fn build(source: &OverlaySource, formats: &ArchiveFormats) -> Result<(Self, Vec<Error>)> {
        match source {
            OverlaySource::Folder { path } => index_folder(path),
            OverlaySource::Archive {
                archive_path,
                internal_root,
            } => {
                let mut reader = formats.open(archive_path)?;
                Ok((index_archive(reader.as_mut(), internal_root)?, Vec::new()))
            }
        }
    }

    pub fn files(&self) -> &[PayloadFile] {
        &self.files
    }

    pub fn relative_paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|file| file.relative_path.as_str())
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.files
            .binary_search_by(|file| file.relative_path.as_str().cmp(relative_path))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Enumerate every file below `root`.
///
/// Symlinks are followed. Paths that are not valid UTF-8 are skipped with a
/// warning. A missing root is [`Error::InvalidOverlayDir`]. Entries that cannot
/// be read (dangling links, unreadable sub-directories) are returned as
/// [`Error::FileAccess`] next to the index of everything else.
pub fn index_folder(root: &Utf8Path) -> Result<(PayloadIndex, Vec<Error>)> {
    if !root.as_std_path().is_dir() {
        return Err(Error::InvalidOverlayDir(root.to_path_buf()));
    }

    let mut files = BTreeMap::new();
    let mut errors = Vec::new();
    for entry in WalkDir::new(root.as_std_path()).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|| root.to_string());
                tracing::warn!("Failed to enumerate {}: {}", path, e);
                errors.push(Error::file_access(path, e.into()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
            tracing::warn!("Skipping non-UTF-8 path below {}", root);
            continue;
        };
        let rel = normalize_rel_path(path.strip_prefix(root).unwrap_or(&path).as_str());
        if rel.is_empty() {
            continue;
        }
        files.insert(rel, FileOrigin::Disk(path));
    }

    tracing::debug!(
        "Indexed folder {} ({} files, {} unreadable)",
        root,
        files.len(),
        errors.len()
    );
    Ok((PayloadIndex::from_map(files), errors))
}

/// Filter archive entries down to the payload below `<internal_root>/Mod/`.
///
/// Directory entries, entries outside the payload root and entries that would
/// escape the install root are dropped. If the same relative path is listed twice,
/// the later entry wins.
pub fn index_archive_entries(entries: &[ArchiveEntry], internal_root: &str) -> PayloadIndex {
    let prefix = payload_prefix(internal_root);
    let mut files = BTreeMap::new();

    for entry in entries {
        if entry.is_dir || entry.name.ends_with('/') || entry.name.ends_with('\\') {
            continue;
        }
        let name = entry.name.replace('\\', "/");
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let rel = normalize_rel_path(rest);
        if rel.is_empty() {
            continue;
        }
        if !is_contained_rel_path(&rel) || rest.starts_with('/') {
            tracing::warn!("Skipping archive entry outside payload root: {}", entry.name);
            continue;
        }
        files.insert(rel, FileOrigin::ArchiveEntry(entry.name.clone()));
    }

    PayloadIndex::from_map(files)
}

/// List an open archive and index its payload.
pub fn index_archive(reader: &mut dyn ArchiveReader, internal_root: &str) -> Result<PayloadIndex> {
    let entries = reader.entries()?;
    let index = index_archive_entries(&entries, internal_root);
    tracing::debug!(
        "Indexed archive payload '{}' ({} of {} entries)",
        payload_prefix(internal_root),
        index.len(),
        entries.len()
    );
    Ok(index)
}

struct CachedIndex {
    stamp: u64,
    index: Arc<PayloadIndex>,
}

/// Per-overlay [`PayloadIndex`] cache for repeated conflict detection.
///
/// Archive indexes are cached by source identity together with a stamp of the
/// archive's size and modification time; a changed stamp rebuilds the index.
/// Folder indexes are re-enumerated on every request, since walking the folder
/// is also the only way to notice a change. Failed indexes are never cached.
pub struct IndexCache {
    formats: ArchiveFormats,
    entries: HashMap<SourceIdentity, CachedIndex>,
}

impl Default for IndexCache {
    fn default() -> Self {
        Self::new(ArchiveFormats::default())
    }
}

impl IndexCache {
    pub fn new(formats: ArchiveFormats) -> Self {
        Self {
            formats,
            entries: HashMap::new(),
        }
    }

    pub fn formats(&self) -> &ArchiveFormats {
        &self.formats
    }

    /// Return the index for `source`, reading the archive only when the cached
    /// copy is missing or stale.
    ///
    /// The error list holds folder entries that could not be listed; see
    /// [`index_folder`].
    pub fn get_or_build(
        &mut self,
        source: &OverlaySource,
    ) -> Result<(Arc<PayloadIndex>, Vec<Error>)> {
        let OverlaySource::Archive { archive_path, .. } = source else {
            let (index, errors) = PayloadIndex::build(source, &self.formats)?;
            return Ok((Arc::new(index), errors));
        };

        let identity = source.identity();
        let stamp = file_stamp(archive_path).map_err(|e| Error::archive_read(archive_path, e))?;
        if let Some(cached) = self.entries.get(&identity) {
            if cached.stamp == stamp {
                tracing::debug!("Index cache hit for {}", archive_path);
                return Ok((Arc::clone(&cached.index), Vec::new()));
            }
            tracing::debug!("Archive {} changed; re-indexing", archive_path);
        }

        self.entries.remove(&identity);
        let (index, errors) = PayloadIndex::build(source, &self.formats)?;
        let index = Arc::new(index);
        self.entries.insert(
            identity,
            CachedIndex {
                stamp,
                index: Arc::clone(&index),
            },
        );
        Ok((index, errors))
    }

    /// Drop the cached index for one source.
    pub fn invalidate(&mut self, source: &OverlaySource) {
        self.entries.remove(&source.identity());
    }

    /// Drop every cached index whose source is not in `keep`.
    pub fn retain_sources<'a>(&mut self, keep: impl IntoIterator<Item = &'a OverlaySource>) {
        let keep: Vec<SourceIdentity> = keep.into_iter().map(|s| s.identity()).collect();
        self.entries.retain(|identity, _| keep.contains(identity));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached archive indexes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
