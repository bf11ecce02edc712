//! Overlay sources, entries and the active sequence.
//!
//! An overlay's priority lives in exactly one place: [`OverlayEntry::order`].
//! [`ActiveSequence`] is built from it and is the only thing the
//! [`ConflictDetector`](crate::ConflictDetector) and the
//! [`OverlayApplier`](crate::OverlayApplier) ever look at, so the two can never
//! disagree on who wins a path.

use crate::paths::{canonical_path_key, normalize_rel_path};
use crate::state::AppliedSnapshot;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Folder inside an archive that delimits payload files from packaging metadata.
///
/// Only entries below `<internal_root>/Mod/` are considered part of an archive
/// overlay.
pub const PAYLOAD_ROOT_MARKER: &str = "Mod";

/// Where an overlay's files come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OverlaySource {
    /// A plain directory; every file below it is part of the overlay.
    Folder { path: Utf8PathBuf },
    /// A compressed archive; only entries below the payload root count.
    #[serde(rename_all = "camelCase")]
    Archive {
        archive_path: Utf8PathBuf,
        /// Sub-folder containing the [`PAYLOAD_ROOT_MARKER`] folder. Empty when the
        /// marker sits at the archive root.
        #[serde(default)]
        internal_root: String,
    },
}

impl OverlaySource {
    pub fn folder(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Folder { path: path.into() }
    }

    pub fn archive(archive_path: impl Into<Utf8PathBuf>, internal_root: impl Into<String>) -> Self {
        Self::Archive {
            archive_path: archive_path.into(),
            internal_root: internal_root.into(),
        }
    }

    /// Path of the folder or archive on disk.
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::Folder { path } => path,
            Self::Archive { archive_path, .. } => archive_path,
        }
    }

    /// The canonical identity of this source.
    pub fn identity(&self) -> SourceIdentity {
        match self {
            Self::Folder { path } => SourceIdentity(canonical_path_key(path)),
            Self::Archive {
                archive_path,
                internal_root,
            } => SourceIdentity(format!(
                "{}!/{}",
                canonical_path_key(archive_path),
                normalize_rel_path(internal_root)
            )),
        }
    }

    /// Prefix an archive entry must start with to belong to the payload,
    /// e.g. `"Mod/"` or `"variants/red/Mod/"`. `None` for folder sources.
    pub fn payload_prefix(&self) -> Option<String> {
        match self {
            Self::Folder { .. } => None,
            Self::Archive { internal_root, .. } => Some(payload_prefix(internal_root)),
        }
    }
}

impl fmt::Display for OverlaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Folder { path } => write!(f, "{}", path),
            Self::Archive {
                archive_path,
                internal_root,
            } if internal_root.is_empty() => write!(f, "{}", archive_path),
            Self::Archive {
                archive_path,
                internal_root,
            } => write!(f, "{} ({})", archive_path, internal_root),
        }
    }
}

pub(crate) fn payload_prefix(internal_root: &str) -> String {
    let root = normalize_rel_path(internal_root);
    if root.is_empty() {
        format!("{}/", PAYLOAD_ROOT_MARKER)
    } else {
        format!("{}/{}/", root, PAYLOAD_ROOT_MARKER)
    }
}

/// Canonical identity of an [`OverlaySource`].
///
/// A normalized absolute path with forward slashes, case-folded on hosts with
/// case-insensitive file systems. Archive identities carry the internal root so
/// two payloads from the same archive stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceIdentity(String);

impl SourceIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One overlay as configured by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayEntry {
    /// Unique identifier for the overlay (used in reports and logging).
    pub id: String,
    pub source: OverlaySource,
    /// Disabled overlays are kept in the list but never applied.
    pub active: bool,
    /// Ascending priority: lower applies first, higher wins.
    pub order: i64,
}

impl OverlayEntry {
    pub fn new(id: impl Into<String>, source: OverlaySource, order: i64) -> Self {
        Self {
            id: id.into(),
            source,
            active: true,
            order,
        }
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// The ordered, active subset of the configured overlays.
///
/// Built once per change from the full entry list. Entries are sorted by
/// [`OverlayEntry::order`]; entries with equal order keep their list position.
#[derive(Debug, Clone, Default)]
pub struct ActiveSequence {
    overlays: Vec<OverlayEntry>,
    snapshot: AppliedSnapshot,
}

impl ActiveSequence {
    pub fn from_entries(entries: &[OverlayEntry]) -> Self {
        let mut ordered: Vec<OverlayEntry> = entries.to_vec();
        ordered.sort_by_key(|entry| entry.order);

        let snapshot = AppliedSnapshot::from_ordered_entries(&ordered);
        let overlays = ordered.into_iter().filter(|entry| entry.active).collect();

        Self { overlays, snapshot }
    }

    /// Active overlays, lowest priority first.
    pub fn iter(&self) -> std::slice::Iter<'_, OverlayEntry> {
        self.overlays.iter()
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&OverlayEntry> {
        self.overlays.iter().find(|entry| entry.id == id)
    }

    /// Snapshot of the full entry list (active and inactive) this sequence was
    /// built from. This is what gets recorded after a successful apply.
    pub fn snapshot(&self) -> &AppliedSnapshot {
        &self.snapshot
    }
}

impl<'a> IntoIterator for &'a ActiveSequence {
    type Item = &'a OverlayEntry;
    type IntoIter = std::slice::Iter<'a, OverlayEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The live install tree and its pristine backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInstallation {
    /// Directory the application runs from; overwritten by every apply.
    pub install_root: Utf8PathBuf,
    /// Pristine snapshot of `install_root`; the only restore point.
    pub backup_root: Utf8PathBuf,
}

impl GameInstallation {
    pub fn new(install_root: impl Into<Utf8PathBuf>, backup_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            backup_root: backup_root.into(),
        }
    }

    pub fn has_backup(&self) -> bool {
        self.backup_root.as_std_path().is_dir()
    }
}
