//! Apply-state tracking for the launch-time change gate.
//!
//! After a successful apply, the [`AppliedSnapshot`] of the overlay list is stored in
//! the [`ApplyStateTracker`]. On the next launch, [`has_changed`] compares it against
//! the snapshot of the proposed [`ActiveSequence`]; if they match, the whole
//! restore/apply cycle is skipped.
//!
//! The comparison is strict: any change to the list (including reordering or
//! toggling an entry) counts as a change. The tracker can be persisted as JSON by a
//! host settings layer through [`ApplyStateTracker::load`] and
//! [`ApplyStateTracker::save`].

use crate::error::Result;
use crate::source::{ActiveSequence, OverlayEntry, SourceIdentity};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

/// Schema version of the persisted state. A file with another version is treated
/// as "never applied".
pub const STATE_VERSION: u32 = 1;

/// One rank of an [`AppliedSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub source: SourceIdentity,
    pub active: bool,
}

/// Ordered `(source identity, active)` pairs for every configured overlay.
///
/// Two equal snapshots always produce identical install trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppliedSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl AppliedSnapshot {
    /// Build a snapshot from entries that are already sorted by priority.
    pub(crate) fn from_ordered_entries(entries: &[OverlayEntry]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|entry| SnapshotEntry {
                    source: entry.source.identity(),
                    active: entry.active,
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decide whether the install tree must be rebuilt.
///
/// Rules, first match wins:
///
/// 1. `force` is set -> `true`
/// 2. nothing was ever applied -> `true`
/// 3. the last and proposed snapshots are both empty -> `false`
/// 4. the snapshots have different lengths -> `true`
/// 5. any rank differs in source identity or active flag -> `true`
/// 6. otherwise -> `false`
pub fn has_changed(
    last: Option<&AppliedSnapshot>,
    proposed: &AppliedSnapshot,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    let Some(last) = last else {
        return true;
    };
    if last.is_empty() && proposed.is_empty() {
        return false;
    }
    if last.len() != proposed.len() {
        return true;
    }
    last.entries
        .iter()
        .zip(&proposed.entries)
        .any(|(a, b)| a.source != b.source || a.active != b.active)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    version: u32,
    snapshot: AppliedSnapshot,
}

/// Holds the snapshot of the last successful apply.
///
/// Only [`OverlayApplier`](crate::OverlayApplier) records into the tracker, and only
/// after an apply that finished without cancellation or failures.
#[derive(Debug, Clone, Default)]
pub struct ApplyStateTracker {
    last: Option<AppliedSnapshot>,
}

impl ApplyStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a snapshot persisted elsewhere.
    pub fn with_snapshot(snapshot: AppliedSnapshot) -> Self {
        Self {
            last: Some(snapshot),
        }
    }

    pub fn last_snapshot(&self) -> Option<&AppliedSnapshot> {
        self.last.as_ref()
    }

    /// See [`has_changed`].
    pub fn has_changed(&self, sequence: &ActiveSequence, force: bool) -> bool {
        has_changed(self.last.as_ref(), sequence.snapshot(), force)
    }

    pub(crate) fn record(&mut self, snapshot: AppliedSnapshot) {
        self.last = Some(snapshot);
    }

    /// Forget the last apply, e.g. after the backup was reset or the install tree
    /// was restored by hand.
    pub fn clear(&mut self) {
        self.last = None;
    }

    /// Load tracker state from a JSON file.
    ///
    /// Returns an empty tracker if the file doesn't exist or was written with a
    /// different schema version. Returns `Err` if the file exists but cannot be
    /// parsed.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.as_std_path().exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path.as_std_path())?;
        let state: PersistedState = serde_json::from_str(&contents)?;
        if state.version != STATE_VERSION {
            tracing::info!(
                "Apply state version changed ({} -> {}); treating as never applied",
                state.version,
                STATE_VERSION
            );
            return Ok(Self::default());
        }
        Ok(Self::with_snapshot(state.snapshot))
    }

    /// Save tracker state to a JSON file, creating parent directories if needed.
    ///
    /// An empty tracker removes the file so the next load reports "never applied".
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let Some(snapshot) = &self.last else {
            if path.as_std_path().exists() {
                std::fs::remove_file(path.as_std_path())?;
            }
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }

        let contents = serde_json::to_string_pretty(&PersistedState {
            version: STATE_VERSION,
            snapshot: snapshot.clone(),
        })?;
        std::fs::write(path.as_std_path(), contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::OverlaySource;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn entry(id: &str, order: i64) -> OverlayEntry {
        OverlayEntry::new(id, OverlaySource::folder(format!("/mods/{}", id)), order)
    }

    fn snapshot(entries: &[OverlayEntry]) -> AppliedSnapshot {
        ActiveSequence::from_entries(entries).snapshot().clone()
    }

    #[test]
    fn test_force_always_changed() {
        let last = snapshot(&[entry("a", 1)]);
        assert!(has_changed(Some(&last), &last.clone(), true));
    }

    #[test]
    fn test_never_applied_is_changed() {
        assert!(has_changed(None, &AppliedSnapshot::default(), false));
    }

    #[test]
    fn test_empty_to_empty_is_unchanged() {
        let empty = AppliedSnapshot::default();
        assert!(!has_changed(Some(&empty), &empty.clone(), false));
    }

    #[test]
    fn test_identical_is_unchanged() {
        let last = snapshot(&[entry("a", 1)]);
        let proposed = snapshot(&[entry("a", 1)]);
        assert!(!has_changed(Some(&last), &proposed, false));
    }

    #[test]
    fn test_toggle_is_changed() {
        let last = snapshot(&[entry("a", 1)]);
        let proposed = snapshot(&[entry("a", 1).with_active(false)]);
        assert!(has_changed(Some(&last), &proposed, false));
    }

    #[test]
    fn test_added_overlay_is_changed() {
        let last = snapshot(&[entry("a", 1)]);
        let proposed = snapshot(&[entry("a", 1), entry("c", 2)]);
        assert!(has_changed(Some(&last), &proposed, false));
    }

    #[test]
    fn test_reorder_is_changed() {
        let last = snapshot(&[entry("a", 1), entry("b", 2)]);
        let proposed = snapshot(&[entry("a", 2), entry("b", 1)]);
        assert!(has_changed(Some(&last), &proposed, false));
    }

    #[test]
    fn test_order_values_alone_do_not_matter() {
        // Only the resulting rank is compared, not the raw order numbers.
        let last = snapshot(&[entry("a", 1), entry("b", 2)]);
        let proposed = snapshot(&[entry("a", 10), entry("b", 20)]);
        assert!(!has_changed(Some(&last), &proposed, false));
    }

    #[test]
    fn test_tracker_gate() {
        let seq = ActiveSequence::from_entries(&[entry("a", 1)]);
        let mut tracker = ApplyStateTracker::new();
        assert!(tracker.has_changed(&seq, false));

        tracker.record(seq.snapshot().clone());
        assert!(!tracker.has_changed(&seq, false));
        assert!(tracker.has_changed(&seq, true));

        tracker.clear();
        assert!(tracker.has_changed(&seq, false));
    }

    #[test]
    fn test_save_and_load() {
        let temp = NamedTempFile::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap();

        let seq = ActiveSequence::from_entries(&[entry("a", 1), entry("b", 2).with_active(false)]);
        let tracker = ApplyStateTracker::with_snapshot(seq.snapshot().clone());
        tracker.save(path).unwrap();

        let loaded = ApplyStateTracker::load(path).unwrap();
        assert_eq!(loaded.last_snapshot(), Some(seq.snapshot()));
        assert!(!loaded.has_changed(&seq, false));
    }

    #[test]
    fn test_save_empty_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("applied.json")).unwrap();

        ApplyStateTracker::with_snapshot(AppliedSnapshot::default())
            .save(&path)
            .unwrap();
        assert!(path.exists());

        ApplyStateTracker::new().save(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_load_nonexistent() {
        let temp = NamedTempFile::new().unwrap();
        let std_path = temp.path().with_extension("nonexistent");
        let path = Utf8Path::from_path(&std_path).unwrap();

        let loaded = ApplyStateTracker::load(path).unwrap();
        assert!(loaded.last_snapshot().is_none());
    }

    #[test]
    fn test_load_other_version() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(br#"{ "version": 99, "snapshot": [] }"#)
            .unwrap();
        temp.flush().unwrap();

        let path = Utf8Path::from_path(temp.path()).unwrap();
        let loaded = ApplyStateTracker::load(path).unwrap();
        assert!(loaded.last_snapshot().is_none());
    }

    #[test]
    fn test_load_invalid_json() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"{ invalid json }").unwrap();
        temp.flush().unwrap();

        let path = Utf8Path::from_path(temp.path()).unwrap();
        assert!(ApplyStateTracker::load(path).is_err());
    }
}
