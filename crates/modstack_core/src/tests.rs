//! End-to-end restore/apply/detect cycles over real temp directories.

use crate::test_utils::{init_test_logging, read, utf8_temp_dir, write_tree, write_zip};
use crate::{
    ActiveSequence, ApplyState, ApplyStateTracker, ConflictDetector, Error, GameInstallation,
    InstallLock, OverlayApplier, OverlayEntry, OverlaySource,
};
use camino::Utf8Path;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

struct Fixture {
    _dir: TempDir,
    root: camino::Utf8PathBuf,
    installation: GameInstallation,
}

impl Fixture {
    /// A pristine game with a backup, a folder mod `A` and an archive mod `B` that
    /// both write `data/x/y.txt`.
    fn new() -> Self {
        init_test_logging();
        let (dir, root) = utf8_temp_dir();
        write_tree(
            &root,
            &[
                ("install/game.exe", "exe"),
                ("install/data/x/y.txt", "pristine y"),
                ("install/data/z.txt", "pristine z"),
                ("backup/game.exe", "exe"),
                ("backup/data/x/y.txt", "pristine y"),
                ("backup/data/z.txt", "pristine z"),
                ("mods/a/data/x/y.txt", "A"),
                ("mods/a/data/only_a.txt", "only A"),
            ],
        );
        write_zip(
            &root.join("mods/b.zip"),
            &[
                ("info.json", "{}"),
                ("Mod/data/x/y.txt", "B"),
                ("Mod/data/z.txt", "B z"),
            ],
        );
        let installation = GameInstallation::new(root.join("install"), root.join("backup"));
        Self {
            _dir: dir,
            root,
            installation,
        }
    }

    fn a(&self, order: i64) -> OverlayEntry {
        OverlayEntry::new("A", OverlaySource::folder(self.root.join("mods/a")), order)
    }

    fn b(&self, order: i64) -> OverlayEntry {
        OverlayEntry::new(
            "B",
            OverlaySource::archive(self.root.join("mods/b.zip"), ""),
            order,
        )
    }

    fn applier(&self) -> OverlayApplier {
        OverlayApplier::new(self.installation.clone())
    }

    fn install(&self, rel: &str) -> String {
        read(&self.root, &format!("install/{}", rel))
    }
}

/// Relative path -> contents for every file below `root`.
fn snapshot_tree(root: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root.as_std_path())
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(root.as_std_path())
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (rel, std::fs::read(entry.path()).unwrap())
        })
        .collect()
}

#[test]
fn test_apply_is_idempotent() {
    let fx = Fixture::new();
    let seq = ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]);
    let applier = fx.applier();
    let mut tracker = ApplyStateTracker::new();

    assert!(applier.apply(&seq, &mut tracker).unwrap().succeeded);
    let first = snapshot_tree(&fx.installation.install_root);
    assert!(!tracker.has_changed(&seq, false));

    assert!(applier.apply(&seq, &mut tracker).unwrap().succeeded);
    assert_eq!(snapshot_tree(&fx.installation.install_root), first);
    assert!(!tracker.has_changed(&seq, false));
}

#[test]
fn test_detection_matches_applied_tree() {
    let fx = Fixture::new();
    let seq = ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]);

    let report = ConflictDetector::default().detect(&seq);
    assert_eq!(report.count(), 1);
    assert_eq!(report.conflicts[0].relative_path, "data/x/y.txt");
    assert_eq!(report.conflicts[0].contributors, ["A", "B"]);

    let result = fx.applier().apply(&seq, &mut ApplyStateTracker::new()).unwrap();
    assert!(result.succeeded);

    // Both mods write their own id as the file contents.
    for conflict in &report.conflicts {
        assert_eq!(fx.install(&conflict.relative_path), conflict.winner);
    }
    assert_eq!(fx.install("data/only_a.txt"), "only A");
    assert_eq!(fx.install("data/z.txt"), "B z");
}

#[test]
fn test_swapping_order_swaps_winner() {
    let fx = Fixture::new();
    let applier = fx.applier();
    let mut tracker = ApplyStateTracker::new();
    let mut detector = ConflictDetector::default();

    let seq = ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]);
    applier.apply(&seq, &mut tracker).unwrap();
    assert_eq!(fx.install("data/x/y.txt"), "B");
    assert_eq!(detector.detect(&seq).winner_of("data/x/y.txt"), Some("B"));

    let swapped = ActiveSequence::from_entries(&[fx.a(2), fx.b(1)]);
    assert!(tracker.has_changed(&swapped, false));
    applier.apply(&swapped, &mut tracker).unwrap();
    assert_eq!(fx.install("data/x/y.txt"), "A");
    assert_eq!(detector.detect(&swapped).winner_of("data/x/y.txt"), Some("A"));
}

#[test]
fn test_no_active_overlays_restores_pristine() {
    let fx = Fixture::new();
    let applier = fx.applier();
    let mut tracker = ApplyStateTracker::new();

    applier
        .apply(&ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]), &mut tracker)
        .unwrap();
    assert_eq!(fx.install("data/z.txt"), "B z");

    let none = ActiveSequence::from_entries(&[
        fx.a(1).with_active(false),
        fx.b(2).with_active(false),
    ]);
    let result = applier.apply(&none, &mut tracker).unwrap();
    assert!(result.succeeded);
    assert_eq!(result.files_copied, 0);

    let backup = snapshot_tree(&fx.installation.backup_root);
    let install = snapshot_tree(&fx.installation.install_root);
    for (rel, contents) in &backup {
        assert_eq!(install.get(rel), Some(contents), "{} differs from backup", rel);
    }
}

#[test]
fn test_toggling_active_flag_is_a_change() {
    let fx = Fixture::new();
    let applier = fx.applier();
    let mut tracker = ApplyStateTracker::new();

    let seq = ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]);
    assert!(applier.apply_if_changed(&seq, &mut tracker, false).unwrap().is_some());
    assert!(applier.apply_if_changed(&seq, &mut tracker, false).unwrap().is_none());

    let b_off = ActiveSequence::from_entries(&[fx.a(1), fx.b(2).with_active(false)]);
    let result = applier
        .apply_if_changed(&b_off, &mut tracker, false)
        .unwrap()
        .unwrap();
    assert!(result.succeeded);
    assert_eq!(fx.install("data/x/y.txt"), "A");
    assert_eq!(fx.install("data/z.txt"), "pristine z");
}

#[test]
fn test_unreadable_archive_is_partial_failure() {
    let fx = Fixture::new();
    std::fs::write(fx.root.join("mods/broken.zip"), "not a zip").unwrap();
    let broken = OverlayEntry::new(
        "broken",
        OverlaySource::archive(fx.root.join("mods/broken.zip"), ""),
        3,
    );
    let seq = ActiveSequence::from_entries(&[fx.a(1), fx.b(2), broken]);
    let mut tracker = ApplyStateTracker::new();

    let result = fx.applier().apply(&seq, &mut tracker).unwrap();
    assert!(!result.succeeded);
    assert_eq!(result.state, ApplyState::Failed);
    assert_eq!(result.failed_overlay_ids().collect::<Vec<_>>(), ["broken"]);
    assert_eq!(result.overlays_applied, ["A", "B"]);
    assert_eq!(fx.install("data/x/y.txt"), "B");

    // A failed apply is not recorded, so the next launch tries again.
    assert!(tracker.last_snapshot().is_none());
    assert!(tracker.has_changed(&seq, false));
}

#[cfg(unix)]
#[test]
fn test_unreadable_folder_entry_still_applies_the_rest() {
    let fx = Fixture::new();
    std::os::unix::fs::symlink(
        fx.root.join("mods/a/missing.txt"),
        fx.root.join("mods/a/dangling.txt"),
    )
    .unwrap();
    let seq = ActiveSequence::from_entries(&[fx.a(1)]);
    let mut tracker = ApplyStateTracker::new();

    let result = fx.applier().apply(&seq, &mut tracker).unwrap();
    assert!(!result.succeeded);
    assert_eq!(result.failed_overlay_ids().collect::<Vec<_>>(), ["A"]);
    assert_eq!(result.failed_file_count(), 1);
    assert_eq!(result.files_copied, 2);
    assert_eq!(fx.install("data/x/y.txt"), "A");
    assert_eq!(fx.install("data/only_a.txt"), "only A");
    assert!(tracker.last_snapshot().is_none());

    let report = ConflictDetector::default()
        .detect(&ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]));
    assert_eq!(report.winner_of("data/x/y.txt"), Some("B"));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].overlay_id, "A");
}

#[test]
fn test_missing_archive_reader_is_partial_failure() {
    let fx = Fixture::new();
    write_tree(&fx.root, &[("mods/c.7z", "seven")]);
    let c = OverlayEntry::new("C", OverlaySource::archive(fx.root.join("mods/c.7z"), ""), 3);

    let result = fx
        .applier()
        .apply(&ActiveSequence::from_entries(&[fx.a(1), c]), &mut ApplyStateTracker::new())
        .unwrap();
    assert!(!result.succeeded);
    assert!(matches!(
        result.overlay_failures[0].errors[0],
        Error::UnknownOverlaySource(_)
    ));
    assert_eq!(fx.install("data/x/y.txt"), "A");
}

#[test]
fn test_missing_backup_leaves_install_untouched() {
    let fx = Fixture::new();
    std::fs::remove_dir_all(&fx.installation.backup_root).unwrap();
    write_tree(&fx.root, &[("install/data/x/y.txt", "modded y")]);
    let before = snapshot_tree(&fx.installation.install_root);

    let mut tracker = ApplyStateTracker::new();
    let result = fx
        .applier()
        .apply(&ActiveSequence::from_entries(&[fx.a(1)]), &mut tracker);

    assert!(matches!(result, Err(Error::MissingBackup(_))));
    assert_eq!(snapshot_tree(&fx.installation.install_root), before);
    assert!(tracker.last_snapshot().is_none());
}

#[test]
fn test_cancel_leaves_tracker_and_next_apply_recovers() {
    let fx = Fixture::new();
    let seq = ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]);
    let mut tracker = ApplyStateTracker::new();

    let flag = Arc::new(AtomicBool::new(false));
    let trigger = Arc::clone(&flag);
    let result = fx
        .applier()
        .with_cancel_flag(flag)
        .with_progress(move |p| {
            if p.current_overlay.as_deref() == Some("A") {
                trigger.store(true, Ordering::SeqCst);
            }
        })
        .apply(&seq, &mut tracker)
        .unwrap();
    assert_eq!(result.state, ApplyState::Cancelled);
    assert_eq!(fx.install("data/x/y.txt"), "A");
    assert!(tracker.last_snapshot().is_none());

    let result = fx.applier().apply_if_changed(&seq, &mut tracker, false).unwrap();
    assert!(result.is_some_and(|r| r.succeeded));
    assert_eq!(fx.install("data/x/y.txt"), "B");
}

#[test]
fn test_held_lock_rejects_apply_and_restore() {
    let fx = Fixture::new();
    let _guard = InstallLock::acquire(&fx.installation.install_root).unwrap();
    let applier = fx.applier();
    let mut tracker = ApplyStateTracker::new();

    assert!(matches!(
        applier.apply(&ActiveSequence::default(), &mut tracker),
        Err(Error::ApplyInProgress(_))
    ));
    assert!(matches!(
        applier.restore(&mut tracker),
        Err(Error::ApplyInProgress(_))
    ));
}

#[test]
fn test_progress_does_not_change_result() {
    let fx = Fixture::new();
    let seq = ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]);

    let silent = fx.applier().apply(&seq, &mut ApplyStateTracker::new()).unwrap();
    let silent_tree = snapshot_tree(&fx.installation.install_root);

    let observed = fx
        .applier()
        .with_progress(|_| {})
        .apply(&seq, &mut ApplyStateTracker::new())
        .unwrap();

    assert_eq!(silent.succeeded, observed.succeeded);
    assert_eq!(silent.overlays_applied, observed.overlays_applied);
    assert_eq!(silent.files_copied, observed.files_copied);
    assert_eq!(snapshot_tree(&fx.installation.install_root), silent_tree);
}

#[test]
fn test_tracker_survives_reload() {
    let fx = Fixture::new();
    let state_file = fx.root.join("state/applied.json");
    let seq = ActiveSequence::from_entries(&[fx.a(1), fx.b(2)]);

    let mut tracker = ApplyStateTracker::load(&state_file).unwrap();
    fx.applier().apply(&seq, &mut tracker).unwrap();
    tracker.save(&state_file).unwrap();

    let reloaded = ApplyStateTracker::load(&state_file).unwrap();
    assert!(!reloaded.has_changed(&seq, false));
    assert!(reloaded.has_changed(&seq, true));
}
