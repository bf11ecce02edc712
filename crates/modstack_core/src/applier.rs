//! Ordered overlay application.
//!
//! The [`OverlayApplier`] drives the full restore/apply cycle for one
//! [`GameInstallation`].
//!
//! # Apply Algorithm
//!
//! 1. Claim the install root with an [`InstallLock`]; a second concurrent cycle
//!    fails with [`ApplyInProgress`](crate::Error::ApplyInProgress).
//! 2. **Restoring**: copy the pristine backup over the install root. A missing
//!    backup aborts with [`MissingBackup`](crate::Error::MissingBackup) before any
//!    file is touched.
//! 3. **Applying**: walk the [`ActiveSequence`] lowest priority first. For each
//!    overlay, build its [`PayloadIndex`](crate::PayloadIndex) (archives are opened
//!    once and read in the same session), plan the copies and execute them,
//!    overwriting whatever is on disk. The last overlay to write a path wins.
//!    An overlay that fails is recorded and the next one still runs.
//! 4. **Done**: if nothing failed, record the sequence's
//!    [`AppliedSnapshot`] in the [`ApplyStateTracker`]. Otherwise the state is
//!    **Failed** and the tracker is left alone so the next launch applies again.
//!
//! Cancellation is checked before the restore and between overlays, never in the
//! middle of an overlay. A cancelled cycle leaves the tree partially applied and
//! never touches the tracker.

use crate::archive::ArchiveFormats;
use crate::backup::{restore_into, RestoreReport};
use crate::error::{Error, OverlayFailure, Result};
use crate::index::{index_archive, index_folder};
use crate::lock::InstallLock;
use crate::plan::{execute, CopyOutcome, CopyPlan};
use crate::source::{ActiveSequence, GameInstallation, OverlayEntry, OverlaySource};
use crate::state::{AppliedSnapshot, ApplyStateTracker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress information emitted during an apply.
///
/// `current`/`total` count overlays and are only meaningful during
/// [`Applying`](ApplyStage::Applying). Ignoring progress never changes the result.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyProgress {
    pub stage: ApplyStage,
    /// Id of the overlay being applied.
    pub current_overlay: Option<String>,
    /// 1-based index of the overlay being applied.
    pub current: u32,
    pub total: u32,
}

/// Stages reported through [`ApplyProgress`], in order:
/// `Restoring` -> `Applying` (repeated) -> `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyStage {
    Restoring,
    Applying,
    Complete,
}

/// States of the apply state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Idle,
    Restoring,
    Applying { current: usize, total: usize },
    /// Every overlay and every file was applied.
    Done,
    /// The cycle ran to the end but some overlay or file failed.
    Failed,
    /// Stopped at an overlay boundary on request.
    Cancelled,
}

/// Summary returned after an apply cycle.
#[derive(Debug)]
pub struct ApplyResult {
    /// `true` only when the state is [`ApplyState::Done`].
    pub succeeded: bool,
    pub state: ApplyState,
    /// Overlays that failed, in apply order.
    pub overlay_failures: Vec<OverlayFailure>,
    /// Files that could not be restored from the backup.
    pub restore_errors: Vec<Error>,
    /// Ids of overlays applied without any error, in apply order.
    pub overlays_applied: Vec<String>,
    pub files_restored: usize,
    /// Overlay files written (a path written by two overlays counts twice).
    pub files_copied: usize,
    /// Snapshot recorded in the tracker; `None` unless the apply succeeded.
    pub applied_snapshot: Option<AppliedSnapshot>,
    /// Wall-clock time for the whole cycle.
    pub elapsed: Duration,
}

impl ApplyResult {
    fn new(state: ApplyState) -> Self {
        Self {
            succeeded: false,
            state,
            overlay_failures: Vec::new(),
            restore_errors: Vec::new(),
            overlays_applied: Vec::new(),
            files_restored: 0,
            files_copied: 0,
            applied_snapshot: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn failed_overlay_ids(&self) -> impl Iterator<Item = &str> {
        self.overlay_failures.iter().map(|f| f.overlay_id.as_str())
    }

    /// Total number of files that could not be written, restore included.
    pub fn failed_file_count(&self) -> usize {
        self.restore_errors.len()
            + self
                .overlay_failures
                .iter()
                .map(OverlayFailure::failed_files)
                .sum::<usize>()
    }
}

type ProgressCallback = Arc<dyn Fn(ApplyProgress) + Send + Sync>;

/// Runs restore/apply cycles against one [`GameInstallation`].
///
/// Create an applier with [`new`](Self::new), optionally configure it with
/// [`with_progress`](Self::with_progress), [`with_cancel_flag`](Self::with_cancel_flag)
/// and [`with_archive_formats`](Self::with_archive_formats), then call
/// [`apply`](Self::apply) or [`apply_if_changed`](Self::apply_if_changed).
/// All file operations block; run the applier off any UI thread.
pub struct OverlayApplier {
    installation: GameInstallation,
    formats: ArchiveFormats,
    progress_callback: Option<ProgressCallback>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl OverlayApplier {
    pub fn new(installation: GameInstallation) -> Self {
        Self {
            installation,
            formats: ArchiveFormats::default(),
            progress_callback: None,
            cancel_flag: None,
        }
    }

    /// Register a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ApplyProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Stop at the next overlay boundary once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    /// Archive formats used to open archive overlays. Defaults to ZIP only.
    pub fn with_archive_formats(mut self, formats: ArchiveFormats) -> Self {
        self.formats = formats;
        self
    }

    pub fn installation(&self) -> &GameInstallation {
        &self.installation
    }

    /// Apply only if [`ApplyStateTracker::has_changed`] says the tree is stale.
    ///
    /// Returns `Ok(None)` without touching disk when the last successful apply
    /// used the same overlay list.
    pub fn apply_if_changed(
        &self,
        sequence: &ActiveSequence,
        tracker: &mut ApplyStateTracker,
        force: bool,
    ) -> Result<Option<ApplyResult>> {
        if !tracker.has_changed(sequence, force) {
            tracing::info!("Overlays unchanged since last apply; skipping");
            return Ok(None);
        }
        self.apply(sequence, tracker).map(Some)
    }

    /// Restore the install root and apply `sequence` on top of it.
    ///
    /// Returns `Err` only for [`MissingBackup`](Error::MissingBackup) and
    /// [`ApplyInProgress`](Error::ApplyInProgress); every other problem is
    /// reported in the [`ApplyResult`].
    pub fn apply(
        &self,
        sequence: &ActiveSequence,
        tracker: &mut ApplyStateTracker,
    ) -> Result<ApplyResult> {
        let start_time = Instant::now();
        let install_root = &self.installation.install_root;

        tracing::info!("Applying overlays...");
        tracing::info!("Install root: {}", install_root);
        tracing::info!("Backup root: {}", self.installation.backup_root);
        tracing::info!("Active overlays: {}", sequence.len());

        let _lock = InstallLock::acquire(install_root)?;
        let mut result = ApplyResult::new(ApplyState::Idle);

        if self.is_cancelled() {
            return Ok(self.finish_cancelled(result, start_time));
        }

        self.transition(&mut result, ApplyState::Restoring);
        self.emit_progress(ApplyProgress {
            stage: ApplyStage::Restoring,
            current_overlay: None,
            current: 0,
            total: sequence.len() as u32,
        });

        let RestoreReport {
            files_restored,
            errors,
        } = restore_into(install_root, &self.installation.backup_root)?;
        result.files_restored = files_restored;
        result.restore_errors = errors;

        let total = sequence.len();
        for (idx, entry) in sequence.iter().enumerate() {
            if self.is_cancelled() {
                return Ok(self.finish_cancelled(result, start_time));
            }

            self.transition(
                &mut result,
                ApplyState::Applying {
                    current: idx + 1,
                    total,
                },
            );
            self.emit_progress(ApplyProgress {
                stage: ApplyStage::Applying,
                current_overlay: Some(entry.id.clone()),
                current: (idx + 1) as u32,
                total: total as u32,
            });

            match self.apply_overlay(entry) {
                Ok(outcome) => {
                    result.files_copied += outcome.copied;
                    if outcome.is_clean() {
                        tracing::info!("Overlay {} applied ({} files)", entry.id, outcome.copied);
                        result.overlays_applied.push(entry.id.clone());
                    } else {
                        tracing::warn!(
                            "Overlay {} applied with {} failed file(s)",
                            entry.id,
                            outcome.errors.len()
                        );
                        result
                            .overlay_failures
                            .push(OverlayFailure::new(entry.id.clone(), outcome.errors));
                    }
                }
                Err(e) => {
                    tracing::warn!("Overlay {} failed: {}", entry.id, e);
                    result
                        .overlay_failures
                        .push(OverlayFailure::new(entry.id.clone(), vec![e]));
                }
            }
        }

        if result.overlay_failures.is_empty() && result.restore_errors.is_empty() {
            self.transition(&mut result, ApplyState::Done);
            result.succeeded = true;
            let snapshot = sequence.snapshot().clone();
            tracker.record(snapshot.clone());
            result.applied_snapshot = Some(snapshot);
        } else {
            self.transition(&mut result, ApplyState::Failed);
            tracing::warn!(
                "Apply finished with {} failed overlay(s) and {} failed file(s); state not recorded",
                result.overlay_failures.len(),
                result.failed_file_count()
            );
        }

        self.emit_progress(ApplyProgress {
            stage: ApplyStage::Complete,
            current_overlay: None,
            current: total as u32,
            total: total as u32,
        });

        result.elapsed = start_time.elapsed();
        tracing::info!(
            "Apply complete: {} overlay(s), {} file(s) copied in {:?}",
            result.overlays_applied.len(),
            result.files_copied,
            result.elapsed
        );
        Ok(result)
    }

    /// Copy the pristine backup over the install root without applying anything,
    /// and forget the last applied state.
    pub fn restore(&self, tracker: &mut ApplyStateTracker) -> Result<RestoreReport> {
        let _lock = InstallLock::acquire(&self.installation.install_root)?;
        let report = restore_into(
            &self.installation.install_root,
            &self.installation.backup_root,
        )?;
        tracker.clear();
        Ok(report)
    }

    /// Index, plan and copy one overlay.
    ///
    /// `Err` means the overlay contributed nothing; per-file failures are in the
    /// returned outcome, including folder entries that could not be listed.
    fn apply_overlay(&self, entry: &OverlayEntry) -> Result<CopyOutcome> {
        let install_root = &self.installation.install_root;
        match &entry.source {
            OverlaySource::Folder { path } => {
                tracing::debug!("Overlay {} from folder {}", entry.id, path);
                let (index, mut errors) = index_folder(path)?;
                let plan = CopyPlan::for_index(&index, install_root);
                let mut outcome = execute(&plan, None);
                errors.append(&mut outcome.errors);
                outcome.errors = errors;
                Ok(outcome)
            }
            OverlaySource::Archive {
                archive_path,
                internal_root,
            } => {
                tracing::debug!("Overlay {} from archive {}", entry.id, archive_path);
                let mut reader = self.formats.open(archive_path)?;
                let index = index_archive(reader.as_mut(), internal_root)?;
                let plan = CopyPlan::for_index(&index, install_root);
                Ok(execute(&plan, Some(reader.as_mut())))
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn finish_cancelled(&self, mut result: ApplyResult, start_time: Instant) -> ApplyResult {
        tracing::info!("Apply cancelled; state not recorded");
        self.transition(&mut result, ApplyState::Cancelled);
        result.elapsed = start_time.elapsed();
        result
    }

    fn transition(&self, result: &mut ApplyResult, next: ApplyState) {
        tracing::debug!("Apply state {:?} -> {:?}", result.state, next);
        result.state = next;
    }

    /// Emit a progress event if a callback was registered.
    fn emit_progress(&self, progress: ApplyProgress) {
        if let Some(callback) = &self.progress_callback {
            callback(progress);
        }
    }
}
