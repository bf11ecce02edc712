//! Ordered mod overlay application for a single game installation.
//!
//! This crate restores an install tree from a pristine backup and then applies an
//! ordered list of mod overlays on top of it. It supports:
//!
//! - **Pristine restore**: Every apply starts from the backup, never from the
//!   previous modded tree
//! - **Folder and archive overlays**: Payloads under a `Mod` directory, read from
//!   disk or straight out of a ZIP (more formats via [`ArchiveFormat`])
//! - **Last-writer-wins**: The highest-priority overlay owns every path it writes
//! - **Conflict detection**: Report shared paths and their winner without touching
//!   disk, with archive indexes cached between passes
//! - **Change gate**: Skip the whole cycle when the overlay list is unchanged
//!
//! # Example
//!
//! ```no_run
//! use modstack_core::{
//!     ActiveSequence, ApplyStateTracker, GameInstallation, OverlayApplier, OverlayEntry,
//!     OverlaySource,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let installation = GameInstallation::new("C:/Games/MyGame", "C:/Games/MyGame.backup");
//! let state_file = camino::Utf8Path::new("C:/Games/applied.json");
//!
//! let sequence = ActiveSequence::from_entries(&[
//!     OverlayEntry::new("hd-textures", OverlaySource::folder("C:/Mods/hd-textures"), 1),
//!     OverlayEntry::new("ui-fix", OverlaySource::archive("C:/Mods/ui-fix.zip", ""), 2),
//! ]);
//!
//! let mut tracker = ApplyStateTracker::load(state_file)?;
//! let applier = OverlayApplier::new(installation).with_progress(|progress| {
//!     println!("Stage: {:?}, Progress: {}/{}",
//!         progress.stage, progress.current, progress.total);
//! });
//!
//! if let Some(result) = applier.apply_if_changed(&sequence, &mut tracker, false)? {
//!     println!("Applied {} overlays, {} files",
//!         result.overlays_applied.len(), result.files_copied);
//!     tracker.save(state_file)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod archive;
pub mod backup;
pub mod conflict;
pub mod error;
pub mod index;
pub mod lock;
pub mod paths;
pub mod plan;
pub mod source;
pub mod state;

// Re-export main types
pub use applier::{ApplyProgress, ApplyResult, ApplyStage, ApplyState, OverlayApplier};
pub use archive::{ArchiveEntry, ArchiveFormat, ArchiveFormats, ArchiveReader, ZipFormat};
pub use backup::{create_backup, reset_backup, restore_into, RestoreReport};
pub use conflict::{find_conflicts, ConflictDetector, ConflictRecord, ConflictReport};
pub use error::{Error, OverlayFailure, Result};
pub use index::{IndexCache, PayloadIndex};
pub use lock::InstallLock;
pub use source::{
    ActiveSequence, GameInstallation, OverlayEntry, OverlaySource, SourceIdentity,
    PAYLOAD_ROOT_MARKER,
};
pub use state::{has_changed, AppliedSnapshot, ApplyStateTracker, SnapshotEntry};

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;
