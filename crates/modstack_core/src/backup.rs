//! Pristine backup management.
//!
//! The backup directory is a full copy of the install tree taken before any
//! overlay was applied. Every apply starts by copying it back over the install
//! root with [`restore_into`].
//!
//! Restoring is overwrite-only: files that exist in the install root but not in
//! the backup are left alone. Per-file failures are collected and the rest of
//! the tree is still restored, since a partial restore beats none.

use crate::error::{Error, Result};
use crate::index::FileOrigin;
use crate::paths::normalize_rel_path;
use crate::plan::{execute, CopyOp, CopyPlan};
use crate::source::GameInstallation;
use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

/// Summary of a restore or backup copy.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub files_restored: usize,
    /// Per-file failures, in no particular order.
    pub errors: Vec<Error>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Plan copying every file below `source_root` to the same relative path below
/// `target_root`.
///
/// Entries that cannot be enumerated are returned as errors instead of
/// aborting the walk.
pub fn plan_tree_copy(source_root: &Utf8Path, target_root: &Utf8Path) -> (CopyPlan, Vec<Error>) {
    let mut plan = CopyPlan::default();
    let mut errors = Vec::new();

    for entry in WalkDir::new(source_root.as_std_path()).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|| source_root.to_string());
                tracing::warn!("Failed to enumerate {}: {}", path, e);
                errors.push(Error::file_access(path, e.into()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = match Utf8PathBuf::from_path_buf(entry.into_path()) {
            Ok(path) => path,
            Err(path) => {
                errors.push(Error::NonUtf8Path(path.to_string_lossy().into_owned()));
                continue;
            }
        };
        let rel = normalize_rel_path(path.strip_prefix(source_root).unwrap_or(&path).as_str());
        plan.push(CopyOp {
            destination: target_root.join(&rel),
            relative_path: rel,
            origin: FileOrigin::Disk(path),
        });
    }

    (plan, errors)
}

/// Copy the backup tree over `install_root`.
///
/// Returns [`Error::MissingBackup`] without touching `install_root` when
/// `backup_root` is not an existing directory. Never writes to `backup_root`.
pub fn restore_into(install_root: &Utf8Path, backup_root: &Utf8Path) -> Result<RestoreReport> {
    if !backup_root.as_std_path().is_dir() {
        tracing::error!("Backup not found at {}", backup_root);
        return Err(Error::MissingBackup(backup_root.to_path_buf()));
    }

    tracing::info!("Restoring {} from {}", install_root, backup_root);
    std::fs::create_dir_all(install_root.as_std_path())
        .map_err(|e| Error::file_access(install_root, e))?;

    let (plan, mut errors) = plan_tree_copy(backup_root, install_root);
    let outcome = execute(&plan, None);
    errors.extend(outcome.errors);

    if !errors.is_empty() {
        tracing::warn!(
            "Restore finished with {} file error(s); {} file(s) restored",
            errors.len(),
            outcome.copied
        );
    } else {
        tracing::info!("Restored {} file(s)", outcome.copied);
    }

    Ok(RestoreReport {
        files_restored: outcome.copied,
        errors,
    })
}

/// Take the pristine snapshot of `installation.install_root`.
///
/// Refuses with [`Error::BackupExists`] if the backup directory already exists.
/// A backup that cannot be copied completely is removed again and the first
/// failure is returned, so a half-written backup is never left behind.
pub fn create_backup(installation: &GameInstallation) -> Result<RestoreReport> {
    let GameInstallation {
        install_root,
        backup_root,
    } = installation;

    if backup_root.as_std_path().exists() {
        return Err(Error::BackupExists(backup_root.clone()));
    }
    if !install_root.as_std_path().is_dir() {
        return Err(Error::file_access(
            install_root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "install root not found"),
        ));
    }

    tracing::info!("Creating backup of {} at {}", install_root, backup_root);
    std::fs::create_dir_all(backup_root.as_std_path())?;

    let (plan, mut errors) = plan_tree_copy(install_root, backup_root);
    let outcome = execute(&plan, None);
    errors.extend(outcome.errors);

    if let Some(first) = errors.into_iter().next() {
        tracing::error!("Backup failed: {}", first);
        if let Err(e) = std::fs::remove_dir_all(backup_root.as_std_path()) {
            tracing::warn!("Failed to remove partial backup {}: {}", backup_root, e);
        }
        return Err(first);
    }

    tracing::info!("Backed up {} file(s)", outcome.copied);
    Ok(RestoreReport {
        files_restored: outcome.copied,
        errors: Vec::new(),
    })
}

/// Replace the existing backup with a fresh snapshot of the install root.
///
/// Use after the application itself was updated, when the old pristine copy no
/// longer matches. Any previously recorded apply state is meaningless afterwards.
///
/// The snapshot is taken into a sibling `<backup>.new` directory first and only
/// swapped in once it is complete. If it fails, the old backup is untouched.
pub fn reset_backup(installation: &GameInstallation) -> Result<RestoreReport> {
    let backup_root = &installation.backup_root;
    let staging = sibling_dir(backup_root, "new");
    remove_stale_dir(&staging)?;

    let staged = GameInstallation::new(installation.install_root.clone(), staging.clone());
    let report = create_backup(&staged)?;

    if !backup_root.as_std_path().exists() {
        std::fs::rename(staging.as_std_path(), backup_root.as_std_path())
            .map_err(|e| Error::file_access(backup_root, e))?;
        return Ok(report);
    }

    let retired = sibling_dir(backup_root, "old");
    remove_stale_dir(&retired)?;
    tracing::info!("Replacing backup {}", backup_root);
    if let Err(e) = std::fs::rename(backup_root.as_std_path(), retired.as_std_path()) {
        discard_dir(&staging);
        return Err(Error::file_access(backup_root, e));
    }
    if let Err(e) = std::fs::rename(staging.as_std_path(), backup_root.as_std_path()) {
        if let Err(undo) = std::fs::rename(retired.as_std_path(), backup_root.as_std_path()) {
            tracing::error!(
                "Failed to move the old backup back from {}: {}",
                retired,
                undo
            );
        }
        discard_dir(&staging);
        return Err(Error::file_access(backup_root, e));
    }
    discard_dir(&retired);
    Ok(report)
}

/// `<dir>.<suffix>` next to `dir`.
fn sibling_dir(dir: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let name = dir.file_name().unwrap_or("backup");
    dir.with_file_name(format!("{}.{}", name, suffix))
}

/// Remove a leftover from an interrupted reset.
fn remove_stale_dir(dir: &Utf8Path) -> Result<()> {
    if dir.as_std_path().exists() {
        tracing::warn!("Removing stale directory {}", dir);
        std::fs::remove_dir_all(dir.as_std_path()).map_err(|e| Error::file_access(dir, e))?;
    }
    Ok(())
}

fn discard_dir(dir: &Utf8Path) {
    if let Err(e) = std::fs::remove_dir_all(dir.as_std_path()) {
        tracing::warn!("Failed to remove {}: {}", dir, e);
    }
}
