//! Copy planning and execution.
//!
//! Deciding *what* to copy is separated from doing it: a [`CopyPlan`] is built
//! purely from a [`PayloadIndex`] and a target root, and [`execute`] performs the
//! file operations. Within one plan no two operations write the same destination,
//! so disk-to-disk copies run in parallel on the rayon pool. Archive entries are
//! streamed one at a time through the single open [`ArchiveReader`].

use crate::archive::ArchiveReader;
use crate::error::{Error, Result};
use crate::index::{FileOrigin, PayloadIndex};
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};

/// A single file copy into the target tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOp {
    pub relative_path: String,
    pub origin: FileOrigin,
    pub destination: Utf8PathBuf,
}

/// Ordered list of copy operations into one target root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyPlan {
    ops: Vec<CopyOp>,
}

impl CopyPlan {
    /// Plan copying every file of `index` into `target_root`. Performs no I/O.
    pub fn for_index(index: &PayloadIndex, target_root: &Utf8Path) -> Self {
        Self {
            ops: index
                .files()
                .iter()
                .map(|file| CopyOp {
                    relative_path: file.relative_path.clone(),
                    origin: file.origin.clone(),
                    destination: target_root.join(&file.relative_path),
                })
                .collect(),
        }
    }

    pub(crate) fn push(&mut self, op: CopyOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[CopyOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Parent directories that must exist before the plan can run, deduplicated
    /// and sorted so parents come before children.
    pub fn directories(&self) -> BTreeSet<&Utf8Path> {
        self.ops
            .iter()
            .filter_map(|op| op.destination.parent())
            .collect()
    }

    /// Whether any operation reads from an archive.
    pub fn needs_archive(&self) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op.origin, FileOrigin::ArchiveEntry(_)))
    }
}

/// Result of running a [`CopyPlan`].
#[derive(Debug, Default)]
pub struct CopyOutcome {
    /// Number of files written successfully.
    pub copied: usize,
    /// One [`Error::FileAccess`] or [`Error::ArchiveRead`] per failed file.
    pub errors: Vec<Error>,
}

impl CopyOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run `plan`, overwriting existing files.
///
/// A failed file is recorded and the remaining operations still run. `archive`
/// must be provided when the plan contains archive entries.
pub fn execute(plan: &CopyPlan, mut archive: Option<&mut dyn ArchiveReader>) -> CopyOutcome {
    let mut outcome = CopyOutcome::default();

    for dir in plan.directories() {
        if let Err(e) = std::fs::create_dir_all(dir.as_std_path()) {
            tracing::warn!("Failed to create directory {}: {}", dir, e);
            outcome.errors.push(Error::file_access(dir, e));
        }
    }

    let disk_results: Vec<Result<()>> = plan
        .ops
        .par_iter()
        .filter_map(|op| match &op.origin {
            FileOrigin::Disk(source) => Some(copy_disk_file(source, &op.destination)),
            FileOrigin::ArchiveEntry(_) => None,
        })
        .collect();

    for result in disk_results {
        match result {
            Ok(()) => outcome.copied += 1,
            Err(e) => outcome.errors.push(e),
        }
    }

    for op in &plan.ops {
        let FileOrigin::ArchiveEntry(entry) = &op.origin else {
            continue;
        };
        let result = match archive.as_deref_mut() {
            Some(reader) => copy_archive_entry(reader, entry, &op.destination),
            None => Err(Error::UnknownOverlaySource(format!(
                "no open archive for entry '{}'",
                entry
            ))),
        };
        match result {
            Ok(()) => outcome.copied += 1,
            Err(e) => outcome.errors.push(e),
        }
    }

    for error in &outcome.errors {
        tracing::debug!("{}", error);
    }
    outcome
}

fn copy_disk_file(source: &Utf8Path, destination: &Utf8Path) -> Result<()> {
    match std::fs::copy(source.as_std_path(), destination.as_std_path()) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied && clear_readonly(destination) => {
            std::fs::copy(source.as_std_path(), destination.as_std_path())
                .map(|_| ())
                .map_err(|e| Error::file_access(destination, e))
        }
        Err(e) => Err(Error::file_access(destination, e)),
    }
}

fn copy_archive_entry(
    reader: &mut dyn ArchiveReader,
    entry: &str,
    destination: &Utf8Path,
) -> Result<()> {
    let mut stream = reader.open_entry(entry)?;
    let file = match File::create(destination.as_std_path()) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::PermissionDenied && clear_readonly(destination) => {
            File::create(destination.as_std_path())
                .map_err(|e| Error::file_access(destination, e))?
        }
        Err(e) => return Err(Error::file_access(destination, e)),
    };

    let mut writer = BufWriter::new(file);
    std::io::copy(&mut stream, &mut writer).map_err(|e| Error::file_access(destination, e))?;
    writer
        .flush()
        .map_err(|e| Error::file_access(destination, e))?;
    Ok(())
}

/// Clear the read-only flag on an existing file so it can be overwritten.
/// Returns `true` if the flag was cleared.
fn clear_readonly(path: &Utf8Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path.as_std_path()) else {
        return false;
    };
    let mut permissions = metadata.permissions();
    if !metadata.is_file() || !permissions.readonly() {
        return false;
    }
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    std::fs::set_permissions(path.as_std_path(), permissions).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveFormats;
    use crate::index::{index_archive, index_folder};
    use crate::test_utils::{read, utf8_temp_dir, write_tree, write_zip};

    #[test]
    fn test_plan_is_pure() {
        let (_dir, root) = utf8_temp_dir();
        write_tree(&root, &[("mod/a.txt", "a"), ("mod/sub/b.txt", "b")]);
        let (index, _) = index_folder(&root.join("mod")).unwrap();

        let plan = CopyPlan::for_index(&index, Utf8Path::new("/install"));
        let destinations: Vec<&str> = plan.ops().iter().map(|op| op.destination.as_str()).collect();
        assert_eq!(destinations, ["/install/a.txt", "/install/sub/b.txt"]);
        assert!(!plan.needs_archive());

        let dirs: Vec<&str> = plan.directories().into_iter().map(|d| d.as_str()).collect();
        assert_eq!(dirs, ["/install", "/install/sub"]);
    }

    #[test]
    fn test_execute_disk_overwrites() {
        let (_dir, root) = utf8_temp_dir();
        write_tree(&root, &[("mod/x/y.txt", "new"), ("target/x/y.txt", "old")]);
        let (index, _) = index_folder(&root.join("mod")).unwrap();

        let plan = CopyPlan::for_index(&index, &root.join("target"));
        let outcome = execute(&plan, None);
        assert!(outcome.is_clean());
        assert_eq!(outcome.copied, 1);
        assert_eq!(read(&root, "target/x/y.txt"), "new");
    }

    #[test]
    fn test_execute_archive_entries() {
        let (_dir, root) = utf8_temp_dir();
        let zip = root.join("mod.zip");
        write_zip(&zip, &[("Mod/deep/a.txt", "from zip")]);

        let mut reader = ArchiveFormats::default().open(&zip).unwrap();
        let index = index_archive(reader.as_mut(), "").unwrap();
        let plan = CopyPlan::for_index(&index, &root.join("target"));
        assert!(plan.needs_archive());

        let outcome = execute(&plan, Some(reader.as_mut()));
        assert!(outcome.is_clean());
        assert_eq!(read(&root, "target/deep/a.txt"), "from zip");
    }

    #[test]
    fn test_execute_archive_without_reader_records_errors() {
        let (_dir, root) = utf8_temp_dir();
        let mut plan = CopyPlan::default();
        plan.push(CopyOp {
            relative_path: "a.txt".to_string(),
            origin: FileOrigin::ArchiveEntry("Mod/a.txt".to_string()),
            destination: root.join("a.txt"),
        });

        let outcome = execute(&plan, None);
        assert_eq!(outcome.copied, 0);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_execute_continues_after_failure() {
        let (_dir, root) = utf8_temp_dir();
        write_tree(&root, &[("src/good.txt", "good")]);

        let mut plan = CopyPlan::default();
        plan.push(CopyOp {
            relative_path: "missing.txt".to_string(),
            origin: FileOrigin::Disk(root.join("src/missing.txt")),
            destination: root.join("dst/missing.txt"),
        });
        plan.push(CopyOp {
            relative_path: "good.txt".to_string(),
            origin: FileOrigin::Disk(root.join("src/good.txt")),
            destination: root.join("dst/good.txt"),
        });

        let outcome = execute(&plan, None);
        assert_eq!(outcome.copied, 1);
        assert!(matches!(
            outcome.errors.as_slice(),
            [Error::FileAccess { .. }]
        ));
        assert_eq!(read(&root, "dst/good.txt"), "good");
    }
}
