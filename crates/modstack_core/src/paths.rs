//! Path normalization and identity helpers.
//!
//! Relative paths inside overlays are compared as forward-slash strings. Whether two
//! paths that differ only in letter case name the same file depends on the host, so
//! every comparison key goes through [`fold_case`].

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::time::UNIX_EPOCH;
use xxhash_rust::xxh3::xxh3_64;

/// Whether the host file system treats paths case-insensitively.
pub const CASE_INSENSITIVE_FS: bool = cfg!(windows);

/// Normalize a relative path to forward slashes with no leading, trailing or
/// repeated separators.
///
/// - `a\\b\\c.txt` -> `a/b/c.txt`
/// - `./a//b/` -> `a/b`
pub fn normalize_rel_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns `true` if a normalized relative path stays inside its root.
///
/// Rejects empty paths, `..` components and drive-letter prefixes such as `C:`.
pub fn is_contained_rel_path(normalized: &str) -> bool {
    if normalized.is_empty() {
        return false;
    }
    normalized
        .split('/')
        .all(|part| part != ".." && !part.contains(':'))
}

/// Fold a path for comparison according to the host's case sensitivity.
pub fn fold_case(path: &str) -> String {
    if CASE_INSENSITIVE_FS {
        path.to_lowercase()
    } else {
        path.to_string()
    }
}

/// Build the canonical identity string for a filesystem path.
///
/// The path is made absolute against the current directory, `.` and `..` are
/// resolved lexically (symlinks are not followed, so the path need not exist),
/// separators become `/`, and case is folded on case-insensitive hosts.
pub fn canonical_path_key(path: &Utf8Path) -> String {
    let absolute = std::path::absolute(path.as_std_path())
        .ok()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| path.to_path_buf());

    let mut prefix = String::new();
    let mut parts: Vec<&str> = Vec::new();
    for component in absolute.components() {
        match component {
            Utf8Component::Prefix(p) => prefix = p.as_str().replace('\\', "/"),
            Utf8Component::RootDir | Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                parts.pop();
            }
            Utf8Component::Normal(part) => parts.push(part),
        }
    }

    fold_case(&format!("{}/{}", prefix, parts.join("/")))
}

/// Cheap change stamp for a single file: xxHash3 over its size and modification time.
///
/// Used to decide whether a cached archive index is still valid without reading
/// the archive again.
pub fn file_stamp(path: &Utf8Path) -> std::io::Result<u64> {
    let metadata = std::fs::metadata(path.as_std_path())?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut buf = Vec::with_capacity(24);
    buf.extend_from_slice(&metadata.len().to_le_bytes());
    buf.extend_from_slice(&modified.to_le_bytes());
    Ok(xxh3_64(&buf))
}
