//! Error types for overlay operations.
//!
//! All fallible functions in this crate return [`Result<T>`], which uses [`Error`]
//! as the error type. `std::io::Error` and `serde_json::Error` convert via `From`;
//! archive errors are wrapped into [`Error::ArchiveRead`] with the archive path.
//!
//! Only [`Error::MissingBackup`] and [`Error::ApplyInProgress`] abort an apply as a
//! whole. Everything else is collected per file or per overlay into the
//! [`ApplyResult`](crate::ApplyResult) / [`ConflictReport`](crate::ConflictReport).

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while indexing, restoring or applying overlays.
#[derive(Error, Debug)]
pub enum Error {
    /// The pristine backup directory does not exist. Fatal to an apply; nothing
    /// in the install root has been touched when this is returned.
    #[error("Pristine backup not found at '{0}'; create a backup first")]
    MissingBackup(Utf8PathBuf),

    /// A backup already exists and creating a new one would overwrite it.
    #[error("A backup already exists at '{0}'")]
    BackupExists(Utf8PathBuf),

    /// Another restore/apply cycle is running against the same install root.
    #[error("An apply is already in progress for '{0}'")]
    ApplyInProgress(Utf8PathBuf),

    /// A single file could not be read, written or created.
    #[error("Failed to copy '{path}': {source}")]
    FileAccess {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An archive could not be opened or one of its entries could not be read.
    #[error("Failed to read archive '{archive}': {message}")]
    ArchiveRead {
        archive: Utf8PathBuf,
        message: String,
    },

    /// No archive reader is registered for the overlay's source.
    #[error("Unknown overlay source: {0}")]
    UnknownOverlaySource(String),

    /// A folder overlay is missing or is not a directory.
    #[error("Invalid overlay directory: {0}")]
    InvalidOverlayDir(Utf8PathBuf),

    /// A path on disk is not valid UTF-8.
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(String),

    /// Filesystem I/O failed outside of a per-file copy.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize the persisted apply state.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn file_access(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive_read(archive: impl Into<Utf8PathBuf>, message: impl ToString) -> Self {
        Self::ArchiveRead {
            archive: archive.into(),
            message: message.to_string(),
        }
    }

    fn is_file_failure(&self) -> bool {
        matches!(self, Self::FileAccess { .. } | Self::ArchiveRead { .. })
    }
}

/// Everything that went wrong for one overlay during a detect or apply pass.
///
/// The overlay either contributed no files at all (its index could not be built)
/// or some of its files could not be copied.
#[derive(Debug)]
pub struct OverlayFailure {
    pub overlay_id: String,
    pub errors: Vec<Error>,
}

impl OverlayFailure {
    pub fn new(overlay_id: impl Into<String>, errors: Vec<Error>) -> Self {
        Self {
            overlay_id: overlay_id.into(),
            errors,
        }
    }

    /// Number of individual files that could not be listed, read or copied.
    ///
    /// Archive entries that fail to extract count alongside disk files. A missing
    /// folder or an unregistered archive format does not.
    pub fn failed_files(&self) -> usize {
        self.errors.iter().filter(|e| e.is_file_failure()).count()
    }
}

impl std::fmt::Display for OverlayFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "{}: failed", self.overlay_id),
            [only] => write!(f, "{}: {}", self.overlay_id, only),
            [first, rest @ ..] => write!(
                f,
                "{}: {} (and {} more error(s))",
                self.overlay_id,
                first,
                rest.len()
            ),
        }
    }
}
