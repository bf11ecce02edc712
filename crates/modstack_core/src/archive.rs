//! Format-agnostic archive access.
//!
//! The pipeline only needs two things from an archive: the list of entries and a
//! stream for one entry. [`ArchiveFormat`] opens an archive file into an
//! [`ArchiveReader`] session that provides both. [`ArchiveFormats`] picks the
//! format by file extension; ZIP support ships by default and hosts can register
//! more formats.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::sync::Arc;
use zip::ZipArchive;

/// One entry listed from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry name exactly as stored in the archive (may use `\` separators).
    pub name: String,
    pub is_dir: bool,
    /// Uncompressed size in bytes.
    pub size: u64,
}

impl ArchiveEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
        }
    }
}

/// An open archive.
///
/// Methods take `&mut self` to allow stateful readers (e.g., seeking within the
/// archive file).
pub trait ArchiveReader: Send {
    /// List every entry in the archive, directories included.
    fn entries(&mut self) -> Result<Vec<ArchiveEntry>>;

    /// Open a stream over the uncompressed bytes of the entry named `name`
    /// (as returned by [`entries`](Self::entries)).
    fn open_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>>;
}

/// A compressed payload format that can be opened into an [`ArchiveReader`].
pub trait ArchiveFormat: Send + Sync {
    /// Human-readable format name used in logs.
    fn name(&self) -> &str;

    /// Lowercase file extensions handled by this format, without the leading dot.
    fn extensions(&self) -> &[&str];

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ArchiveReader>>;
}

/// ZIP archives (`.zip`).
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipFormat;

impl ArchiveFormat for ZipFormat {
    fn name(&self) -> &str {
        "zip"
    }

    fn extensions(&self) -> &[&str] {
        &["zip"]
    }

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ArchiveReader>> {
        let file = File::open(path.as_std_path()).map_err(|e| Error::archive_read(path, e))?;
        Ok(Box::new(ZipReader::new(path, BufReader::new(file))?))
    }
}

/// [`ArchiveReader`] over a ZIP archive.
pub struct ZipReader<R: Read + Seek> {
    path: Utf8PathBuf,
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> ZipReader<R> {
    /// `path` is only used for error messages.
    pub fn new(path: &Utf8Path, reader: R) -> Result<Self> {
        let archive = ZipArchive::new(reader)
            .map_err(|e| Error::archive_read(path, format!("Failed to open ZIP archive: {}", e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }
}

impl<R: Read + Seek + Send + 'static> ArchiveReader for ZipReader<R> {
    fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for i in 0..self.archive.len() {
            let file = self.archive.by_index(i).map_err(|e| {
                Error::archive_read(&self.path, format!("Failed to read archive entry: {}", e))
            })?;
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                is_dir: file.is_dir(),
                size: file.size(),
            });
        }
        Ok(entries)
    }

    fn open_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let file = self.archive.by_name(name).map_err(|e| {
            Error::archive_read(&self.path, format!("Failed to open entry '{}': {}", name, e))
        })?;
        Ok(Box::new(file))
    }
}

/// Registry of archive formats, looked up by file extension.
#[derive(Clone)]
pub struct ArchiveFormats {
    formats: Vec<Arc<dyn ArchiveFormat>>,
}

impl Default for ArchiveFormats {
    fn default() -> Self {
        Self::empty().with_format(ZipFormat)
    }
}

impl ArchiveFormats {
    /// A registry with no formats at all; every archive is an unknown source.
    pub fn empty() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    /// Register another format. Later registrations win for shared extensions.
    pub fn with_format(mut self, format: impl ArchiveFormat + 'static) -> Self {
        self.formats.push(Arc::new(format));
        self
    }

    /// Find the format responsible for `path`.
    pub fn find(&self, path: &Utf8Path) -> Option<&dyn ArchiveFormat> {
        let file_name = path.file_name()?.to_ascii_lowercase();
        self.formats
            .iter()
            .rev()
            .find(|format| {
                format
                    .extensions()
                    .iter()
                    .any(|ext| file_name.ends_with(&format!(".{}", ext)))
            })
            .map(|format| format.as_ref())
    }

    /// Open `path` with the matching format.
    ///
    /// Returns [`Error::UnknownOverlaySource`] when no registered format handles
    /// the file.
    pub fn open(&self, path: &Utf8Path) -> Result<Box<dyn ArchiveReader>> {
        let format = self.find(path).ok_or_else(|| {
            Error::UnknownOverlaySource(format!("no archive reader registered for '{}'", path))
        })?;
        tracing::debug!("Opening {} archive {}", format.name(), path);
        format.open(path)
    }
}

impl std::fmt::Debug for ArchiveFormats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.formats.iter().map(|format| format.name()))
            .finish()
    }
}
