use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Configuration file error: {path}")]
    #[diagnostic(
        code(config::parse_error),
        help("Check modstack.toml for syntax errors")
    )]
    ConfigParseError {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to read configuration file: {path}")]
    #[diagnostic(code(config::read_failed))]
    ConfigReadError {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write configuration file: {path}")]
    #[diagnostic(
        code(config::write_failed),
        help("Check file permissions for the config directory")
    )]
    ConfigWriteError {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine the configuration file location")]
    #[diagnostic(
        code(config::no_location),
        help("Pass the config file explicitly with --config <path>")
    )]
    ConfigLocationUnknown,

    #[error("Setting '{key}' is not configured")]
    #[diagnostic(
        code(config::missing_setting),
        help("Set it with 'modstack config set-{command}'")
    )]
    SettingMissing {
        key: &'static str,
        command: &'static str,
    },

    #[error("Overlay '{id}' has unknown kind '{kind}'")]
    #[diagnostic(
        code(overlay::unknown_kind),
        help("Use kind = \"folder\" or kind = \"archive\"")
    )]
    UnknownOverlayKind { id: String, kind: String },

    #[error("Overlay id '{id}' is used more than once")]
    #[diagnostic(
        code(overlay::duplicate_id),
        help("Every [[overlays]] entry needs a unique id")
    )]
    DuplicateOverlayId { id: String },

    #[error("No active overlay with id '{id}'")]
    #[diagnostic(
        code(overlay::not_found),
        help("Run 'modstack status' to list the active overlays")
    )]
    OverlayNotFound { id: String },

    #[error("Directory not found: {path}")]
    #[diagnostic(
        code(file::not_found),
        help("Make sure the directory exists and the path is correct")
    )]
    DirectoryNotFound { path: Utf8PathBuf },

    #[error("Invalid path: '{path}'")]
    #[diagnostic(
        code(file::invalid_path),
        help("Pass a non-empty path; it and the working directory must be valid UTF-8")
    )]
    InvalidPath { path: String },

    #[error("Pristine backup not found at {path}")]
    #[diagnostic(
        code(backup::missing),
        help("Create a backup first with 'modstack backup create' while the install is unmodded")
    )]
    MissingBackup { path: Utf8PathBuf },

    #[error("A backup already exists at {path}")]
    #[diagnostic(
        code(backup::exists),
        help("Use 'modstack backup reset' to replace it with a fresh snapshot")
    )]
    BackupExists { path: Utf8PathBuf },

    #[error("An apply is already running for {path}")]
    #[diagnostic(
        code(apply::in_progress),
        help("Wait for the running apply to finish and try again")
    )]
    ApplyInProgress { path: Utf8PathBuf },

    #[error("Apply finished with {failed_overlays} failed overlay(s) and {failed_files} failed file(s)")]
    #[diagnostic(
        code(apply::failed),
        help("Fix the errors listed above; the next 'modstack apply' will retry")
    )]
    ApplyFailed {
        failed_overlays: usize,
        failed_files: usize,
    },

    #[error("Restore finished with {failed_files} failed file(s)")]
    #[diagnostic(
        code(restore::failed),
        help("Close any program using the install files and run 'modstack restore' again")
    )]
    RestoreFailed { failed_files: usize },

    #[error(transparent)]
    #[diagnostic(code(core::error))]
    Core(modstack_core::Error),
}

impl CliError {
    pub fn setting_missing(key: &'static str, command: &'static str) -> Self {
        Self::SettingMissing { key, command }
    }
}

impl From<modstack_core::Error> for CliError {
    fn from(error: modstack_core::Error) -> Self {
        match error {
            modstack_core::Error::MissingBackup(path) => Self::MissingBackup { path },
            modstack_core::Error::BackupExists(path) => Self::BackupExists { path },
            modstack_core::Error::ApplyInProgress(path) => Self::ApplyInProgress { path },
            other => Self::Core(other),
        }
    }
}
