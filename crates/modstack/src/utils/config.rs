//! Application configuration management utilities.
//!
//! The configuration is a single `modstack.toml` holding the install paths and
//! the overlay profile. Relative paths are resolved against the directory the
//! config file lives in.

use crate::errors::CliError;
use camino::{Utf8Path, Utf8PathBuf};
use modstack_core::{ActiveSequence, GameInstallation, OverlayEntry, OverlaySource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;

pub const CONFIG_FILE_NAME: &str = "modstack.toml";
pub const DEFAULT_STATE_FILE: &str = "applied.json";

/// Application-wide configuration stored in modstack.toml.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub install_root: Option<Utf8PathBuf>,
    pub backup_root: Option<Utf8PathBuf>,
    /// Where the last applied overlay list is persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<OverlayConfig>,
}

/// One `[[overlays]]` entry of the profile.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OverlayConfig {
    pub id: String,
    /// `folder` or `archive`.
    pub kind: String,
    pub path: Utf8PathBuf,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub internal_root: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub order: i64,
}

fn default_active() -> bool {
    true
}

impl OverlayConfig {
    /// Convert to a library entry, resolving `path` against `base_dir`.
    pub fn to_entry(&self, base_dir: &Utf8Path) -> Result<OverlayEntry, CliError> {
        let path = resolve(base_dir, &self.path);
        let source = match self.kind.as_str() {
            "folder" => OverlaySource::folder(path),
            "archive" => OverlaySource::archive(path, self.internal_root.clone()),
            other => {
                return Err(CliError::UnknownOverlayKind {
                    id: self.id.clone(),
                    kind: other.to_string(),
                })
            }
        };
        Ok(OverlayEntry::new(self.id.clone(), source, self.order).with_active(self.active))
    }
}

fn resolve(base_dir: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Make a path given on the command line absolute against the working directory.
///
/// Relative paths stored in the config resolve against the config directory, so
/// paths typed by the user are stored absolute.
pub fn absolute_path(path: &str) -> Result<Utf8PathBuf, CliError> {
    let invalid = || CliError::InvalidPath {
        path: path.to_string(),
    };
    let absolute = std::path::absolute(path).map_err(|_| invalid())?;
    Utf8PathBuf::from_path_buf(absolute).map_err(|_| invalid())
}

/// Returns the directory where the current executable resides.
pub fn install_dir() -> Option<Utf8PathBuf> {
    let exe = env::current_exe().ok()?;
    let parent = exe.parent()?;
    Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok()
}

/// Returns the default configuration file path (modstack.toml next to the executable).
pub fn default_config_path() -> Option<Utf8PathBuf> {
    install_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// A configuration together with the file it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: Utf8PathBuf,
    pub config: AppConfig,
}

impl LoadedConfig {
    /// Load from `--config` if given, otherwise from the default location.
    pub fn locate(explicit: Option<&str>) -> Result<Self, CliError> {
        let path = match explicit {
            Some(path) => Utf8PathBuf::from(path),
            None => default_config_path().ok_or(CliError::ConfigLocationUnknown)?,
        };
        Self::load(path)
    }

    /// Load the configuration file. A missing file yields the default configuration.
    pub fn load(path: Utf8PathBuf) -> Result<Self, CliError> {
        if !path.as_std_path().exists() {
            tracing::debug!("No config at {}; using defaults", path);
            return Ok(Self {
                path,
                config: AppConfig::default(),
            });
        }

        let content = fs::read_to_string(path.as_std_path()).map_err(|source| {
            CliError::ConfigReadError {
                path: path.clone(),
                source,
            }
        })?;
        let config = toml::from_str(&content).map_err(|source| CliError::ConfigParseError {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("Loaded config from {}", path);
        Ok(Self { path, config })
    }

    pub fn save(&self) -> Result<(), CliError> {
        let write_error = |source: std::io::Error| CliError::ConfigWriteError {
            path: self.path.clone(),
            source,
        };
        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| write_error(std::io::Error::other(e)))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path()).map_err(write_error)?;
            }
        }
        fs::write(self.path.as_std_path(), content).map_err(write_error)
    }

    /// Directory relative paths in the config are resolved against.
    pub fn base_dir(&self) -> Utf8PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        }
    }

    pub fn install_root(&self) -> Result<Utf8PathBuf, CliError> {
        self.config
            .install_root
            .as_deref()
            .map(|p| resolve(&self.base_dir(), p))
            .ok_or_else(|| CliError::setting_missing("install_root", "install-root"))
    }

    pub fn backup_root(&self) -> Result<Utf8PathBuf, CliError> {
        self.config
            .backup_root
            .as_deref()
            .map(|p| resolve(&self.base_dir(), p))
            .ok_or_else(|| CliError::setting_missing("backup_root", "backup-root"))
    }

    pub fn installation(&self) -> Result<GameInstallation, CliError> {
        Ok(GameInstallation::new(self.install_root()?, self.backup_root()?))
    }

    pub fn state_file(&self) -> Utf8PathBuf {
        let file = self
            .config
            .state_file
            .as_deref()
            .unwrap_or(Utf8Path::new(DEFAULT_STATE_FILE));
        resolve(&self.base_dir(), file)
    }

    /// All configured overlays, active or not, in file order.
    pub fn overlay_entries(&self) -> Result<Vec<OverlayEntry>, CliError> {
        let base_dir = self.base_dir();
        let mut seen = HashSet::new();
        self.config
            .overlays
            .iter()
            .map(|overlay| {
                if !seen.insert(overlay.id.as_str()) {
                    return Err(CliError::DuplicateOverlayId {
                        id: overlay.id.clone(),
                    });
                }
                overlay.to_entry(&base_dir)
            })
            .collect()
    }

    pub fn sequence(&self) -> Result<ActiveSequence, CliError> {
        Ok(ActiveSequence::from_entries(&self.overlay_entries()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
install_root = "game"
backup_root = "/pristine/game"

[[overlays]]
id = "hd-textures"
kind = "folder"
path = "mods/hd-textures"
order = 2

[[overlays]]
id = "ui-fix"
kind = "archive"
path = "/downloads/ui-fix.zip"
internal_root = "ui-fix-1.0"
active = false
order = 1
"#;

    fn loaded(content: &str) -> LoadedConfig {
        LoadedConfig {
            path: Utf8PathBuf::from("/profiles/modstack.toml"),
            config: toml::from_str(content).unwrap(),
        }
    }

    #[test]
    fn test_absolute_path_uses_working_directory() {
        let path = absolute_path("game/install").unwrap();
        let cwd = env::current_dir().unwrap();
        assert!(path.is_absolute());
        assert!(path.as_std_path().starts_with(&cwd));
        assert!(path.ends_with("game/install"));

        assert!(matches!(
            absolute_path(""),
            Err(CliError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_parse_sample() {
        let cfg = loaded(SAMPLE);
        assert_eq!(cfg.config.overlays.len(), 2);
        assert!(cfg.config.overlays[0].active);
        assert!(!cfg.config.overlays[1].active);
        assert_eq!(cfg.config.overlays[1].internal_root, "ui-fix-1.0");
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let cfg = loaded(SAMPLE);
        assert_eq!(cfg.install_root().unwrap().as_str(), "/profiles/game");
        assert_eq!(cfg.backup_root().unwrap().as_str(), "/pristine/game");
        assert_eq!(cfg.state_file().as_str(), "/profiles/applied.json");

        let entries = cfg.overlay_entries().unwrap();
        assert_eq!(entries[0].source.path().as_str(), "/profiles/mods/hd-textures");
        assert_eq!(entries[1].source.path().as_str(), "/downloads/ui-fix.zip");
    }

    #[test]
    fn test_sequence_uses_order_and_active() {
        let seq = loaded(SAMPLE).sequence().unwrap();
        let ids: Vec<&str> = seq.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["hd-textures"]);
        assert_eq!(seq.snapshot().len(), 2);
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let cfg = loaded(
            r#"
[[overlays]]
id = "weird"
kind = "rar"
path = "weird.rar"
"#,
        );
        assert!(matches!(
            cfg.sequence(),
            Err(CliError::UnknownOverlayKind { ref kind, .. }) if kind == "rar"
        ));
    }

    #[test]
    fn test_duplicate_id_is_error() {
        let cfg = loaded(
            r#"
[[overlays]]
id = "a"
kind = "folder"
path = "a"

[[overlays]]
id = "a"
kind = "folder"
path = "b"
"#,
        );
        assert!(matches!(
            cfg.overlay_entries(),
            Err(CliError::DuplicateOverlayId { .. })
        ));
    }

    #[test]
    fn test_missing_settings() {
        let cfg = loaded("");
        assert!(matches!(
            cfg.installation(),
            Err(CliError::SettingMissing { key: "install_root", .. })
        ));
        assert!(cfg.sequence().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("modstack.toml")).unwrap();

        let missing = LoadedConfig::load(path.clone()).unwrap();
        assert_eq!(missing.config, AppConfig::default());

        let mut cfg = loaded(SAMPLE);
        cfg.path = path.clone();
        cfg.save().unwrap();

        let reloaded = LoadedConfig::load(path).unwrap();
        assert_eq!(reloaded.config, cfg.config);
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("modstack.toml")).unwrap();
        fs::write(&path, "install_root = [").unwrap();

        assert!(matches!(
            LoadedConfig::load(path),
            Err(CliError::ConfigParseError { .. })
        ));
    }
}
