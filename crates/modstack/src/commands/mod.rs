mod apply;
mod backup;
mod config;
mod conflicts;
mod restore;
mod status;

pub use apply::{apply_overlays, ApplyArgs};
pub use backup::{backup_create, backup_reset};
pub use config::{set_backup_root, set_install_root, show_config};
pub use conflicts::{list_conflicts, ConflictsArgs};
pub use restore::restore_install;
pub use status::show_status;
