//! Per-install-root guard against concurrent restore/apply cycles.
//!
//! Two cycles writing the same install tree would interleave their copies and
//! break last-writer-wins. [`InstallLock`] registers the canonical install root in
//! a process-wide set for as long as the guard lives.

use crate::error::{Error, Result};
use crate::paths::canonical_path_key;
use camino::Utf8Path;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

static IN_FLIGHT: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn in_flight() -> MutexGuard<'static, HashSet<String>> {
    // The set is only ever inserted into or removed from, so a poisoned lock still
    // holds consistent data.
    IN_FLIGHT
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// RAII guard; the install root is released when this is dropped.
#[derive(Debug)]
pub struct InstallLock {
    key: String,
}

impl InstallLock {
    /// Claim `install_root` or fail with [`Error::ApplyInProgress`] if another
    /// cycle holds it. Never blocks.
    pub fn acquire(install_root: &Utf8Path) -> Result<Self> {
        let key = canonical_path_key(install_root);
        if !in_flight().insert(key.clone()) {
            tracing::warn!("Apply already in progress for {}", install_root);
            return Err(Error::ApplyInProgress(install_root.to_path_buf()));
        }
        Ok(Self { key })
    }

    pub fn is_held(install_root: &Utf8Path) -> bool {
        in_flight().contains(&canonical_path_key(install_root))
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        in_flight().remove(&self.key);
    }
}
