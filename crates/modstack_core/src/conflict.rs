//! Conflict detection between active overlays.
//!
//! A conflict is a relative path contributed by two or more active overlays. The
//! winner is the contributor that comes last in the [`ActiveSequence`], which is
//! exactly the overlay whose file the applier leaves on disk (last-writer-wins).
//! Detection and the applied tree therefore never disagree.

use crate::archive::ArchiveFormats;
use crate::error::OverlayFailure;
use crate::index::{IndexCache, PayloadIndex};
use crate::paths::fold_case;
use crate::source::ActiveSequence;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One path written by more than one active overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Relative path as spelled by the first contributor.
    pub relative_path: String,
    /// Contributing overlay ids, lowest priority first.
    pub contributors: Vec<String>,
    /// The overlay whose file ends up on disk.
    pub winner: String,
}

/// Output of one detection pass.
#[derive(Debug, Default)]
pub struct ConflictReport {
    /// Conflicts sorted by relative path.
    pub conflicts: Vec<ConflictRecord>,
    /// Overlays whose files could not be listed; they take part in no conflict.
    pub failures: Vec<OverlayFailure>,
}

impl ConflictReport {
    pub fn count(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Conflicts the given overlay contributes to.
    pub fn involving<'a>(
        &'a self,
        overlay_id: &'a str,
    ) -> impl Iterator<Item = &'a ConflictRecord> {
        self.conflicts
            .iter()
            .filter(move |c| c.contributors.iter().any(|id| id == overlay_id))
    }

    /// Paths where the given overlay's file is overwritten by a higher-priority one.
    pub fn lost_by<'a>(&'a self, overlay_id: &'a str) -> impl Iterator<Item = &'a str> {
        self.involving(overlay_id)
            .filter(move |c| c.winner != overlay_id)
            .map(|c| c.relative_path.as_str())
    }

    pub fn winner_of(&self, relative_path: &str) -> Option<&str> {
        let key = fold_case(relative_path);
        self.conflicts
            .iter()
            .find(|c| fold_case(&c.relative_path) == key)
            .map(|c| c.winner.as_str())
    }
}

/// Find conflicts among already indexed overlays, given lowest priority first.
///
/// Runs in time linear in the total number of files. Paths are compared with the
/// host's case sensitivity.
pub fn find_conflicts<'a>(
    indexed: impl IntoIterator<Item = (&'a str, &'a PayloadIndex)>,
) -> Vec<ConflictRecord> {
    let mut contributions: HashMap<String, (&'a str, Vec<&'a str>)> = HashMap::new();

    for (overlay_id, index) in indexed {
        for path in index.relative_paths() {
            let (_, ids) = contributions
                .entry(fold_case(path))
                .or_insert_with(|| (path, Vec::new()));
            // Case variants inside one overlay count once.
            if ids.last() != Some(&overlay_id) {
                ids.push(overlay_id);
            }
        }
    }

    let mut conflicts: Vec<ConflictRecord> = contributions
        .into_values()
        .filter(|(_, ids)| ids.len() > 1)
        .filter_map(|(path, ids)| {
            let winner = ids.last()?.to_string();
            Some(ConflictRecord {
                relative_path: path.to_string(),
                contributors: ids.into_iter().map(str::to_string).collect(),
                winner,
            })
        })
        .collect();
    conflicts.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    conflicts
}

/// Detects conflicts for an [`ActiveSequence`], caching archive indexes between
/// passes.
///
/// Each pass reads every archive at most once, and only when it changed since the
/// previous pass. Overlays that left the sequence are evicted from the cache.
#[derive(Default)]
pub struct ConflictDetector {
    cache: IndexCache,
}

impl ConflictDetector {
    pub fn new(formats: ArchiveFormats) -> Self {
        Self {
            cache: IndexCache::new(formats),
        }
    }

    /// Access the index cache, e.g. to invalidate an overlay after editing it.
    pub fn cache_mut(&mut self) -> &mut IndexCache {
        &mut self.cache
    }

    pub fn detect(&mut self, sequence: &ActiveSequence) -> ConflictReport {
        self.cache
            .retain_sources(sequence.iter().map(|entry| &entry.source));

        let mut indexed: Vec<(&str, Arc<PayloadIndex>)> = Vec::with_capacity(sequence.len());
        let mut failures = Vec::new();

        for entry in sequence {
            match self.cache.get_or_build(&entry.source) {
                Ok((index, errors)) => {
                    if !errors.is_empty() {
                        tracing::warn!(
                            "Overlay {} has {} unreadable file(s)",
                            entry.id,
                            errors.len()
                        );
                        failures.push(OverlayFailure::new(entry.id.clone(), errors));
                    }
                    indexed.push((entry.id.as_str(), index));
                }
                Err(e) => {
                    tracing::warn!("Overlay {} could not be indexed: {}", entry.id, e);
                    failures.push(OverlayFailure::new(entry.id.clone(), vec![e]));
                }
            }
        }

        let conflicts = find_conflicts(indexed.iter().map(|(id, index)| (*id, index.as_ref())));
        tracing::info!(
            "Detected {} conflict(s) across {} active overlay(s)",
            conflicts.len(),
            sequence.len()
        );

        ConflictReport {
            conflicts,
            failures,
        }
    }
}
