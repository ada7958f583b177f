use reposync::{DiffResult, RemoteEntry, RemoteTree, Rules};

use crate::local::Skipped;

/// Remote paths the run may remove, and those it must keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deletions {
    pub removals: Vec<RemoteEntry>,
    /// Absent from the enumeration but not necessarily from the directory
    pub protected: Vec<String>,
}

impl Deletions {
    pub fn paths(&self) -> Vec<String> {
        self.removals.iter().map(|r| r.path.clone()).collect()
    }
}

/// Selects which of the `deleted` paths of a diff are removed.
///
/// Nothing is selected unless `enabled`.
/// Paths matching the exclusion rules, and paths the enumeration had to
/// skip, are never removed: they are missing from the enumeration,
/// not from the directory.
pub fn select(
    diff: &DiffResult,
    remote: &RemoteTree,
    rules: &Rules,
    skipped: &Skipped,
    enabled: bool,
) -> Deletions {
    let mut res = Deletions::default();
    if !enabled {
        if !diff.deleted.is_empty() {
            log::info!(
                "{} remote files are absent locally, deletion is disabled",
                diff.deleted.len()
            );
        }
        return res;
    }
    for path in &diff.deleted {
        if rules.excludes_path(path) {
            log::info!("keeping {path}: excluded locally");
            res.protected.push(path.clone());
            continue;
        }
        if skipped.covers(path) {
            log::warn!("keeping {path}: it exists locally but could not be read");
            res.protected.push(path.clone());
            continue;
        }
        if let Some(entry) = remote.get(path) {
            res.removals.push(entry.clone());
        }
    }
    res
}
