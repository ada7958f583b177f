use std::collections::BTreeSet;

use crate::{DiffResult, LocalFile, RemoteTree, SyncPlan};

/// Compares the local files against a remote snapshot.
///
/// Only content hashes are compared, no network access is needed.
pub fn diff(local: &[LocalFile], remote: &RemoteTree) -> DiffResult {
    let mut res = DiffResult::default();
    let mut local_paths = BTreeSet::new();

    for file in local {
        local_paths.insert(file.path());
        match remote.get(file.path()) {
            None => res.new.push(file.path().to_owned()),
            Some(entry) if entry.blob_hash == file.blob_hash() => {
                res.unchanged.push(file.path().to_owned())
            }
            Some(..) => res.changed.push(file.path().to_owned()),
        }
    }

    res.deleted = remote
        .entries
        .keys()
        .filter(|path| !local_paths.contains(path.as_str()))
        .cloned()
        .collect();

    res.new.sort();
    res.changed.sort();
    res.unchanged.sort();

    log::debug!(
        "diff: {} new, {} changed, {} unchanged, {} deleted",
        res.new.len(),
        res.changed.len(),
        res.unchanged.len(),
        res.deleted.len()
    );
    res
}

/// Builds the plan of a run from its diff.
/// `deletions` are the remote paths the deletion policy let through.
pub fn plan(diff: &DiffResult, remote: &RemoteTree, deletions: Vec<String>) -> SyncPlan {
    SyncPlan {
        files_to_upload: diff.to_upload(),
        files_to_delete: deletions,
        base_tree_hash: remote.head.tree.clone(),
        parent_commit_hash: remote.head.commit.clone(),
    }
}
