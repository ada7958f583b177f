//! Tree and commit composition, then the branch update.

use chrono::{DateTime, Utc};
use reposync::{config::RetryConfig, CommitResult, Head, RemoteEntry, UploadedBlob};

use crate::{
    reader::read_remote,
    remote::{CreateCommit, CreateTree, ReadRepo, TreeEntry, UpdateRef},
    retry::with_retry,
    SyncSession,
};

/// Message of a commit nobody wrote a message for.
pub fn default_message(uploaded: usize, deleted: usize, now: DateTime<Utc>) -> String {
    let files = |n: usize| if n == 1 { "file" } else { "files" };
    let mut msg = format!("Sync {uploaded} {}", files(uploaded));
    if deleted > 0 {
        msg.push_str(&format!(", delete {deleted} {}", files(deleted)));
    }
    let at = now.format("%Y-%m-%d %H:%M:%S UTC");
    msg.push_str(&format!("\n\nSynchronized by reposync at {at}"));
    msg
}

/// The changes of a commit, on top of whatever the base tree is.
#[derive(Debug, Clone, Default)]
pub struct Changes<'a> {
    pub overlays: &'a [UploadedBlob],
    pub removals: Vec<RemoteEntry>,
}

impl Changes<'_> {
    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty() && self.removals.is_empty()
    }

    fn entries(&self) -> Vec<TreeEntry> {
        self.overlays
            .iter()
            .map(|b| TreeEntry::blob(&b.path, b.mode.as_str(), &b.blob_hash))
            .chain(
                self.removals
                    .iter()
                    .map(|r| TreeEntry::removal(&r.path, &r.mode)),
            )
            .collect()
    }
}

/// Commits `changes` on top of `head` and moves `branch` to the new commit.
///
/// The branch is created if `head` is missing. If it moved meanwhile,
/// the head is read again and the tree and commit are redone on top of it,
/// at most `retry.ref_attempts` times. The branch is never forced.
/// Removals of paths already gone from the moved branch are dropped from `changes`.
pub async fn compose<R>(
    remote: &R,
    branch: &str,
    head: &Head,
    changes: &mut Changes<'_>,
    message: &str,
    retry: &RetryConfig,
    session: &SyncSession,
) -> reposync::Result<CommitResult>
where
    R: ReadRepo + CreateTree + CreateCommit + UpdateRef,
{
    let mut head = head.clone();

    for attempt in 1..=retry.ref_attempts {
        session.check_cancelled()?;

        let entries = changes.entries();
        let base_tree = head.tree.as_deref();
        let tree = with_retry(retry, "tree", || remote.create_tree(base_tree, &entries)).await?;
        log::debug!("created tree {tree} on {}", base_tree.unwrap_or("nothing"));

        let parents: Vec<String> = head.commit.iter().cloned().collect();
        let commit = with_retry(retry, "commit", || {
            remote.create_commit(message, &tree, &parents)
        })
        .await?;
        log::debug!("created commit {}", commit.commit_hash);

        // Nothing is visible yet: last chance to leave the branch untouched.
        session.check_cancelled()?;

        let res = if head.exists() {
            with_retry(retry, "ref", || remote.update_ref(branch, &commit.commit_hash)).await
        } else {
            with_retry(retry, "ref", || remote.create_ref(branch, &commit.commit_hash)).await
        };
        match res {
            Ok(()) => {
                log::info!("committed {} to {branch}", commit.commit_hash);
                return Ok(commit);
            }
            Err(err) if err.is_conflict() => {
                log::warn!(
                    "{branch} moved during the sync (attempt {attempt}/{}): {err}",
                    retry.ref_attempts
                );
                let fresh = read_remote(remote, branch, retry).await?;
                if fresh.head.commit.as_deref() == Some(commit.commit_hash.as_str()) {
                    // an earlier attempt went through, only its response was lost
                    log::info!("{branch} already points to {}", commit.commit_hash);
                    return Ok(commit);
                }
                if attempt == retry.ref_attempts {
                    break;
                }
                changes.removals.retain(|r| fresh.get(&r.path).is_some());
                head = fresh.head;
            }
            Err(err) => return Err(err),
        }
    }

    Err(reposync::conflict_error!(
        "could not update {branch} after {} attempts, it keeps moving",
        retry.ref_attempts
    ))
}
