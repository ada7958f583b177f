//! Degraded mode: one commit per file through the contents endpoint.
//!
//! Not atomic. A run interrupted midway leaves the branch with part of the
//! changes, each in its own commit.

use reposync::{config::RetryConfig, CommitResult, FileFailure, LocalFile, RemoteEntry, RemoteTree};

use crate::{remote::Contents, retry::with_retry, upload::Pacing, SyncSession};

#[derive(Debug, Clone, Default)]
pub struct PerFileOutcome {
    pub uploaded: Vec<String>,
    pub deleted: Vec<String>,
    pub failures: Vec<FileFailure>,
    /// The commit the branch points to after the run
    pub last_commit: Option<CommitResult>,
    pub pauses: usize,
}

fn file_message(message: Option<&str>, verb: &str, path: &str) -> String {
    match message {
        Some(message) => format!("{message} ({path})"),
        None => format!("{verb} {path}"),
    }
}

enum Op<'a> {
    Put(&'a LocalFile),
    Delete(&'a RemoteEntry),
}

impl Op<'_> {
    fn path(&self) -> &str {
        match self {
            Op::Put(file) => file.path(),
            Op::Delete(entry) => &entry.path,
        }
    }
}

/// Writes `files` and removes `removals` one commit at a time.
///
/// Calls are sequential, paced like blob batches.
/// Per-file failures are collected, fatal errors stop the run.
#[allow(clippy::too_many_arguments)]
pub async fn sync_per_file<R>(
    remote: &R,
    branch: &str,
    files: &[&LocalFile],
    removals: &[RemoteEntry],
    snapshot: &RemoteTree,
    message: Option<&str>,
    pacing: &Pacing,
    retry: &RetryConfig,
    session: &SyncSession,
) -> reposync::Result<PerFileOutcome>
where
    R: Contents,
{
    if !snapshot.head.exists() && !snapshot.head.empty_repository {
        reposync::config_bail!("per-file mode needs an existing branch, '{branch}' has none");
    }

    let ops: Vec<Op> = files
        .iter()
        .map(|f| Op::Put(*f))
        .chain(removals.iter().map(Op::Delete))
        .collect();
    let total = ops.len();
    let mut outcome = PerFileOutcome::default();

    log::warn!("committing {total} changes one by one to {branch}");

    for (idx, batch) in ops.chunks(pacing.batch_size.max(1)).enumerate() {
        if idx > 0 {
            outcome.pauses += 1;
            if !pacing.delay.is_zero() {
                tokio::time::sleep(pacing.delay).await;
            }
        }
        session.check_cancelled()?;

        for (i, op) in batch.iter().enumerate() {
            let current = idx * pacing.batch_size.max(1) + i + 1;
            let res = match op {
                Op::Put(file) => {
                    let previous = snapshot.get(file.path()).map(|e| e.blob_hash.as_str());
                    let msg = file_message(message, "Sync", file.path());
                    with_retry(retry, file.path(), || {
                        remote.put_contents(branch, file.path(), file.content(), previous, &msg)
                    })
                    .await
                }
                Op::Delete(entry) => {
                    let msg = file_message(message, "Delete", &entry.path);
                    with_retry(retry, &entry.path, || {
                        remote.delete_contents(branch, &entry.path, &entry.blob_hash, &msg)
                    })
                    .await
                }
            };
            session.progress(current, total, op.path());

            match res {
                Ok(commit) => {
                    log::debug!("{} -> {}", op.path(), commit.commit_hash);
                    match op {
                        Op::Put(..) => outcome.uploaded.push(op.path().to_owned()),
                        Op::Delete(..) => outcome.deleted.push(op.path().to_owned()),
                    }
                    outcome.last_commit = Some(commit);
                }
                Err(err) if err.is_fatal() => {
                    log::error!("aborting per-file sync at {}: {err}", op.path());
                    return Err(err);
                }
                Err(err) => {
                    log::warn!("failed to commit {}: {err}", op.path());
                    outcome.failures.push(FileFailure {
                        path: op.path().to_owned(),
                        error: err,
                    });
                }
            }
        }
    }

    Ok(outcome)
}
