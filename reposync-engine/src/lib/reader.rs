//! Reading the current state of the target branch.

use std::collections::BTreeMap;

use reposync::{config::RetryConfig, Head, RemoteEntry, RemoteTree, SyncConfig};

use crate::{
    remote::{BranchHead, ObjectKind, ReadRepo, RepoInfo, TreeItem},
    retry::with_retry,
};

/// Repository and branch a run writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub repo: RepoInfo,
    pub branch: String,
}

/// Checks that the repository is reachable and writable,
/// and picks the configured branch or the default one.
pub async fn resolve_target<R>(remote: &R, config: &SyncConfig) -> reposync::Result<Target>
where
    R: ReadRepo,
{
    let repo = with_retry(&config.retry, "repository", || remote.repository()).await?;
    if repo.can_push == Some(false) {
        return Err(reposync::Error::Auth(format!(
            "the token cannot push to {}",
            repo.full_name
        )));
    }
    let branch = match &config.branch {
        Some(branch) => branch.clone(),
        None => {
            log::info!("using default branch '{}' of {}", repo.default_branch, repo.full_name);
            repo.default_branch.clone()
        }
    };
    Ok(Target { repo, branch })
}

/// Resolves where `branch` points to.
pub async fn resolve_head<R>(
    remote: &R,
    branch: &str,
    retry: &RetryConfig,
) -> reposync::Result<Head>
where
    R: ReadRepo,
{
    let commit = match with_retry(retry, "branch", || remote.branch_head(branch)).await? {
        BranchHead::Commit(commit) => commit,
        BranchHead::Missing => {
            log::info!("branch '{branch}' does not exist yet");
            return Ok(Head::missing());
        }
        BranchHead::EmptyRepository => {
            log::info!("the repository is empty, '{branch}' will be its first branch");
            return Ok(Head::empty_repository());
        }
    };
    let tree = with_retry(retry, "commit", || remote.commit_tree(&commit)).await?;
    log::debug!("heads/{branch} is {commit} with tree {tree}");
    Ok(Head {
        commit: Some(commit),
        tree: Some(tree),
        empty_repository: false,
    })
}

/// Reads the full tree of `branch` as a flat map of its blobs.
pub async fn read_remote<R>(
    remote: &R,
    branch: &str,
    retry: &RetryConfig,
) -> reposync::Result<RemoteTree>
where
    R: ReadRepo,
{
    let head = resolve_head(remote, branch, retry).await?;
    let Some(tree_sha) = head.tree.clone() else {
        return Ok(RemoteTree {
            head,
            entries: BTreeMap::new(),
        });
    };

    let tree = with_retry(retry, "tree", || remote.tree(&tree_sha, true)).await?;
    let entries = if tree.truncated {
        log::info!("recursive listing of {tree_sha} is truncated, walking the tree");
        read_tree(remote, &tree_sha, retry).await?
    } else {
        let mut entries = BTreeMap::new();
        collect_blobs(&mut entries, "", tree.items, |_, _| ());
        entries
    };

    log::info!("heads/{branch} has {} files", entries.len());
    Ok(RemoteTree { head, entries })
}

/// Lists a tree one directory at a time, with an explicit stack.
pub async fn read_tree<R>(
    remote: &R,
    tree_sha: &str,
    retry: &RetryConfig,
) -> reposync::Result<BTreeMap<String, RemoteEntry>>
where
    R: ReadRepo,
{
    let mut entries = BTreeMap::new();
    let mut stack = vec![(String::new(), tree_sha.to_string())];

    while let Some((prefix, sha)) = stack.pop() {
        let tree = with_retry(retry, "tree", || remote.tree(&sha, false)).await?;
        if tree.truncated {
            reposync::api_bail!("listing of tree {sha} at '{prefix}' is truncated");
        }
        collect_blobs(&mut entries, &prefix, tree.items, |path, sha| {
            stack.push((path, sha))
        });
    }
    Ok(entries)
}

fn collect_blobs<F>(
    entries: &mut BTreeMap<String, RemoteEntry>,
    prefix: &str,
    items: Vec<TreeItem>,
    mut subtree: F,
) where
    F: FnMut(String, String),
{
    for item in items {
        let path = if prefix.is_empty() {
            item.path
        } else {
            format!("{prefix}/{}", item.path)
        };
        match item.kind {
            ObjectKind::Blob => {
                let entry = RemoteEntry {
                    path: path.clone(),
                    blob_hash: item.sha,
                    mode: item.mode,
                };
                entries.insert(path, entry);
            }
            ObjectKind::Tree => subtree(path, item.sha),
            ObjectKind::Commit => log::debug!("ignoring submodule {path}"),
        }
    }
}
