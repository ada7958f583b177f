use futures::Future;
use reposync::CommitResult;
use serde::{Deserialize, Serialize};

pub mod github;

/// What the engine needs to know about the repository itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoInfo {
    pub full_name: String,
    pub default_branch: String,
    pub html_url: String,
    /// `None` when the provider does not tell.
    pub can_push: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
    /// A submodule
    Commit,
}

/// An entry of a tree as listed by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    pub path: String,
    pub mode: String,
    pub kind: ObjectKind,
    pub sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub items: Vec<TreeItem>,
    /// The listing hit a provider limit and is incomplete.
    pub truncated: bool,
}

/// An entry of a tree to create on top of a base tree.
/// A `None` sha removes the path from the base tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    pub sha: Option<String>,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, mode: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: mode.into(),
            sha: Some(sha.into()),
        }
    }

    pub fn removal(path: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: mode.into(),
            sha: None,
        }
    }

    pub fn is_removal(&self) -> bool {
        self.sha.is_none()
    }
}

/// What a branch lookup found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchHead {
    Commit(String),
    Missing,
    /// The repository has no commit, so no branch either.
    EmptyRepository,
}

/// How blob content travels over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Base64,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Base64 => "base64",
        }
    }
}

pub trait ReadRepo {
    fn repository(&self) -> impl Future<Output = reposync::Result<RepoInfo>> + Send;

    /// The commit a branch points to.
    fn branch_head(
        &self,
        branch: &str,
    ) -> impl Future<Output = reposync::Result<BranchHead>> + Send;

    /// The root tree of a commit.
    fn commit_tree(&self, commit: &str) -> impl Future<Output = reposync::Result<String>> + Send;

    fn tree(
        &self,
        sha: &str,
        recursive: bool,
    ) -> impl Future<Output = reposync::Result<Tree>> + Send;
}

pub trait CreateBlob {
    /// Stores `content` and returns its blob hash.
    fn create_blob(
        &self,
        content: &[u8],
        encoding: Encoding,
    ) -> impl Future<Output = reposync::Result<String>> + Send;
}

pub trait CreateTree {
    fn create_tree(
        &self,
        base_tree: Option<&str>,
        entries: &[TreeEntry],
    ) -> impl Future<Output = reposync::Result<String>> + Send;
}

pub trait CreateCommit {
    fn create_commit(
        &self,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> impl Future<Output = reposync::Result<CommitResult>> + Send;
}

/// Moving branches. Implementations must never force an update:
/// a branch that moved elsewhere is reported as [`reposync::Error::Conflict`].
pub trait UpdateRef {
    fn update_ref(
        &self,
        branch: &str,
        commit: &str,
    ) -> impl Future<Output = reposync::Result<()>> + Send;

    fn create_ref(
        &self,
        branch: &str,
        commit: &str,
    ) -> impl Future<Output = reposync::Result<()>> + Send;
}

/// Single-file commits, used by the per-file mode and to create
/// the first commit of an empty repository.
pub trait Contents {
    /// Creates or replaces one file with its own commit.
    /// `previous` is the blob hash being replaced, if any.
    fn put_contents(
        &self,
        branch: &str,
        path: &str,
        content: &[u8],
        previous: Option<&str>,
        message: &str,
    ) -> impl Future<Output = reposync::Result<CommitResult>> + Send;

    fn delete_contents(
        &self,
        branch: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> impl Future<Output = reposync::Result<CommitResult>> + Send;
}

/// A Git object store reachable by the engine
pub trait Remote:
    Clone
    + ReadRepo
    + CreateBlob
    + CreateTree
    + CreateCommit
    + UpdateRef
    + Contents
    + Send
    + Sync
    + 'static
{
}
