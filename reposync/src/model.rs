use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::hash;

/// Git file modes the engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileMode {
    #[default]
    Regular,
    Executable,
}

impl FileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
        }
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file found under the local root, read once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    path: String,
    content: Vec<u8>,
    is_binary: bool,
    mode: FileMode,
}

impl LocalFile {
    /// `path` is relative to the sync root, `/`-separated.
    pub fn new(path: impl Into<String>, content: Vec<u8>, is_binary: bool, mode: FileMode) -> Self {
        let path = path.into();
        debug_assert!(!path.starts_with('/'), "expected a relative path: {path}");
        Self {
            path,
            content,
            is_binary,
            mode,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn is_binary(&self) -> bool {
        self.is_binary
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn blob_hash(&self) -> String {
        hash::blob_hash(&self.content)
    }
}

/// A blob entry of the remote tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    pub blob_hash: String,
    pub mode: String,
}

/// Where the branch points to, if it exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Head {
    pub commit: Option<String>,
    pub tree: Option<String>,
    /// The repository has no commit at all.
    pub empty_repository: bool,
}

impl Head {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn empty_repository() -> Self {
        Self {
            empty_repository: true,
            ..Self::default()
        }
    }

    pub fn exists(&self) -> bool {
        self.commit.is_some()
    }
}

/// Point-in-time snapshot of a branch.
/// Must not outlive the run that read it.
#[derive(Debug, Clone, Default)]
pub struct RemoteTree {
    pub head: Head,
    pub entries: BTreeMap<String, RemoteEntry>,
}

impl RemoteTree {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&RemoteEntry> {
        self.entries.get(path)
    }

}

/// Partition of the local and remote paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
}

impl DiffResult {
    /// `new ∪ changed`, sorted.
    pub fn to_upload(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.new.iter().chain(&self.changed).cloned().collect();
        paths.sort();
        paths
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub files_to_upload: Vec<String>,
    pub files_to_delete: Vec<String>,
    pub base_tree_hash: Option<String>,
    pub parent_commit_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedBlob {
    pub path: String,
    pub blob_hash: String,
    pub mode: FileMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub commit_hash: String,
    pub commit_url: String,
}

/// A file the run could not synchronize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub error: crate::Error,
}

/// How a run writes to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    /// Diff, upload changed blobs, one atomic commit.
    #[default]
    Incremental,
    /// Whole project as a single archive blob.
    Archive,
    /// One commit per file through the contents endpoint.
    PerFile,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Incremental => f.write_str("incremental"),
            SyncMode::Archive => f.write_str("archive"),
            SyncMode::PerFile => f.write_str("per-file"),
        }
    }
}

/// Phases of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Enumerating,
    ReadingRemote,
    Diffing,
    Uploading,
    Composing,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a run that did not fail fatally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub mode: SyncMode,
    pub uploaded_count: usize,
    pub total_planned: usize,
    pub skipped_unchanged: usize,
    pub deleted_count: usize,
    pub deleted_paths: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub commit: Option<CommitResult>,
    pub no_commit_reason: Option<String>,
    pub degraded: bool,
    pub dry_run: bool,
}

impl SyncReport {
    pub fn commit_url(&self) -> Option<&str> {
        self.commit.as_ref().map(|c| c.commit_url.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.uploaded_count == self.total_planned
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "DRY RUN ({} mode)", self.mode)?;
        } else {
            writeln!(f, "SYNC REPORT ({} mode)", self.mode)?;
        }
        writeln!(
            f,
            "  uploaded:  {}/{}",
            self.uploaded_count, self.total_planned
        )?;
        writeln!(f, "  unchanged: {}", self.skipped_unchanged)?;
        writeln!(f, "  deleted:   {}", self.deleted_count)?;
        for path in &self.deleted_paths {
            writeln!(f, "    - {path}")?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "  failed:    {}", self.failures.len())?;
            for failure in &self.failures {
                writeln!(f, "    ! {}: {}", failure.path, failure.error)?;
            }
        }
        if self.degraded {
            writeln!(f, "  (degraded: files were committed one by one)")?;
        }
        match (&self.commit, &self.no_commit_reason) {
            (Some(commit), _) => write!(f, "  commit:    {}", commit.commit_url),
            (None, Some(reason)) => write!(f, "  no commit: {reason}"),
            (None, None) => write!(f, "  no commit"),
        }
    }
}
