use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use reposync::{hash::blob_hash, CommitResult};
use reposync_engine::remote::{
    BranchHead, Contents, CreateBlob, CreateCommit, CreateTree, Encoding, ObjectKind, ReadRepo,
    Remote, RepoInfo, Tree, TreeEntry, TreeItem, UpdateRef,
};

/// Flat tree: path -> (mode, blob)
type FlatTree = BTreeMap<String, (String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: String,
    pub parents: Vec<String>,
    pub message: String,
}

/// Calls received by the stub
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub blobs: usize,
    pub trees: usize,
    pub commits: usize,
    pub ref_updates: usize,
    pub ref_creates: usize,
    pub tree_reads: usize,
    pub put_contents: usize,
    pub delete_contents: usize,
}

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, FlatTree>,
    commits: HashMap<String, Commit>,
    refs: BTreeMap<String, String>,
    next_id: u64,
    calls: Calls,

    /// No commit yet, the Git Data API refuses to write
    empty: bool,

    // failure injection
    failing_blobs: Vec<Vec<u8>>,
    fatal_blobs: Vec<Vec<u8>>,
    transient_blobs: usize,
    failing_tree_creation: bool,
    conflicts: usize,
    truncated: bool,
    lost_ref_responses: usize,
    concurrent_commits: Vec<String>,
}

impl State {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:040x}", self.next_id)
    }

    fn put_tree(&mut self, tree: FlatTree) -> String {
        let id = self.new_id();
        self.trees.insert(id.clone(), tree);
        id
    }

    fn put_commit(&mut self, tree: String, parents: Vec<String>, message: &str) -> String {
        let id = self.new_id();
        self.commits.insert(
            id.clone(),
            Commit {
                tree,
                parents,
                message: message.to_string(),
            },
        );
        id
    }

    fn put_blob(&mut self, content: &[u8]) -> String {
        let sha = blob_hash(content);
        self.blobs.insert(sha.clone(), content.to_vec());
        sha
    }

    fn head_tree(&self, branch: &str) -> Option<(String, FlatTree)> {
        let commit = self.refs.get(branch)?;
        let tree = &self.commits[commit].tree;
        Some((commit.clone(), self.trees[tree].clone()))
    }

    fn is_ancestor(&self, ancestor: &str, commit: &str) -> bool {
        let mut stack = vec![commit.to_string()];
        while let Some(c) = stack.pop() {
            if c == ancestor {
                return true;
            }
            if let Some(commit) = self.commits.get(&c) {
                stack.extend(commit.parents.iter().cloned());
            }
        }
        false
    }

    fn lose_ref_response(&mut self) -> reposync::Result<()> {
        if self.lost_ref_responses > 0 {
            self.lost_ref_responses -= 1;
            return Err(reposync::transient_error!("502 Bad Gateway"));
        }
        Ok(())
    }

    /// Someone else pushes to `branch`.
    fn concurrent_push(&mut self, branch: &str) {
        let (parent, mut tree) = self.head_tree(branch).expect("concurrent push to a branch");
        let n = self.concurrent_commits.len() + 1;
        let content = format!("pushed by someone else #{n}\n");
        let sha = self.put_blob(content.as_bytes());
        tree.insert(format!("concurrent-{n}.txt"), ("100644".into(), sha));
        let tree = self.put_tree(tree);
        let commit = self.put_commit(tree, vec![parent], "concurrent push");
        self.refs.insert(branch.to_string(), commit.clone());
        self.concurrent_commits.push(commit);
    }

    /// Lists the direct children of `prefix` in a flat tree.
    /// Sub-trees get synthetic ids `<root>:<prefix>`.
    fn list_level(root: &str, tree: &FlatTree, prefix: &str) -> Vec<TreeItem> {
        let mut items = Vec::new();
        let mut dirs = BTreeSet::new();
        for (path, (mode, sha)) in tree {
            let rest = if prefix.is_empty() {
                path.as_str()
            } else {
                match path.strip_prefix(prefix).and_then(|p| p.strip_prefix('/')) {
                    Some(rest) => rest,
                    None => continue,
                }
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => items.push(TreeItem {
                    path: rest.to_string(),
                    mode: mode.clone(),
                    kind: ObjectKind::Blob,
                    sha: sha.clone(),
                }),
            }
        }
        for dir in dirs {
            let full = if prefix.is_empty() {
                dir.clone()
            } else {
                format!("{prefix}/{dir}")
            };
            items.push(TreeItem {
                path: dir,
                mode: "040000".into(),
                kind: ObjectKind::Tree,
                sha: format!("{root}:{full}"),
            });
        }
        items
    }
}

/// In-memory Git object store.
///
/// Trees are stored flat, blob hashes are real Git hashes.
#[derive(Debug, Clone, Default)]
pub struct Stub {
    state: Arc<Mutex<State>>,
}

impl Stub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `branch` with a first commit holding `files`.
    pub fn seed(&self, branch: &str, files: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        let mut tree = FlatTree::new();
        for (path, content) in files {
            let sha = state.put_blob(content.as_bytes());
            tree.insert(path.to_string(), ("100644".into(), sha));
        }
        let tree = state.put_tree(tree);
        let commit = state.put_commit(tree, vec![], "initial commit");
        state.refs.insert(branch.to_string(), commit.clone());
        commit
    }

    pub fn head(&self, branch: &str) -> Option<String> {
        self.state.lock().unwrap().refs.get(branch).cloned()
    }

    pub fn commit(&self, id: &str) -> Commit {
        self.state.lock().unwrap().commits[id].clone()
    }

    /// Content of every file of `branch`.
    pub fn files(&self, branch: &str) -> BTreeMap<String, Vec<u8>> {
        let state = self.state.lock().unwrap();
        let Some((_, tree)) = state.head_tree(branch) else {
            return BTreeMap::new();
        };
        tree.into_iter()
            .map(|(path, (_, sha))| (path, state.blobs[&sha].clone()))
            .collect()
    }

    pub fn mode(&self, branch: &str, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let (_, tree) = state.head_tree(branch)?;
        tree.get(path).map(|(mode, _)| mode.clone())
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn concurrent_commits(&self) -> Vec<String> {
        self.state.lock().unwrap().concurrent_commits.clone()
    }

    /// Blobs containing `marker` are rejected with an API error.
    pub fn fail_blobs_containing(&self, marker: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing_blobs.push(marker.as_bytes().to_vec());
    }

    /// Blobs containing `marker` are rejected as unauthorized.
    pub fn reject_blobs_containing(&self, marker: &str) {
        let mut state = self.state.lock().unwrap();
        state.fatal_blobs.push(marker.as_bytes().to_vec());
    }

    /// The next `n` blob creations fail with a transient error.
    pub fn fail_next_blobs(&self, n: usize) {
        self.state.lock().unwrap().transient_blobs = n;
    }

    pub fn fail_tree_creation(&self, fail: bool) {
        self.state.lock().unwrap().failing_tree_creation = fail;
    }

    /// The next `n` ref updates see a concurrent push first.
    pub fn push_concurrently(&self, n: usize) {
        self.state.lock().unwrap().conflicts = n;
    }

    /// The repository has no commit until one is written through
    /// the contents endpoint.
    pub fn make_empty(&self) {
        self.state.lock().unwrap().empty = true;
    }

    /// The next `n` ref writes succeed but answer with a transient error.
    pub fn lose_ref_responses(&self, n: usize) {
        self.state.lock().unwrap().lost_ref_responses = n;
    }

    /// Recursive listings are cut in half and flagged as truncated.
    pub fn truncate_listings(&self, truncated: bool) {
        self.state.lock().unwrap().truncated = truncated;
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

impl ReadRepo for Stub {
    async fn repository(&self) -> reposync::Result<RepoInfo> {
        Ok(RepoInfo {
            full_name: "octo/site".into(),
            default_branch: "main".into(),
            html_url: "https://github.test/octo/site".into(),
            can_push: Some(true),
        })
    }

    async fn branch_head(&self, branch: &str) -> reposync::Result<BranchHead> {
        let state = self.state.lock().unwrap();
        if state.empty {
            return Ok(BranchHead::EmptyRepository);
        }
        Ok(match state.refs.get(branch) {
            Some(commit) => BranchHead::Commit(commit.clone()),
            None => BranchHead::Missing,
        })
    }

    async fn commit_tree(&self, commit: &str) -> reposync::Result<String> {
        let state = self.state.lock().unwrap();
        match state.commits.get(commit) {
            Some(commit) => Ok(commit.tree.clone()),
            None => Err(reposync::Error::NotFound(format!("commit {commit}"))),
        }
    }

    async fn tree(&self, sha: &str, recursive: bool) -> reposync::Result<Tree> {
        let mut state = self.state.lock().unwrap();
        state.calls.tree_reads += 1;

        let (root, prefix) = match sha.split_once(':') {
            Some((root, prefix)) => (root.to_string(), prefix.to_string()),
            None => (sha.to_string(), String::new()),
        };
        let Some(tree) = state.trees.get(&root) else {
            return Err(reposync::Error::NotFound(format!("tree {sha}")));
        };

        if !recursive {
            return Ok(Tree {
                items: State::list_level(&root, tree, &prefix),
                truncated: false,
            });
        }

        let mut items = Vec::new();
        let mut dirs = BTreeSet::new();
        for (path, (mode, blob)) in tree {
            let mut dir = path.as_str();
            while let Some((parent, _)) = dir.rsplit_once('/') {
                dirs.insert(parent.to_string());
                dir = parent;
            }
            items.push(TreeItem {
                path: path.clone(),
                mode: mode.clone(),
                kind: ObjectKind::Blob,
                sha: blob.clone(),
            });
        }
        for dir in dirs {
            items.push(TreeItem {
                sha: format!("{root}:{dir}"),
                path: dir,
                mode: "040000".into(),
                kind: ObjectKind::Tree,
            });
        }
        let truncated = state.truncated;
        if truncated {
            items.truncate(items.len() / 2);
        }
        Ok(Tree {
            items,
            truncated,
        })
    }
}

impl CreateBlob for Stub {
    async fn create_blob(&self, content: &[u8], _encoding: Encoding) -> reposync::Result<String> {
        // let the other uploads of the batch start
        tokio::task::yield_now().await;

        let mut state = self.state.lock().unwrap();
        state.calls.blobs += 1;
        if state.empty {
            return Err(reposync::api_error!("409 Git Repository is empty."));
        }
        if state.transient_blobs > 0 {
            state.transient_blobs -= 1;
            return Err(reposync::transient_error!("502 Bad Gateway"));
        }
        if state.fatal_blobs.iter().any(|m| contains(content, m)) {
            return Err(reposync::Error::Auth("401 Bad credentials".into()));
        }
        if state.failing_blobs.iter().any(|m| contains(content, m)) {
            return Err(reposync::api_error!("422 blob rejected"));
        }
        Ok(state.put_blob(content))
    }
}

impl CreateTree for Stub {
    async fn create_tree(
        &self,
        base_tree: Option<&str>,
        entries: &[TreeEntry],
    ) -> reposync::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.trees += 1;
        if state.failing_tree_creation {
            return Err(reposync::api_error!("422 tree rejected"));
        }

        let mut tree = match base_tree {
            Some(base) => match state.trees.get(base) {
                Some(tree) => tree.clone(),
                None => return Err(reposync::api_error!("422 unknown base tree {base}")),
            },
            None => FlatTree::new(),
        };
        for entry in entries {
            match &entry.sha {
                Some(sha) => {
                    if !state.blobs.contains_key(sha) {
                        return Err(reposync::api_error!("422 unknown blob {sha}"));
                    }
                    tree.insert(entry.path.clone(), (entry.mode.clone(), sha.clone()));
                }
                None => {
                    if tree.remove(&entry.path).is_none() {
                        return Err(reposync::api_error!(
                            "422 cannot remove missing {}",
                            entry.path
                        ));
                    }
                }
            }
        }
        Ok(state.put_tree(tree))
    }
}

impl CreateCommit for Stub {
    async fn create_commit(
        &self,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> reposync::Result<CommitResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.commits += 1;
        if !state.trees.contains_key(tree) {
            return Err(reposync::api_error!("422 unknown tree {tree}"));
        }
        let commit_hash = state.put_commit(tree.to_string(), parents.to_vec(), message);
        Ok(CommitResult {
            commit_url: format!("https://github.test/octo/site/commit/{commit_hash}"),
            commit_hash,
        })
    }
}

impl UpdateRef for Stub {
    async fn update_ref(&self, branch: &str, commit: &str) -> reposync::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.ref_updates += 1;
        if state.conflicts > 0 {
            state.conflicts -= 1;
            state.concurrent_push(branch);
        }
        let Some(current) = state.refs.get(branch).cloned() else {
            return Err(reposync::Error::NotFound(format!("heads/{branch}")));
        };
        if !state.is_ancestor(&current, commit) {
            return Err(reposync::conflict_error!("Update is not a fast forward"));
        }
        state.refs.insert(branch.to_string(), commit.to_string());
        state.lose_ref_response()
    }

    async fn create_ref(&self, branch: &str, commit: &str) -> reposync::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.ref_creates += 1;
        if state.refs.contains_key(branch) {
            return Err(reposync::conflict_error!("Reference already exists"));
        }
        state.refs.insert(branch.to_string(), commit.to_string());
        state.lose_ref_response()
    }
}

impl Contents for Stub {
    async fn put_contents(
        &self,
        branch: &str,
        path: &str,
        content: &[u8],
        previous: Option<&str>,
        message: &str,
    ) -> reposync::Result<CommitResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.put_contents += 1;
        if state.failing_blobs.iter().any(|m| contains(content, m)) {
            return Err(reposync::api_error!("422 content rejected"));
        }
        let (parents, mut tree) = match state.head_tree(branch) {
            Some((parent, tree)) => (vec![parent], tree),
            None if state.empty => {
                state.empty = false;
                (vec![], FlatTree::new())
            }
            None => return Err(reposync::Error::NotFound(format!("heads/{branch}"))),
        };
        let current = tree.get(path).map(|(_, sha)| sha.as_str());
        if current != previous {
            return Err(reposync::api_error!("409 {path} does not match {previous:?}"));
        }
        let sha = state.put_blob(content);
        tree.insert(path.to_string(), ("100644".into(), sha));
        let tree = state.put_tree(tree);
        let commit_hash = state.put_commit(tree, parents, message);
        state.refs.insert(branch.to_string(), commit_hash.clone());
        Ok(CommitResult {
            commit_url: format!("https://github.test/octo/site/commit/{commit_hash}"),
            commit_hash,
        })
    }

    async fn delete_contents(
        &self,
        branch: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> reposync::Result<CommitResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.delete_contents += 1;
        let Some((parent, mut tree)) = state.head_tree(branch) else {
            return Err(reposync::Error::NotFound(format!("heads/{branch}")));
        };
        match tree.remove(path) {
            Some((_, current)) if current == sha => (),
            _ => return Err(reposync::api_error!("409 {path} does not match {sha}")),
        }
        let tree = state.put_tree(tree);
        let commit_hash = state.put_commit(tree, vec![parent], message);
        state.refs.insert(branch.to_string(), commit_hash.clone());
        Ok(CommitResult {
            commit_url: format!("https://github.test/octo/site/commit/{commit_hash}"),
            commit_hash,
        })
    }
}

impl Remote for Stub {}
