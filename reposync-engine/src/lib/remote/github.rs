use std::{fmt, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::StatusCode;
use reposync::{CommitResult, RepoId};
use url::Url;

use super::{BranchHead, Encoding, ObjectKind, RepoInfo, Tree, TreeEntry, TreeItem};
use crate::error;

/// A personal access token or app token.
#[derive(Clone)]
pub struct Token(String);

impl Token {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

#[derive(Debug)]
struct Inner {
    base_url: Url,
    repo: RepoId,
    token: Token,
    user_agent: String,
}

/// The Git Data API of GitHub (or GitHub Enterprise at another base url).
#[derive(Clone, Debug)]
pub struct GitHub {
    client: reqwest::Client,
    inner: Arc<Inner>,
}

impl GitHub {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        repo: RepoId,
        token: Token,
    ) -> reposync::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|err| reposync::config_error!("invalid API url '{base_url}': {err}"))?;
        if base_url.cannot_be_a_base() {
            reposync::config_bail!("invalid API url '{base_url}'");
        }
        let user_agent = format!("reposync/{}", env!("CARGO_PKG_VERSION"));
        log::info!("Initializing GitHub remote {repo} at {base_url}");
        Ok(Self {
            client,
            inner: Arc::new(Inner {
                base_url,
                repo,
                token,
                user_agent,
            }),
        })
    }

}

impl super::ReadRepo for GitHub {
    async fn repository(&self) -> reposync::Result<RepoInfo> {
        let url = self.repo_url(&[])?;
        let res = self.get(url).await?;
        let res = utils::check_response("GET", "repository", res).await?;
        let repo: api::Repository = res.json().await.map_err(error::api)?;
        Ok(RepoInfo {
            full_name: repo.full_name,
            default_branch: repo.default_branch,
            html_url: repo.html_url,
            can_push: repo.permissions.map(|p| p.push),
        })
    }

    async fn branch_head(&self, branch: &str) -> reposync::Result<BranchHead> {
        let url = self.repo_url(&["git", "ref", "heads"])?;
        let url = utils::with_path(url, branch)?;
        let res = self.get(url).await?;
        match res.status() {
            StatusCode::NOT_FOUND => {
                log::debug!("branch {branch} does not exist");
                return Ok(BranchHead::Missing);
            }
            // "Git Repository is empty."
            StatusCode::CONFLICT => {
                log::debug!("repository {} is empty", self.inner.repo);
                return Ok(BranchHead::EmptyRepository);
            }
            _ => (),
        }
        let res = utils::check_response("GET", "ref", res).await?;
        let git_ref: api::Ref = res.json().await.map_err(error::api)?;
        if git_ref.object.kind != "commit" {
            reposync::api_bail!(
                "heads/{branch} points to a {}, not a commit",
                git_ref.object.kind
            );
        }
        Ok(BranchHead::Commit(utils::object_name(git_ref.object.sha)?))
    }

    async fn commit_tree(&self, commit: &str) -> reposync::Result<String> {
        let url = self.repo_url(&["git", "commits", commit])?;
        let res = self.get(url).await?;
        let res = utils::check_response("GET", "commit", res).await?;
        let commit: api::Commit = res.json().await.map_err(error::api)?;
        utils::object_name(commit.tree.sha)
    }

    async fn tree(&self, sha: &str, recursive: bool) -> reposync::Result<Tree> {
        let mut url = self.repo_url(&["git", "trees", sha])?;
        if recursive {
            url.query_pairs_mut().append_pair("recursive", "1");
        }
        let res = self.get(url).await?;
        let res = utils::check_response("GET", "tree", res).await?;
        let tree: api::Tree = res.json().await.map_err(error::api)?;
        let items = tree
            .tree
            .into_iter()
            .map(|item| TreeItem {
                path: item.path,
                mode: item.mode,
                kind: item.kind,
                sha: item.sha,
            })
            .collect();
        Ok(Tree {
            items,
            truncated: tree.truncated,
        })
    }
}

impl super::CreateBlob for GitHub {
    async fn create_blob(&self, content: &[u8], encoding: Encoding) -> reposync::Result<String> {
        let content = match encoding {
            Encoding::Base64 => STANDARD.encode(content),
            Encoding::Utf8 => std::str::from_utf8(content)
                .map_err(|err| reposync::Error::Bug(format!("utf-8 blob is not UTF-8: {err}")))?
                .to_owned(),
        };
        let body = api::NewBlob {
            content,
            encoding: encoding.as_str(),
        };
        let url = self.repo_url(&["git", "blobs"])?;
        let res = self.send_json(reqwest::Method::POST, url, &body).await?;
        let res = utils::check_response("POST", "blob", res).await?;
        let blob: api::Created = res.json().await.map_err(error::api)?;
        utils::object_name(blob.sha)
    }
}

impl super::CreateTree for GitHub {
    async fn create_tree(
        &self,
        base_tree: Option<&str>,
        entries: &[TreeEntry],
    ) -> reposync::Result<String> {
        let body = api::NewTree {
            base_tree,
            tree: entries
                .iter()
                .map(|e| api::NewTreeEntry {
                    path: &e.path,
                    mode: &e.mode,
                    kind: "blob",
                    sha: e.sha.as_deref(),
                })
                .collect(),
        };
        let url = self.repo_url(&["git", "trees"])?;
        let res = self.send_json(reqwest::Method::POST, url, &body).await?;
        let res = utils::check_response("POST", "tree", res).await?;
        let tree: api::Created = res.json().await.map_err(error::api)?;
        utils::object_name(tree.sha)
    }
}

impl super::CreateCommit for GitHub {
    async fn create_commit(
        &self,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> reposync::Result<CommitResult> {
        let body = api::NewCommit {
            message,
            tree,
            parents,
        };
        let url = self.repo_url(&["git", "commits"])?;
        let res = self.send_json(reqwest::Method::POST, url, &body).await?;
        let res = utils::check_response("POST", "commit", res).await?;
        let commit: api::Created = res.json().await.map_err(error::api)?;
        let commit_hash = utils::object_name(commit.sha)?;
        let commit_url = commit
            .html_url
            .unwrap_or_else(|| self.commit_html_url(&commit_hash));
        Ok(CommitResult {
            commit_hash,
            commit_url,
        })
    }
}

impl super::UpdateRef for GitHub {
    async fn update_ref(&self, branch: &str, commit: &str) -> reposync::Result<()> {
        let url = self.repo_url(&["git", "refs", "heads"])?;
        let url = utils::with_path(url, branch)?;
        let body = api::UpdateRef {
            sha: commit,
            force: false,
        };
        let res = self.send_json(reqwest::Method::PATCH, url, &body).await?;
        // "Update is not a fast forward"
        if matches!(
            res.status(),
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::CONFLICT
        ) {
            let msg = utils::error_message(res).await;
            return Err(reposync::conflict_error!("heads/{branch}: {msg}"));
        }
        utils::check_response("PATCH", "ref", res).await?;
        log::info!("heads/{branch} -> {commit}");
        Ok(())
    }

    async fn create_ref(&self, branch: &str, commit: &str) -> reposync::Result<()> {
        let url = self.repo_url(&["git", "refs"])?;
        let git_ref = format!("refs/heads/{branch}");
        let body = api::NewRef {
            git_ref: &git_ref,
            sha: commit,
        };
        let res = self.send_json(reqwest::Method::POST, url, &body).await?;
        // "Reference already exists": someone created the branch meanwhile
        if res.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let msg = utils::error_message(res).await;
            return Err(reposync::conflict_error!("{git_ref}: {msg}"));
        }
        utils::check_response("POST", "ref", res).await?;
        log::info!("created {git_ref} -> {commit}");
        Ok(())
    }
}

impl super::Contents for GitHub {
    async fn put_contents(
        &self,
        branch: &str,
        path: &str,
        content: &[u8],
        previous: Option<&str>,
        message: &str,
    ) -> reposync::Result<CommitResult> {
        let url = self.repo_url(&["contents"])?;
        let url = utils::with_path(url, path)?;
        let body = api::PutContents {
            message,
            content: STANDARD.encode(content),
            branch,
            sha: previous,
        };
        let res = self.send_json(reqwest::Method::PUT, url, &body).await?;
        let res = utils::check_response("PUT", "contents", res).await?;
        let res: api::ContentsCommit = res.json().await.map_err(error::api)?;
        self.contents_commit(res)
    }

    async fn delete_contents(
        &self,
        branch: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> reposync::Result<CommitResult> {
        let url = self.repo_url(&["contents"])?;
        let url = utils::with_path(url, path)?;
        let body = api::DeleteContents {
            message,
            branch,
            sha,
        };
        let res = self.send_json(reqwest::Method::DELETE, url, &body).await?;
        let res = utils::check_response("DELETE", "contents", res).await?;
        let res: api::ContentsCommit = res.json().await.map_err(error::api)?;
        self.contents_commit(res)
    }
}

impl super::Remote for GitHub {}

impl GitHub {
    fn commit_html_url(&self, sha: &str) -> String {
        let host = match self.inner.base_url.host_str() {
            Some("api.github.com") | None => "github.com".to_string(),
            Some(host) => host.to_string(),
        };
        format!("https://{host}/{}/commit/{sha}", self.inner.repo)
    }

    fn contents_commit(&self, res: api::ContentsCommit) -> reposync::Result<CommitResult> {
        let commit_hash = utils::object_name(res.commit.sha)?;
        let commit_url = res
            .commit
            .html_url
            .unwrap_or_else(|| self.commit_html_url(&commit_hash));
        Ok(CommitResult {
            commit_hash,
            commit_url,
        })
    }
}

mod api {
    use serde::{Deserialize, Serialize};

    use super::ObjectKind;

    #[derive(Debug, Clone, Deserialize)]
    pub struct Permissions {
        pub push: bool,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Repository {
        pub full_name: String,
        pub default_branch: String,
        pub html_url: String,
        pub permissions: Option<Permissions>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct RefObject {
        pub sha: String,
        #[serde(rename = "type")]
        pub kind: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Ref {
        pub object: RefObject,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Sha {
        pub sha: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Commit {
        pub tree: Sha,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct TreeItem {
        pub path: String,
        pub mode: String,
        #[serde(rename = "type")]
        pub kind: ObjectKind,
        pub sha: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Tree {
        #[serde(default)]
        pub tree: Vec<TreeItem>,
        #[serde(default)]
        pub truncated: bool,
    }

    /// Response to the creation of any git object
    #[derive(Debug, Clone, Deserialize)]
    pub struct Created {
        pub sha: String,
        pub html_url: Option<String>,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct NewBlob {
        pub content: String,
        pub encoding: &'static str,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct NewTreeEntry<'a> {
        pub path: &'a str,
        pub mode: &'a str,
        #[serde(rename = "type")]
        pub kind: &'static str,
        /// null deletes the path from the base tree
        pub sha: Option<&'a str>,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct NewTree<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub base_tree: Option<&'a str>,
        pub tree: Vec<NewTreeEntry<'a>>,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct NewCommit<'a> {
        pub message: &'a str,
        pub tree: &'a str,
        pub parents: &'a [String],
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct UpdateRef<'a> {
        pub sha: &'a str,
        pub force: bool,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct NewRef<'a> {
        #[serde(rename = "ref")]
        pub git_ref: &'a str,
        pub sha: &'a str,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct PutContents<'a> {
        pub message: &'a str,
        pub content: String,
        pub branch: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub sha: Option<&'a str>,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct DeleteContents<'a> {
        pub message: &'a str,
        pub branch: &'a str,
        pub sha: &'a str,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ContentsCommit {
        pub commit: Created,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct ErrorBody {
        #[serde(default)]
        pub message: String,
    }
}

mod utils {
    use chrono::{DateTime, TimeZone, Utc};
    use http::StatusCode;
    use reqwest::{header, Response};
    use serde::Serialize;
    use url::Url;

    use super::api;
    use crate::error;

    /// Rate limit headers of a response
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct RateLimit {
        pub remaining: Option<u64>,
        pub reset: Option<DateTime<Utc>>,
        pub retry_after: Option<u64>,
    }

    impl RateLimit {
        pub fn from_headers(headers: &header::HeaderMap) -> Self {
            let num = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
            };
            RateLimit {
                remaining: num("x-ratelimit-remaining"),
                reset: num("x-ratelimit-reset")
                    .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single()),
                retry_after: num("retry-after"),
            }
        }

        pub fn exhausted(&self) -> bool {
            self.remaining == Some(0) || self.retry_after.is_some()
        }
    }

    /// Maps a failed response to the error taxonomy of the engine.
    pub fn map_status(
        method: &str,
        what: &str,
        status: StatusCode,
        rate: RateLimit,
        message: &str,
    ) -> reposync::Error {
        let msg = format!("{method} {what} returned {status}: {message}");
        match status {
            StatusCode::UNAUTHORIZED => reposync::Error::Auth(msg),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
                if rate.exhausted() || message.to_lowercase().contains("rate limit") =>
            {
                reposync::Error::RateLimited {
                    message: msg,
                    reset: rate.reset,
                }
            }
            StatusCode::TOO_MANY_REQUESTS => reposync::Error::RateLimited {
                message: msg,
                reset: rate.reset,
            },
            StatusCode::FORBIDDEN => reposync::Error::Auth(msg),
            StatusCode::NOT_FOUND => reposync::Error::NotFound(msg),
            StatusCode::REQUEST_TIMEOUT => reposync::Error::Transient(msg),
            s if s.is_server_error() => reposync::Error::Transient(msg),
            _ => reposync::Error::Api(msg),
        }
    }

    pub async fn error_message(res: Response) -> String {
        let status = res.status();
        match res.text().await {
            Ok(body) => serde_json::from_str::<api::ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or(body),
            Err(..) => status.to_string(),
        }
    }

    pub async fn check_response(
        method: &str,
        what: &str,
        res: Response,
    ) -> reposync::Result<Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let rate = RateLimit::from_headers(res.headers());
        let message = error_message(res).await;
        Err(map_status(method, what, status, rate, &message))
    }

    pub fn object_name(sha: String) -> reposync::Result<String> {
        if !reposync::hash::is_object_name(&sha) {
            reposync::api_bail!("not an object name: '{sha}'");
        }
        Ok(sha)
    }

    /// Appends a `/`-separated repository path, each component percent-encoded.
    pub fn with_path(mut url: Url, path: &str) -> reposync::Result<Url> {
        let msg = format!("{url} cannot be a base");
        url.path_segments_mut()
            .map_err(|_| reposync::Error::Bug(msg))?
            .extend(path.split('/'));
        Ok(url)
    }

    impl super::GitHub {
        pub fn repo_url(&self, segments: &[&str]) -> reposync::Result<Url> {
            let mut url = self.inner.base_url.clone();
            let msg = format!("{url} cannot be a base");
            let repo = &self.inner.repo;
            url.path_segments_mut()
                .map_err(|_| reposync::Error::Bug(msg))?
                .pop_if_empty()
                .extend(["repos", repo.owner.as_str(), repo.name.as_str()])
                .extend(segments);
            Ok(url)
        }

        fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
            self.client
                .request(method, url)
                .bearer_auth(self.inner.token.secret())
                .header(header::USER_AGENT, &self.inner.user_agent)
                .header(header::ACCEPT, "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28")
        }

        pub async fn get(&self, url: Url) -> reposync::Result<Response> {
            log::trace!("GET {url}");
            self.request(reqwest::Method::GET, url)
                .send()
                .await
                .map_err(error::transport)
        }

        pub async fn send_json<T>(
            &self,
            method: reqwest::Method,
            url: Url,
            body: &T,
        ) -> reposync::Result<Response>
        where
            T: Serialize,
        {
            log::trace!("{method} {url}");
            self.request(method, url)
                .json(body)
                .send()
                .await
                .map_err(error::transport)
        }
    }

}
