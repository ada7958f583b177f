use std::{fmt, str::FromStr, time::Duration};

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern, PatternError};
use serde::{Deserialize, Serialize};

use crate::{Error, SyncMode};

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;
pub const MAX_BATCH_DELAY_MS: u64 = 5000;
pub const DEFAULT_ARCHIVE_PATH: &str = "project.tar.gz";
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
/// Hard limit of the provider for a single blob.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// A list of glob patterns matched against file names.
#[derive(Debug, Clone, Default)]
pub struct PatternList(Vec<Pattern>, MatchOptions);

impl PatternList {
    pub fn new<I>(patterns: I) -> Result<PatternList, PatternError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let opts = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let patterns: Result<Vec<_>, _> = patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect();
        Ok(PatternList(patterns?, opts))
    }

    pub fn matches(&self, name: &str) -> bool {
        self.0.iter().any(|p| p.matches_with(name, self.1))
    }
}

/// Owner and name of a repository, written `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, name) = s
            .split_once('/')
            .ok_or_else(|| crate::config_error!("expected 'owner/name', got '{s}'"))?;
        let name = name.strip_suffix(".git").unwrap_or(name);
        let valid = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid(owner) || !valid(name) {
            crate::config_bail!("invalid repository identity '{s}'");
        }
        Ok(RepoId {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl TryFrom<String> for RepoId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoId> for String {
    fn from(value: RepoId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Serialized form of the exclusion rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RulesConfig {
    /// Directory names skipped at any depth, with their whole subtree.
    pub dir_names: Vec<String>,
    /// Exact file names skipped at any depth.
    pub file_names: Vec<String>,
    /// File name suffixes skipped at any depth.
    pub suffixes: Vec<String>,
    /// Glob patterns matched against file names. Meant for secrets.
    pub patterns: Vec<String>,
    pub max_file_size: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        let strings = |s: &[&str]| -> Vec<String> { s.iter().map(|s| s.to_string()).collect() };
        Self {
            dir_names: strings(&[
                ".git",
                ".hg",
                ".svn",
                "node_modules",
                "target",
                "dist",
                "build",
                ".next",
                ".cache",
                ".venv",
                "__pycache__",
                "coverage",
            ]),
            file_names: strings(&[
                ".DS_Store",
                "Thumbs.db",
                "package-lock.json",
                "yarn.lock",
                "pnpm-lock.yaml",
                "Cargo.lock",
                "poetry.lock",
            ]),
            suffixes: strings(&[".log", ".tmp", ".swp", ".pyc"]),
            patterns: strings(&[
                ".env",
                ".env.*",
                "*.key",
                "*.pem",
                "*.p12",
                "*.pfx",
                "id_rsa*",
                "id_ed25519*",
                ".npmrc",
                ".netrc",
            ]),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// The compiled exclusion rules, consumed by the enumerator.
#[derive(Debug, Clone)]
pub struct Rules {
    dir_names: Vec<String>,
    file_names: Vec<String>,
    suffixes: Vec<String>,
    patterns: PatternList,
    max_file_size: u64,
}

impl Rules {
    pub fn new(config: &RulesConfig) -> crate::Result<Self> {
        let patterns = PatternList::new(&config.patterns)
            .map_err(|err| crate::config_error!("invalid exclusion pattern: {err}"))?;
        Ok(Rules {
            dir_names: config.dir_names.clone(),
            file_names: config.file_names.clone(),
            suffixes: config.suffixes.iter().map(|s| s.to_lowercase()).collect(),
            patterns,
            max_file_size: config.max_file_size,
        })
    }

    pub fn excludes_dir(&self, name: &str) -> bool {
        self.dir_names.iter().any(|d| d == name)
    }

    pub fn excludes_file(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.file_names.iter().any(|f| f == name)
            || self.suffixes.iter().any(|s| lower.ends_with(s.as_str()))
            || self.patterns.matches(name)
    }

    /// Whether a repository path falls under the rules,
    /// either by one of its directories or by its file name.
    pub fn excludes_path(&self, path: &str) -> bool {
        let mut comps = path.split('/').collect::<Vec<_>>();
        let Some(name) = comps.pop() else {
            return false;
        };
        comps.iter().any(|d| self.excludes_dir(d)) || self.excludes_file(name)
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }
}

impl Default for Rules {
    fn default() -> Self {
        Rules::new(&RulesConfig::default()).expect("default rules are valid")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts for a call failing with a transient error.
    pub attempts: u32,
    /// Pause before the first retry, doubled each time.
    pub backoff_ms: u64,
    /// Attempts at composing a commit when the branch moved under us.
    pub ref_attempts: u32,
}

impl RetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 500,
            ref_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArchiveConfig {
    /// Path of the archive in the repository.
    pub path: String,
    /// A prebuilt archive to upload instead of packing the root.
    pub source: Option<Utf8PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_ARCHIVE_PATH.to_string(),
            source: None,
        }
    }
}

/// Everything a sync run needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub root: Utf8PathBuf,
    pub repo: RepoId,
    /// Branch to mirror into. The default branch of the repository if none.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default)]
    pub delete_removed: bool,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub fallback_per_file: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub exclude: RulesConfig,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_delay_ms() -> u64 {
    DEFAULT_BATCH_DELAY_MS
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

impl SyncConfig {
    pub fn new(root: impl Into<Utf8PathBuf>, repo: RepoId) -> Self {
        Self {
            root: root.into(),
            repo,
            branch: None,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            delete_removed: false,
            mode: SyncMode::default(),
            fallback_per_file: false,
            dry_run: false,
            message: None,
            api_url: default_api_url(),
            token_env: default_token_env(),
            retry: RetryConfig::default(),
            archive: ArchiveConfig::default(),
            exclude: RulesConfig::default(),
        }
    }

    pub async fn load_from_file(path: &Utf8Path) -> crate::Result<Self> {
        let config_json = tokio::fs::read(&path)
            .await
            .map_err(|err| crate::config_error!("Failed to read config from {path}: {err}"))?;
        let config_json = std::str::from_utf8(&config_json)
            .map_err(|err| crate::config_error!("{path} is not UTF-8: {err}"))?;
        serde_json::from_str(config_json)
            .map_err(|err| crate::config_error!("Failed to parse {path}: {err}"))
    }

    /// Rejects configurations that cannot lead to a meaningful run.
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            crate::config_bail!(
                "batch size must be within 1..={MAX_BATCH_SIZE}, got {}",
                self.batch_size
            );
        }
        if self.batch_delay_ms > MAX_BATCH_DELAY_MS {
            crate::config_bail!(
                "batch delay must be within 0..={MAX_BATCH_DELAY_MS} ms, got {}",
                self.batch_delay_ms
            );
        }
        if let Some(branch) = &self.branch {
            if !is_valid_branch(branch) {
                crate::config_bail!("invalid branch name '{branch}'");
            }
        }
        if self.retry.attempts == 0 || self.retry.ref_attempts == 0 {
            crate::config_bail!("retry attempts must be at least 1");
        }
        let archive_path = &self.archive.path;
        if archive_path.is_empty() || archive_path.starts_with('/') || archive_path.contains("..")
        {
            crate::config_bail!("invalid archive path '{archive_path}'");
        }
        if url::Url::parse(&self.api_url).is_err() {
            crate::config_bail!("invalid API url '{}'", self.api_url);
        }
        Rules::new(&self.exclude)?;
        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Subset of `git check-ref-format` rules that matter for branch names.
pub fn is_valid_branch(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.ends_with(".lock")
        && !name.ends_with('.')
        && !name.contains("..")
        && !name.contains("//")
        && !name.contains("@{")
        && !name
            .chars()
            .any(|c| {
                c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\')
            })
}
