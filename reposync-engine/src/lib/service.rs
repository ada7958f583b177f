use std::{collections::BTreeSet, time::Duration};

use reposync::{
    diff, CommitResult, FileMode, LocalFile, Phase, RemoteTree, Rules, SyncConfig, SyncMode,
    SyncPlan, SyncReport,
};

use crate::{
    archive,
    compose::{self, Changes},
    deletion::{self, Deletions},
    local,
    per_file::{self, PerFileOutcome},
    reader::{self, Target},
    remote::{
        github::{GitHub, Token},
        Remote,
    },
    retry::with_retry,
    upload::{self, Pacing},
    SyncSession,
};

/// Everything a run learned before writing anything.
struct Prepared {
    files: Vec<LocalFile>,
    target: Target,
    snapshot: RemoteTree,
    deletions: Deletions,
    plan: SyncPlan,
}

impl Prepared {
    fn to_upload(&self) -> Vec<&LocalFile> {
        let wanted: BTreeSet<&str> = self.plan.files_to_upload.iter().map(String::as_str).collect();
        self.files
            .iter()
            .filter(|f| wanted.contains(f.path()))
            .collect()
    }
}

/// Synchronizes one directory with one branch.
#[derive(Debug, Clone)]
pub struct Service<R> {
    remote: R,
    config: SyncConfig,
    rules: Rules,
}

impl<R> Service<R>
where
    R: Remote,
{
    pub fn new(remote: R, config: SyncConfig) -> reposync::Result<Self> {
        config.validate()?;
        let rules = Rules::new(&config.exclude)?;
        Ok(Service {
            remote,
            config,
            rules,
        })
    }

    fn pacing(&self) -> Pacing {
        Pacing {
            batch_size: self.config.batch_size,
            delay: self.config.batch_delay(),
        }
    }

    fn message(&self, uploaded: usize, deleted: usize) -> String {
        match &self.config.message {
            Some(message) => message.clone(),
            None => compose::default_message(uploaded, deleted, chrono::Utc::now()),
        }
    }

    /// Runs one sync. The session ends in [`Phase::Done`] or [`Phase::Failed`].
    pub async fn sync(&self, session: &mut SyncSession) -> reposync::Result<SyncReport> {
        log::info!(
            "syncing {} to {} ({} mode{})",
            self.config.root,
            self.config.repo,
            self.config.mode,
            if self.config.dry_run { ", dry run" } else { "" }
        );
        let res = match self.config.mode {
            SyncMode::Incremental => self.incremental(session).await,
            SyncMode::Archive => self.archive(session).await,
            SyncMode::PerFile => self.per_file(session).await,
        };
        match res {
            Ok(report) => {
                session.enter(Phase::Done);
                match report.commit_url() {
                    Some(url) => log::info!(
                        "uploaded {}/{} files, deleted {}: {url}",
                        report.uploaded_count,
                        report.total_planned,
                        report.deleted_count
                    ),
                    None => log::info!(
                        "no commit: {}",
                        report.no_commit_reason.as_deref().unwrap_or("unknown")
                    ),
                }
                Ok(report)
            }
            Err(err) => {
                log::error!("sync failed during {}: {err}", session.phase());
                session.enter(Phase::Failed);
                Err(err)
            }
        }
    }

    async fn prepare(&self, session: &mut SyncSession) -> reposync::Result<Prepared> {
        session.check_cancelled()?;
        session.enter(Phase::Enumerating);
        let local::Enumeration { files, skipped } =
            local::enumerate(&self.config.root, &self.rules).await?;

        session.check_cancelled()?;
        session.enter(Phase::ReadingRemote);
        let target = reader::resolve_target(&self.remote, &self.config).await?;
        let snapshot = reader::read_remote(&self.remote, &target.branch, &self.config.retry).await?;

        session.enter(Phase::Diffing);
        let diff = diff::diff(&files, &snapshot);
        let deletions = deletion::select(
            &diff,
            &snapshot,
            &self.rules,
            &skipped,
            self.config.delete_removed,
        );
        let plan = diff::plan(&diff, &snapshot, deletions.paths());
        log::info!(
            "{} new, {} changed, {} unchanged, {} to delete",
            diff.new.len(),
            diff.changed.len(),
            diff.unchanged.len(),
            plan.files_to_delete.len()
        );

        Ok(Prepared {
            files,
            target,
            snapshot,
            deletions,
            plan,
        })
    }

    fn report(&self, prepared: &Prepared) -> SyncReport {
        let unchanged = prepared.files.len() - prepared.plan.files_to_upload.len();
        SyncReport {
            mode: self.config.mode,
            total_planned: prepared.plan.files_to_upload.len(),
            skipped_unchanged: unchanged,
            dry_run: self.config.dry_run,
            ..Default::default()
        }
    }

    /// Settles the runs that end before uploading anything.
    fn early_end(&self, prepared: &Prepared, report: &mut SyncReport) -> bool {
        if self.config.dry_run {
            report.deleted_count = prepared.plan.files_to_delete.len();
            report.deleted_paths = prepared.plan.files_to_delete.clone();
            report.no_commit_reason = Some("dry run".into());
            return true;
        }
        if prepared.plan.files_to_upload.is_empty() && prepared.plan.files_to_delete.is_empty() {
            report.no_commit_reason = Some("everything is up to date".into());
            return true;
        }
        false
    }

    /// Writes the first file of the plan through the contents endpoint,
    /// the only one that accepts a repository without any commit,
    /// then reads the branch it created.
    async fn seed(
        &self,
        prepared: &mut Prepared,
        session: &SyncSession,
    ) -> reposync::Result<CommitResult> {
        let to_upload = prepared.to_upload();
        let Some(file) = to_upload
            .iter()
            .find(|f| f.mode() == FileMode::Regular)
            .or(to_upload.first())
            .copied()
        else {
            return Err(reposync::Error::Bug("nothing to seed an empty repository with".into()));
        };
        let path = file.path().to_owned();
        let branch = &prepared.target.branch;
        log::info!(
            "{} is empty, creating its first commit with {path}",
            prepared.target.repo.full_name
        );

        let message = self.message(1, 0);
        let retry = &self.config.retry;
        let commit = with_retry(retry, &path, || {
            self.remote
                .put_contents(branch, &path, file.content(), None, &message)
        })
        .await?;
        session.progress(1, prepared.plan.files_to_upload.len(), &path);

        prepared.snapshot = reader::read_remote(&self.remote, branch, retry).await?;
        prepared.plan.files_to_upload.retain(|p| *p != path);
        prepared.plan.base_tree_hash = prepared.snapshot.head.tree.clone();
        prepared.plan.parent_commit_hash = prepared.snapshot.head.commit.clone();
        Ok(commit)
    }

    async fn incremental(&self, session: &mut SyncSession) -> reposync::Result<SyncReport> {
        let mut prepared = self.prepare(session).await?;
        let mut report = self.report(&prepared);
        if self.early_end(&prepared, &mut report) {
            return Ok(report);
        }

        session.check_cancelled()?;
        session.enter(Phase::Uploading);
        let seeded = if prepared.snapshot.head.empty_repository {
            Some(self.seed(&mut prepared, session).await?)
        } else {
            None
        };

        let to_upload = prepared.to_upload();
        let uploads = upload::upload_blobs(
            &self.remote,
            &to_upload,
            &self.pacing(),
            &self.config.retry,
            session,
        )
        .await?;
        report.uploaded_count = uploads.uploaded.len() + usize::from(seeded.is_some());
        report.failures = uploads.failures;

        let mut changes = Changes {
            overlays: &uploads.uploaded,
            removals: prepared.deletions.removals.clone(),
        };
        if changes.is_empty() {
            match seeded {
                Some(commit) => report.commit = Some(commit),
                None => report.no_commit_reason = Some("no file could be uploaded".into()),
            }
            return Ok(report);
        }

        session.check_cancelled()?;
        session.enter(Phase::Composing);
        let message = self.message(changes.overlays.len(), changes.removals.len());
        let res = compose::compose(
            &self.remote,
            &prepared.target.branch,
            &prepared.snapshot.head,
            &mut changes,
            &message,
            &self.config.retry,
            session,
        )
        .await;

        match res {
            Ok(commit) => {
                report.deleted_paths = changes.removals.iter().map(|r| r.path.clone()).collect();
                report.deleted_count = report.deleted_paths.len();
                report.commit = Some(commit);
                Ok(report)
            }
            Err(err) if self.config.fallback_per_file && !err.is_fatal() && !err.is_conflict() => {
                log::warn!("atomic commit failed ({err}), falling back to one commit per file");
                let outcome = self.commit_per_file(&prepared, session).await?;
                Ok(self.degraded_report(report, outcome))
            }
            Err(err) => Err(err),
        }
    }

    async fn per_file(&self, session: &mut SyncSession) -> reposync::Result<SyncReport> {
        let prepared = self.prepare(session).await?;
        let mut report = self.report(&prepared);
        report.degraded = true;
        if self.early_end(&prepared, &mut report) {
            return Ok(report);
        }

        session.check_cancelled()?;
        session.enter(Phase::Uploading);
        let outcome = self.commit_per_file(&prepared, session).await?;
        Ok(self.degraded_report(report, outcome))
    }

    async fn commit_per_file(
        &self,
        prepared: &Prepared,
        session: &SyncSession,
    ) -> reposync::Result<PerFileOutcome> {
        per_file::sync_per_file(
            &self.remote,
            &prepared.target.branch,
            &prepared.to_upload(),
            &prepared.deletions.removals,
            &prepared.snapshot,
            self.config.message.as_deref(),
            &self.pacing(),
            &self.config.retry,
            session,
        )
        .await
    }

    fn degraded_report(&self, mut report: SyncReport, outcome: PerFileOutcome) -> SyncReport {
        report.degraded = true;
        report.uploaded_count = outcome.uploaded.len();
        report.deleted_count = outcome.deleted.len();
        report.deleted_paths = outcome.deleted;
        report.failures = outcome.failures;
        if outcome.last_commit.is_none() {
            report.no_commit_reason = Some("no file could be committed".into());
        }
        report.commit = outcome.last_commit;
        report
    }

    async fn archive(&self, session: &mut SyncSession) -> reposync::Result<SyncReport> {
        session.check_cancelled()?;
        session.enter(Phase::Enumerating);
        let blob = archive::build(&self.config.root, &self.rules, &self.config.archive).await?;

        session.check_cancelled()?;
        session.enter(Phase::ReadingRemote);
        let target = reader::resolve_target(&self.remote, &self.config).await?;
        let head = reader::resolve_head(&self.remote, &target.branch, &self.config.retry).await?;

        let mut report = SyncReport {
            mode: SyncMode::Archive,
            total_planned: 1,
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        if self.config.dry_run {
            report.no_commit_reason = Some("dry run".into());
            return Ok(report);
        }

        session.check_cancelled()?;
        session.enter(Phase::Uploading);
        if head.empty_repository {
            log::info!("{} is empty, committing the archive on its own", target.repo.full_name);
            let message = self.message(1, 0);
            let commit = with_retry(&self.config.retry, blob.path(), || {
                self.remote
                    .put_contents(&target.branch, blob.path(), blob.content(), None, &message)
            })
            .await?;
            session.progress(1, 1, blob.path());
            report.uploaded_count = 1;
            report.commit = Some(commit);
            return Ok(report);
        }
        let pacing = Pacing {
            batch_size: 1,
            delay: Duration::ZERO,
        };
        let uploads = upload::upload_blobs(
            &self.remote,
            &[&blob],
            &pacing,
            &self.config.retry,
            session,
        )
        .await?;
        report.uploaded_count = uploads.uploaded.len();
        report.failures = uploads.failures;
        if uploads.uploaded.is_empty() {
            report.no_commit_reason = Some("the archive could not be uploaded".into());
            return Ok(report);
        }

        session.check_cancelled()?;
        session.enter(Phase::Composing);
        let message = self.message(1, 0);
        let mut changes = Changes {
            overlays: &uploads.uploaded,
            removals: Vec::new(),
        };
        let commit = compose::compose(
            &self.remote,
            &target.branch,
            &head,
            &mut changes,
            &message,
            &self.config.retry,
            session,
        )
        .await?;
        report.commit = Some(commit);
        Ok(report)
    }
}

/// Synchronizes `config.root` with GitHub, reading the token from
/// the environment variable named by `config.token_env`.
pub async fn sync(config: SyncConfig, session: &mut SyncSession) -> reposync::Result<SyncReport> {
    let token = std::env::var(&config.token_env).map_err(|_| {
        reposync::config_error!("the token variable {} is not set", config.token_env)
    })?;
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(crate::error::transport)?;
    let remote = GitHub::new(client, &config.api_url, config.repo.clone(), Token::new(token))?;
    let service = Service::new(remote, config)?;
    service.sync(session).await
}
