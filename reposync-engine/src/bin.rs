use std::process::ExitCode;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use reposync::{loc::user, Phase, RepoId, SyncConfig, SyncMode, SyncReport};
use reposync_engine::{ProgressSink, SyncSession};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "reposync")]
#[command(author, version, about, long_about=None)]
struct Cli {
    /// Directory to mirror. Overrides the configuration file.
    root: Option<Utf8PathBuf>,

    /// Target repository, as owner/name
    #[arg(short, long)]
    repo: Option<RepoId>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<Utf8PathBuf>,

    /// Target branch. The default branch of the repository if not given.
    #[arg(short, long)]
    branch: Option<String>,

    /// Blob uploads per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Pause between batches, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Delete remote files that no longer exist locally
    #[arg(long)]
    delete: bool,

    /// Upload the whole project as a single archive
    #[arg(long, conflicts_with = "per_file")]
    archive: bool,

    /// Commit every file on its own (not atomic)
    #[arg(long)]
    per_file: bool,

    /// Commit file by file if the atomic commit fails
    #[arg(long)]
    fallback_per_file: bool,

    /// Compute what would be done and stop
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Commit message
    #[arg(short, long)]
    message: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

struct Console {
    quiet: bool,
}

impl ProgressSink for Console {
    fn progress(&self, current: usize, total: usize, path: &str) {
        if !self.quiet {
            eprintln!("[{current}/{total}] {path}");
        }
    }

    fn phase(&self, phase: Phase) {
        if !self.quiet && !phase.is_terminal() {
            eprintln!("{phase}...");
        }
    }
}

async fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let config_file = match &cli.config {
        Some(path) => Some(path.clone()),
        None => {
            let path = user::config_file()?;
            path.exists().then_some(path)
        }
    };

    let mut config = match (config_file, &cli.root, &cli.repo) {
        (_, Some(root), Some(repo)) if cli.config.is_none() => {
            SyncConfig::new(root.clone(), repo.clone())
        }
        (Some(path), _, _) => {
            log::info!("Found config file: {path}");
            SyncConfig::load_from_file(&path).await?
        }
        (None, _, _) => anyhow::bail!(
            "No configuration: give a directory and --repo, or a config file with --config"
        ),
    };

    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(repo) = &cli.repo {
        config.repo = repo.clone();
    }
    if let Some(branch) = &cli.branch {
        config.branch = Some(branch.clone());
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(delay_ms) = cli.delay_ms {
        config.batch_delay_ms = delay_ms;
    }
    if let Some(message) = &cli.message {
        config.message = Some(message.clone());
    }
    config.delete_removed |= cli.delete;
    config.fallback_per_file |= cli.fallback_per_file;
    config.dry_run |= cli.dry_run;
    if cli.archive {
        config.mode = SyncMode::Archive;
    } else if cli.per_file {
        config.mode = SyncMode::PerFile;
    }

    log::trace!("Loaded config: {config:?}");
    config.validate()?;
    Ok(config)
}

async fn run(cli: &Cli, cancel: CancellationToken) -> anyhow::Result<SyncReport> {
    let config = load_config(cli).await.context("Invalid configuration")?;
    let mut session =
        SyncSession::with_progress(Console { quiet: cli.json }).with_cancel_token(cancel);
    let report = reposync_engine::sync(config, &mut session).await?;
    Ok(report)
}

fn handle_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("received interrupt, stopping before the next step");
            cancel.cancel();
        }
    });
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Cannot start the runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        handle_interrupt(cancel.clone());

        match run(&cli, cancel).await {
            Ok(report) => {
                if cli.json {
                    match serde_json::to_string_pretty(&report) {
                        Ok(json) => println!("{json}"),
                        Err(err) => log::error!("Cannot serialize the report: {err}"),
                    }
                } else {
                    println!("{report}");
                }
                if report.failures.is_empty() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(err) => {
                log::error!("{err:#}");
                eprintln!("Error: {err:#}");
                ExitCode::FAILURE
            }
        }
    })
}
