//! Batched blob upload.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures::future;
use reposync::{config::RetryConfig, FileFailure, LocalFile, UploadedBlob};

use crate::{
    remote::{CreateBlob, Encoding},
    retry::with_retry,
    SyncSession,
};

#[derive(Debug, Clone)]
pub struct Pacing {
    pub batch_size: usize,
    pub delay: Duration,
}

/// What came out of an upload, file by file.
#[derive(Debug, Clone, Default)]
pub struct UploadOutcome {
    pub uploaded: Vec<UploadedBlob>,
    pub failures: Vec<FileFailure>,
    /// Pauses observed between batches
    pub pauses: usize,
}

/// Picks the transport encoding of a file.
/// Text that is not valid UTF-8 goes as base64 as well.
pub fn encoding_of(file: &LocalFile) -> Encoding {
    if file.is_binary() || std::str::from_utf8(file.content()).is_err() {
        Encoding::Base64
    } else {
        Encoding::Utf8
    }
}

async fn upload_one<R>(
    remote: &R,
    file: &LocalFile,
    retry: &RetryConfig,
) -> reposync::Result<UploadedBlob>
where
    R: CreateBlob,
{
    let encoding = encoding_of(file);
    let sha = with_retry(retry, file.path(), || {
        remote.create_blob(file.content(), encoding)
    })
    .await?;

    let local = file.blob_hash();
    if sha != local {
        log::warn!(
            "{}: remote computed blob {sha}, expected {local}. Using the remote one.",
            file.path()
        );
    }
    Ok(UploadedBlob {
        path: file.path().to_owned(),
        blob_hash: sha,
        mode: file.mode(),
    })
}

/// Creates a blob for every file, `pacing.batch_size` at a time.
///
/// Every call of a batch settles before the pause and the next batch.
/// A failing file is recorded and does not stop the others.
/// A fatal error stops the upload once its batch has settled,
/// and so does cancellation.
pub async fn upload_blobs<R>(
    remote: &R,
    files: &[&LocalFile],
    pacing: &Pacing,
    retry: &RetryConfig,
    session: &SyncSession,
) -> reposync::Result<UploadOutcome>
where
    R: CreateBlob,
{
    let total = files.len();
    let done = AtomicUsize::new(0);
    let mut outcome = UploadOutcome::default();

    for (idx, batch) in files.chunks(pacing.batch_size.max(1)).enumerate() {
        if idx > 0 {
            outcome.pauses += 1;
            if !pacing.delay.is_zero() {
                tokio::time::sleep(pacing.delay).await;
            }
        }
        session.check_cancelled()?;
        log::debug!("uploading batch {} ({} files)", idx + 1, batch.len());

        let results = future::join_all(batch.iter().map(|file| {
            let done = &done;
            async move {
                let res = upload_one(remote, file, retry).await;
                let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                session.progress(current, total, file.path());
                (file.path(), res)
            }
        }))
        .await;

        let mut fatal = None;
        for (path, res) in results {
            match res {
                Ok(blob) => outcome.uploaded.push(blob),
                Err(err) => {
                    log::warn!("failed to upload {path}: {err}");
                    if err.is_fatal() && fatal.is_none() {
                        fatal = Some(err.clone());
                    }
                    outcome.failures.push(FileFailure {
                        path: path.to_owned(),
                        error: err,
                    });
                }
            }
        }
        if let Some(err) = fatal {
            log::error!("aborting upload: {err}");
            return Err(err);
        }
    }

    log::info!(
        "uploaded {}/{} blobs in {} batches",
        outcome.uploaded.len(),
        total,
        outcome.pauses + usize::from(total > 0)
    );
    Ok(outcome)
}
