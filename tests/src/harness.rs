#![allow(dead_code)]

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use reposync::{SyncConfig, SyncReport};
use reposync_engine::{Service, SyncSession};

use crate::{stubs::remote::Stub, utils};

pub const BRANCH: &str = "main";

/// A local directory and the stub repository it is synchronized with.
pub struct Harness {
    pub root: Utf8PathBuf,
    pub remote: Stub,
    pub config: SyncConfig,
}

impl Harness {
    pub fn service(&self) -> Service<Stub> {
        Service::new(self.remote.clone(), self.config.clone()).expect("valid config")
    }

    pub async fn sync(&self) -> reposync::Result<SyncReport> {
        self.sync_with(&mut SyncSession::new()).await
    }

    pub async fn sync_with(&self, session: &mut SyncSession) -> reposync::Result<SyncReport> {
        self.service().sync(session).await
    }

    pub async fn write(&self, path: &str, content: &str) {
        utils::write_file(&self.root, path, content.as_bytes())
            .await
            .unwrap();
    }

    pub async fn remove(&self, path: &str) {
        tokio::fs::remove_file(self.root.join(path)).await.unwrap();
    }

    pub fn remote_files(&self) -> BTreeMap<String, String> {
        self.remote
            .files(BRANCH)
            .into_iter()
            .map(|(path, content)| (path, String::from_utf8_lossy(&content).into_owned()))
            .collect()
    }

    pub fn remote_paths(&self) -> Vec<String> {
        self.remote.files(BRANCH).into_keys().collect()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}
