#![cfg(test)]

use std::sync::Once;

use dataset::Dataset;
use reposync::SyncConfig;

mod dataset;
mod harness;
mod utils;
mod stubs {
    pub mod remote;
}
mod tests;

use harness::Harness;
use stubs::remote::Stub;

static LOG_INIT: Once = Once::new();

async fn harness(dataset: Dataset) -> Harness {
    LOG_INIT.call_once(env_logger::init);

    let root = utils::temp_path(Some("reposync"), None);
    dataset.create(&root).await.unwrap();

    let mut config = SyncConfig::new(root.clone(), "octo/site".parse().unwrap());
    config.batch_delay_ms = 0;
    config.retry.backoff_ms = 1;

    Harness {
        root,
        remote: Stub::new(),
        config,
    }
}
