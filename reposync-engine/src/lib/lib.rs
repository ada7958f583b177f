pub mod archive;
pub mod compose;
pub mod deletion;
pub mod local;
pub mod per_file;
pub mod reader;
pub mod remote;
pub mod retry;
pub mod service;
pub mod session;
pub mod upload;

pub use service::{sync, Service};
pub use session::{ProgressSink, SyncSession};

pub mod error {
    use std::fmt;

    /// Maps a failure to reach the remote at all.
    /// Every such failure is worth another attempt.
    pub fn transport(err: reqwest::Error) -> reposync::Error {
        if err.is_builder() {
            return reposync::Error::Bug(format!("invalid request: {err}"));
        }
        reposync::Error::Transient(err.to_string())
    }

    /// Maps a response the remote sent but we could not make sense of.
    pub fn api<E: fmt::Display>(err: E) -> reposync::Error {
        reposync::Error::Api(err.to_string())
    }
}
