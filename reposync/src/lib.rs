//! Shared vocabulary of reposync: errors, configuration,
//! the data model of a sync run and the pure parts of the engine.

pub mod config;
pub mod diff;
pub mod error;
pub mod hash;
pub mod loc;

mod model;

pub use crate::config::{RepoId, Rules, SyncConfig};
pub use crate::error::{Error, Result};
pub use crate::model::*;
