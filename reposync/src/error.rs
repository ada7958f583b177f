use std::{error, fmt, io};

use camino::FromPathBufError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The error type of every sync operation.
///
/// Variants follow how the orchestrator reacts to them:
/// fatal errors abort the run before any commit, retryable errors are
/// attempted again with fresh state, anything else on a single file
/// is recorded against that file only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Error {
    Config(String),
    Io(String),
    Auth(String),
    NotFound(String),
    RateLimited {
        message: String,
        reset: Option<DateTime<Utc>>,
    },
    Conflict(String),
    Transient(String),
    Api(String),
    Cancelled,
    Bug(String),
    Other(String),
}

impl Error {
    /// Errors after which no commit must be attempted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(..)
                | Self::Auth(..)
                | Self::NotFound(..)
                | Self::RateLimited { .. }
                | Self::Cancelled
        )
    }

    /// Errors worth the same call again after a pause.
    /// Conflicts are not in this set: they need fresh remote state first.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(..))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(..))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Auth(msg) => write!(f, "Authorization error: {msg}"),
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::RateLimited {
                message,
                reset: Some(reset),
            } => write!(f, "Rate limited until {reset}: {message}"),
            Self::RateLimited {
                message,
                reset: None,
            } => write!(f, "Rate limited: {message}"),
            Self::Conflict(msg) => write!(f, "Conflict: {msg}"),
            Self::Transient(msg) => write!(f, "Transient error: {msg}"),
            Self::Api(msg) => write!(f, "API error: {msg}"),
            Self::Cancelled => f.write_str("Sync cancelled"),
            Self::Bug(msg) => write!(f, "reposync bug error: {msg}"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl error::Error for Error {}

impl From<FromPathBufError> for Error {
    fn from(value: FromPathBufError) -> Self {
        Self::Io(format!(
            "Non UTF-8 path: {}",
            value.as_path().as_os_str().to_string_lossy()
        ))
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(format!("{value:#}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! config_bail {
    ($($t:tt)*) => {
        return ::core::result::Result::Err($crate::Error::Config(format!($($t)*)));
    };
}

#[macro_export]
macro_rules! api_bail {
    ($($t:tt)*) => {
        return ::core::result::Result::Err($crate::Error::Api(format!($($t)*)));
    };
}

#[macro_export]
macro_rules! config_error {
    ($($t:tt)*) => {
        $crate::Error::Config(format!($($t)*))
    };
}

#[macro_export]
macro_rules! io_error {
    ($($t:tt)*) => {
        $crate::Error::Io(format!($($t)*))
    };
}

#[macro_export]
macro_rules! api_error {
    ($($t:tt)*) => {
        $crate::Error::Api(format!($($t)*))
    };
}

#[macro_export]
macro_rules! conflict_error {
    ($($t:tt)*) => {
        $crate::Error::Conflict(format!($($t)*))
    };
}

#[macro_export]
macro_rules! transient_error {
    ($($t:tt)*) => {
        $crate::Error::Transient(format!($($t)*))
    };
}
