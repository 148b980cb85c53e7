//! Error taxonomy for the collection pipeline
//!
//! Startup failures abort the run before any task is spawned. Everything
//! raised while streaming is isolated to the line or sample that caused it.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("failed to start helper {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("helper {0} pipe was not captured")]
    MissingPipe(&'static str),
    #[error("helper {0} exited before its pid could be read")]
    ExitedEarly(String),
    #[error("failed to send host list to helper: {0}")]
    HostList(#[source] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("helper line longer than {limit} bytes, skipped")]
    LineTooLong { limit: u64 },
    #[error("unable to unmarshal json: {line}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("report line from {host} has no column {index} for {metric}: {body:?}")]
    MissingColumn {
        host: String,
        metric: &'static str,
        index: usize,
        body: String,
    },
    #[error("malformed idle value {token:?} from {host}")]
    MalformedIdle {
        host: String,
        token: String,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("host name {0:?} cannot be used as a directory name")]
    InvalidHost(String),
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CollectorError {
    /// Fatal errors stop the run; the rest are logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CollectorError::Spawn { .. }
                | CollectorError::MissingPipe(_)
                | CollectorError::ExitedEarly(_)
                | CollectorError::HostList(_)
                | CollectorError::Config(_)
        )
    }
}

pub type Result<T, E = CollectorError> = std::result::Result<T, E>;
