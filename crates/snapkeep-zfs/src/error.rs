//! Error type for ZFS command-line operations

use thiserror::Error;

/// Error type for ZFS shell-out operations
#[derive(Debug, Error)]
pub enum ZfsError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{command} produced non-UTF-8 output")]
    InvalidOutput { command: String },
}

pub type ZfsResult<T> = Result<T, ZfsError>;
