//! Discovery Error Types

use std::time::Duration;

use thiserror::Error;

/// Failure to obtain an IAM token from the minting command
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read output of `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("`{command}` printed an empty token")]
    Empty { command: String },

    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("token minting cancelled")]
    Cancelled,
}

/// Failure talking to the Compute API
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("failed to build compute client: {0}")]
    Client(String),

    #[error("compute request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("compute API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode compute response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("compute request cancelled")]
    Cancelled,
}

/// Errors surfaced by [`crate::Provider::addrs`]
#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("discover-yc: {0}")]
    Config(String),

    #[error("discover-yc: failed to obtain IAM token: {0}")]
    Token(#[from] TokenError),

    #[error("discover-yc: failed to create compute client: {0}")]
    Session(#[source] ComputeError),

    /// A page request failed. `partial` holds the addresses collected from
    /// the pages fetched before the failure; callers should discard them.
    #[error("discover-yc: failed to list instances after {} addresses: {source}", .partial.len())]
    Fetch {
        partial: Vec<String>,
        #[source]
        source: ComputeError,
    },
}

impl DiscoverError {
    /// Addresses accumulated before a page fetch failed, if any.
    pub fn partial_addrs(&self) -> Option<&[String]> {
        match self {
            DiscoverError::Fetch { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
