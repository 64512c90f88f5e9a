//! Error types for the Notifi client.

use crate::models::{Categories, Role};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
/// Error type for all Notifi client operations.
pub enum Error {
    /// The API rejected a publication.
    #[error("could not send message to categories '{categories}', please try again later (HTTP {status})")]
    FailedToSendMessage {
        categories: Categories,
        status: StatusCode,
    },
    /// The API rejected a poll for pending messages.
    #[error("could not receive messages from the API, please try again later (HTTP {status})")]
    FailedToReceiveMessage { status: StatusCode },
    /// The API rejected a confirmation.
    #[error("could not set confirmation status on message {id}, please try again later (HTTP {status})")]
    FailedToConfirmMessage { id: i64, status: StatusCode },
    /// The client ID and secret are not known to the API.
    #[error(
        "the specified client ID and secret do not match a valid {role}; check your keys and try again \
         (manage them at {manage_url})"
    )]
    InvalidCredentials { role: Role, manage_url: String },
    /// Underlying HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// A success response carried a body that could not be understood.
    #[error("parse error: {0}")]
    Parse(String),
    /// A configuration value could not be used.
    #[error("config error: {0}")]
    Config(String),
    /// A poll handler failed and stopped the poll loop.
    #[error("handler error: {0}")]
    Handler(Box<dyn std::error::Error + Send + Sync>),
    /// A background poll task panicked or was aborted.
    #[error("poll task error: {0}")]
    Task(String),
}

impl Error {
    /// Whether repeating the same call may succeed.
    ///
    /// Bad credentials are a configuration problem and never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::FailedToSendMessage { .. }
                | Error::FailedToReceiveMessage { .. }
                | Error::FailedToConfirmMessage { .. }
                | Error::Http(_)
        )
    }

    /// HTTP status returned by the API, for the failures that carry one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::FailedToSendMessage { status, .. }
            | Error::FailedToReceiveMessage { status }
            | Error::FailedToConfirmMessage { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for Notifi client operations.
pub type Result<T> = std::result::Result<T, Error>;
