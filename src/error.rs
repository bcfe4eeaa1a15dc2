//! Error types shared by the puppet session and its Matrix implementation.
//!
//! Every fallible operation returns a [`PuppetError`]. Join failures are further
//! sorted by [`classify_join_error`] so that the one known unrecoverable server
//! condition can be told apart from everything else.

use log::trace;
use matrix_sdk::ruma::api::client::error::{Error as ClientApiError, ErrorBody, StandardErrorBody};
use thiserror::Error;

/// Message returned by Synapse when a room can not be joined because no server
/// in it is still reachable (typically a room every member has left).
pub const NO_KNOWN_SERVERS: &str = "No known servers";

/// Errors raised by the puppet.
#[derive(Debug, Error)]
pub enum PuppetError {
    /// The configuration holds no `puppet` record yet.
    #[error("no puppet credentials configured, run the associate command first")]
    MissingCredentials,

    /// A room id, alias or user id could not be parsed.
    #[error("invalid identifier {0}")]
    InvalidIdentifier(String),

    /// The homeserver answered with an error.
    #[error("[{status} / {errcode}] {message}")]
    Api {
        /// HTTP status code of the response
        status: u16,
        /// Matrix error code, `M_UNKNOWN` when the body is not a standard error
        errcode: String,
        /// Human readable message of the server
        message: String,
    },

    /// The homeserver could not be reached or answered garbage.
    #[error("transport error: {0}")]
    Transport(String),

    /// The sync stream stopped before the initial sync completed.
    #[error("sync stopped before the initial sync completed")]
    SyncAborted,

    /// The access token is not bound to any device.
    #[error("access token is not bound to a device")]
    MissingDevice,

    /// The persisted configuration is not a JSON object.
    #[error("configuration store does not hold a JSON object")]
    InvalidConfigStore,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<matrix_sdk::Error> for PuppetError {
    fn from(error: matrix_sdk::Error) -> Self {
        match error.as_client_api_error() {
            Some(api_error) => PuppetError::from_api_error(api_error),
            None => PuppetError::Transport(error.to_string()),
        }
    }
}

impl From<matrix_sdk::HttpError> for PuppetError {
    fn from(error: matrix_sdk::HttpError) -> Self {
        match error.as_client_api_error() {
            Some(api_error) => PuppetError::from_api_error(api_error),
            None => PuppetError::Transport(error.to_string()),
        }
    }
}

impl PuppetError {
    /// Keeps the status, error code and message of a server error apart.
    fn from_api_error(error: &ClientApiError) -> Self {
        let status = error.status_code.as_u16();

        match &error.body {
            ErrorBody::Standard(StandardErrorBody { kind, message, .. }) => PuppetError::Api {
                status,
                errcode: kind.errcode().to_string(),
                message: message.clone(),
            },
            _ => PuppetError::Api {
                status,
                errcode: "M_UNKNOWN".to_owned(),
                message: error.to_string(),
            },
        }
    }
}

impl From<matrix_sdk::ClientBuildError> for PuppetError {
    fn from(error: matrix_sdk::ClientBuildError) -> Self {
        PuppetError::Transport(error.to_string())
    }
}

/// Outcome class of a failed join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinErrorKind {
    /// Transient failure, a later attempt may succeed.
    Recoverable,
    /// The room id is dead, a new room has to be created and re-aliased.
    NeedsRealias,
    /// Anything else.
    Other,
}

/// Sorts a join failure into a [`JoinErrorKind`].
///
/// Only a server error whose message is exactly [`NO_KNOWN_SERVERS`] needs a
/// new room, whatever its status and error code.
///
/// # Arguments
///
/// * `error` - The error returned by the join request
///
/// # Returns
///
/// The [`JoinErrorKind`] of the failure.
///
/// # Examples
///
/// ```ignore
/// let error = PuppetError::Api {
///     status: 404,
///     errcode: "M_UNKNOWN".to_owned(),
///     message: "No known servers".to_owned(),
/// };
/// assert_eq!(classify_join_error(&error), JoinErrorKind::NeedsRealias);
/// ```
pub fn classify_join_error(error: &PuppetError) -> JoinErrorKind {
    let kind = match error {
        PuppetError::Api { message, .. } if message == NO_KNOWN_SERVERS => {
            JoinErrorKind::NeedsRealias
        }
        PuppetError::Transport(_) | PuppetError::Http(_) | PuppetError::Io(_) => {
            JoinErrorKind::Recoverable
        }
        _ => JoinErrorKind::Other,
    };

    trace!("join error {} classified as {:?}", error, kind);
    kind
}
