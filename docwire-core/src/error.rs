//! Error types and result types for command-layer operations.
//!
//! Every fallible operation returns [`CommandResult<T>`]. The variants follow the
//! three places an operation can fail: locally before anything is sent
//! ([`CommandError::Validation`]), on the server ([`CommandError::Server`],
//! [`CommandError::Evaluation`]), or in the transport collaborator
//! ([`CommandError::Transport`]).

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the command layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Input rejected before dispatch: malformed collection name, malformed
    /// identifier, size-mismatched raw payload or an unrecognized call shape.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The server reported an error for the command or its verification.
    #[error("Server error: {message}")]
    Server {
        /// The server-reported message (`err`, `errmsg` or `$err`).
        message: String,
        /// The server error code, when the reply carried one.
        code: Option<i32>,
    },
    /// A server-side script failed to evaluate.
    #[error("Evaluation error: {0}")]
    Evaluation(String),
    /// The transport collaborator failed to deliver the command or its reply.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Conversion between typed values and documents failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CommandError {
    /// Creates a [`CommandError::Server`] without an error code.
    pub fn server(message: impl Into<String>) -> Self {
        CommandError::Server { message: message.into(), code: None }
    }

    /// Returns `true` if the error was raised locally, before any dispatch.
    pub fn is_validation(&self) -> bool {
        matches!(self, CommandError::Validation(_))
    }

    /// Returns `true` if the error was reported by the server.
    pub fn is_server(&self) -> bool {
        matches!(self, CommandError::Server { .. })
    }
}

/// A specialized `Result` type for command-layer operations.
pub type CommandResult<T> = Result<T, CommandError>;

impl From<BsonError> for CommandError {
    fn from(err: BsonError) -> Self {
        CommandError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for CommandError {
    fn from(err: SerdeJsonError) -> Self {
        CommandError::Serialization(err.to_string())
    }
}
