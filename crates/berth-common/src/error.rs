//! Unified error types for the Berth workspace.
//!
//! Every failure carries an [`ErrorKind`] so callers (bindings, the CLI,
//! batch reports) can tell "the reference did not resolve" apart from
//! "the container is in the wrong state" without matching on messages.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ContainerState;

/// Classification of a [`BerthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The reference does not resolve to any object.
    NotFound,
    /// The operation is not legal in the object's current state.
    InvalidState,
    /// The request collides with an existing object (e.g. a name in use).
    Conflict,
    /// A caller-supplied argument is malformed or not accepted.
    InvalidArgument,
    /// The operation needs configuration the object does not have.
    PreconditionRequired,
    /// Unexpected failure in storage or the execution layer.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::InvalidState => "invalid state",
            Self::Conflict => "conflict",
            Self::InvalidArgument => "invalid argument",
            Self::PreconditionRequired => "precondition required",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BerthError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("no such {kind}: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Reference that failed to resolve.
        id: String,
    },

    /// A prefix matched more than one object.
    #[error("reference {reference:?} matches more than one {kind}")]
    Ambiguous {
        /// Type of the resource being resolved.
        kind: &'static str,
        /// The ambiguous reference.
        reference: String,
    },

    /// A lifecycle operation is not legal in the container's current state.
    #[error("cannot {operation} container {id}: container state is {state}")]
    InvalidState {
        /// Container identifier.
        id: String,
        /// State observed when the operation was attempted.
        state: ContainerState,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// A name is already taken by another live object.
    #[error("the {kind} name {name:?} is already in use")]
    NameInUse {
        /// Type of the resource.
        kind: &'static str,
        /// The conflicting name.
        name: String,
    },

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },

    /// The operation requires configuration the target lacks.
    #[error("precondition required: {message}")]
    PreconditionRequired {
        /// Description of the missing precondition.
        message: String,
    },

    /// The execution layer failed.
    #[error("runtime error: {message}")]
    Runtime {
        /// Description of the failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BerthError {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::NameInUse { .. } => ErrorKind::Conflict,
            Self::Config { .. } | Self::Ambiguous { .. } | Self::InvalidArgument { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::PreconditionRequired { .. } => ErrorKind::PreconditionRequired,
            Self::Io { .. } | Self::Runtime { .. } | Self::Serialization { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Shorthand for a missing container.
    #[must_use]
    pub fn container_not_found(reference: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "container",
            id: reference.into(),
        }
    }

    /// Shorthand for an invalid argument.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for an execution-layer failure.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Returns true when the error is a [`ErrorKind::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BerthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_names_operation_and_state() {
        let err = BerthError::InvalidState {
            id: "abc".into(),
            state: ContainerState::Paused,
            operation: "stop",
        };
        assert_eq!(
            err.to_string(),
            "cannot stop container abc: container state is paused"
        );
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn ambiguous_reference_is_an_invalid_argument() {
        let err = BerthError::Ambiguous {
            kind: "container",
            reference: "ab".into(),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn not_found_helpers() {
        let err = BerthError::container_not_found("foobar");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no such container: foobar");
    }

    #[test]
    fn io_errors_are_internal() {
        let err = BerthError::Io {
            path: "/tmp/x".into(),
            source: std::io::Error::other("boom"),
        };
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
