use std::fmt;

use crate::schema::SchemaKind;

/// Coarse classification of a [`MessageError`], used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Lookup,
    Structural,
    Input,
    External,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Lookup => "LookupError",
            ErrorKind::Structural => "StructuralError",
            ErrorKind::Input => "InputError",
            ErrorKind::External => "ExternalError",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// A document failed its schema; the message carries the schema kind prefix.
    #[error("{kind} schema: {message}")]
    Validation { kind: SchemaKind, message: String },

    #[error("no task found: {0}")]
    TaskLookup(String),

    #[error("path `{path}` matched {matches} nodes, expected exactly one")]
    PathCardinality { path: String, matches: usize },

    #[error("message is missing required field `{0}`")]
    MissingField(String),

    #[error("output mapping `{source_path}` -> `{destination}`: {message}")]
    Structural {
        source_path: String,
        destination: String,
        message: String,
    },

    #[error("invalid path expression `{path}`: {message}")]
    InvalidPath { path: String, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blob store or execution history failure, surfaced unchanged.
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl MessageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MessageError::Validation { .. } => ErrorKind::Validation,
            MessageError::TaskLookup(_)
            | MessageError::PathCardinality { .. }
            | MessageError::MissingField(_) => ErrorKind::Lookup,
            MessageError::Structural { .. } => ErrorKind::Structural,
            MessageError::InvalidPath { .. }
            | MessageError::InvalidInput(_)
            | MessageError::Json(_) => ErrorKind::Input,
            MessageError::Io(_) | MessageError::External(_) => ErrorKind::External,
        }
    }
}

pub type Result<T, E = MessageError> = std::result::Result<T, E>;
