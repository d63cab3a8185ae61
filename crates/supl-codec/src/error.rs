use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or compiling grammar files.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read grammar file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse grammar file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("no grammar files matching '{prefix}-*' in {dir}")]
    NoFiles { dir: PathBuf, prefix: String },

    #[error("type '{0}' is defined more than once")]
    DuplicateType(String),

    #[error("type '{referenced}' referenced from '{from}' is not defined")]
    UnresolvedReference { from: String, referenced: String },

    #[error("invalid definition of '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// Malformed input handed to [`crate::MessageCodec::decode`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("input truncated at bit {at}")]
    Truncated { at: usize },

    #[error("invalid encoding at '{path}': {reason}")]
    Invalid { path: String, reason: String },

    #[error("unsupported encoding at '{path}': {reason}")]
    Unsupported { path: String, reason: String },
}

impl DecodeError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: String::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            path: String::new(),
            reason: reason.into(),
        }
    }

    /// Prefix the error path with the enclosing field or variant name.
    pub(crate) fn within(self, segment: &str) -> Self {
        match self {
            Self::Invalid { path, reason } => Self::Invalid {
                path: join(segment, &path),
                reason,
            },
            Self::Unsupported { path, reason } => Self::Unsupported {
                path: join(segment, &path),
                reason,
            },
            other => other,
        }
    }
}

/// A value that cannot be encoded against its schema type.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("type mismatch at '{path}': expected {expected}")]
    Mismatch { path: String, expected: String },

    #[error("constraint violated at '{path}': {reason}")]
    Constraint { path: String, reason: String },

    #[error("unsupported value at '{path}': {reason}")]
    Unsupported { path: String, reason: String },
}

impl EncodeError {
    pub(crate) fn mismatch(expected: impl Into<String>) -> Self {
        Self::Mismatch {
            path: String::new(),
            expected: expected.into(),
        }
    }

    pub(crate) fn constraint(reason: impl Into<String>) -> Self {
        Self::Constraint {
            path: String::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            path: String::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn within(self, segment: &str) -> Self {
        match self {
            Self::Mismatch { path, expected } => Self::Mismatch {
                path: join(segment, &path),
                expected,
            },
            Self::Constraint { path, reason } => Self::Constraint {
                path: join(segment, &path),
                reason,
            },
            Self::Unsupported { path, reason } => Self::Unsupported {
                path: join(segment, &path),
                reason,
            },
            other => other,
        }
    }
}

fn join(segment: &str, rest: &str) -> String {
    if rest.is_empty() {
        segment.to_string()
    } else {
        format!("{segment}.{rest}")
    }
}
