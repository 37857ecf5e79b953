//! Classifier error taxonomy

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The model backend could not be reached or rejected the request
    #[error("classifier backend failed: {0}")]
    Backend(String),

    /// The backend answered, but not in the expected shape
    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),

    /// The backend named an agent outside the routing table
    #[error("unknown target agent label '{0}'")]
    UnknownLabel(String),

    /// The persisted artifact is missing or unreadable
    #[error("classifier artifact {}: {reason}", .path.display())]
    Artifact { path: PathBuf, reason: String },

    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ClassifierError {
    pub fn artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Artifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying later with the same input could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::MalformedResponse(_))
    }
}
