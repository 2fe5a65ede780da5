use thiserror::Error;

/// Reason a single path was skipped by an edit operation.
///
/// Edits are tolerant: one failing path never aborts the remaining ones, so
/// these errors are collected and handed back to the caller instead of
/// short-circuiting.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("path {path} is not supported: {reason}")]
    Unsupported { path: String, reason: &'static str },
    #[error("node {path} is not a list")]
    NotAList { path: String },
    #[error("cannot set {path}: {reason}")]
    Set { path: String, reason: &'static str },
    #[error("transform of {path} failed: {reason}")]
    Transform { path: String, reason: String },
    #[error("invalid json document: {0}")]
    Json(#[from] serde_json::Error),
}

impl EditError {
    pub(crate) fn unsupported(path: &str, reason: &'static str) -> Self {
        Self::Unsupported {
            path: path.to_string(),
            reason,
        }
    }

    pub(crate) fn not_a_list(path: &str) -> Self {
        Self::NotAList {
            path: path.to_string(),
        }
    }

    pub(crate) fn set(path: &str, reason: &'static str) -> Self {
        Self::Set {
            path: path.to_string(),
            reason,
        }
    }
}
