//! Error taxonomy shared by the orchestrator and the hosting adapters.
//!
//! Adapters normalize every provider response into one of these variants at
//! their boundary, so the orchestrator never inspects provider-specific error
//! strings.

/// What an "already exists" response from a provider was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A branch (git reference) with the requested name already exists.
    Branch,
    /// A file already exists at the path the write meant to create.
    File,
    /// The file changed underneath the write (stale blob, concurrent commit).
    StaleFile,
    /// An open change request already exists for the source branch.
    ChangeRequest,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("{0}")]
    Configuration(String),

    #[error("{kind:?} conflict: {message}")]
    Conflict { kind: ConflictKind, message: String },

    #[error("A branch with this name already exists on {destination}")]
    BranchExists { destination: String, branch: String },

    #[error("Hosting provider error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider { status: Option<u16>, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid declaration: {0}")]
    InvalidDeclaration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        PublishError::Conflict {
            kind,
            message: message.into(),
        }
    }

    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        PublishError::Provider {
            status,
            message: message.into(),
        }
    }

    /// True for the duplication signal the orchestrator recovers from.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PublishError::Conflict { .. })
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        PublishError::Provider {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}
