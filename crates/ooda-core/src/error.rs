use thiserror::Error;

#[derive(Debug, Error)]
pub enum OodaError {
    #[error("not initialized: run 'ooda init'")]
    NotInitialized,

    #[error("invalid agent name '{0}': must be lowercase alphanumeric with '-' or '_'")]
    InvalidAgentName(String),

    #[error("cycle not found: {0}")]
    CycleNotFound(String),

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("alert not found: {0}")]
    AlertNotFound(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("{phase} collaborator failed: {message}")]
    CollaboratorFailure { phase: String, message: String },

    #[error("action id '{supplied}' does not match content address '{computed}'")]
    ActionIdMismatch { supplied: String, computed: String },

    #[error("alert {id} is {status}, only pending alerts can be approved or rejected")]
    ApprovalStateConflict { id: String, status: String },

    #[error("invalid {kind}: '{value}'")]
    InvalidValue { kind: &'static str, value: String },

    #[error("store error: {0}")]
    Db(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OodaError {
    pub(crate) fn invalid(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            kind,
            value: value.into(),
        }
    }

    pub(crate) fn collaborator(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CollaboratorFailure {
            phase: phase.into(),
            message: message.into(),
        }
    }
}

/// Convert any redb error into `OodaError::Db`.
pub(crate) fn db_err<E: std::fmt::Display>(e: E) -> OodaError {
    OodaError::Db(e.to_string())
}

pub type Result<T> = std::result::Result<T, OodaError>;
