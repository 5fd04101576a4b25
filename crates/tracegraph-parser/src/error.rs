use thiserror::Error;

/// Errors raised while splitting a raw trace or packet line
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("not enough fields: expected at least {expected}, found {found}")]
    NotEnoughFields { expected: usize, found: usize },

    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    #[error("invalid direction: {0}")]
    Direction(String),

    #[error("unsupported syscall: {0}")]
    UnknownSyscall(String),

    #[error("invalid packet record: {0}")]
    Json(#[from] serde_json::Error),
}
