use crate::model::Id;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed command, rejected before any store access.
    InvalidInput(&'static str),
    /// A foreign key points at a row that does not exist.
    UnknownReference { kind: &'static str, id: Id },
    /// Natural key already taken. Recovered inside the registry, never returned by `resolve`.
    UniqueViolation { kind: &'static str },
    LimitExceeded(&'static str),
    DeadlineExceeded,
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::UnknownReference { kind, id } => write!(f, "unknown {kind}: {id}"),
            EngineError::UniqueViolation { kind } => {
                write!(f, "duplicate {kind}: natural key already exists")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::DeadlineExceeded => write!(f, "deadline exceeded, transaction rolled back"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
