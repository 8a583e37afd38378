use uuid::Uuid;

/// Result type alias for memory-fabric operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the engram memory platform
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Relational store error: {0}")]
    Storage(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decryption failed: ciphertext rejected")]
    Decryption,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out")]
    Timeout,

    #[error("Synthesis budget exhausted")]
    BudgetExhausted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is recoverable (can retry with backoff)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Storage(_) => true,
            Error::VectorStore(_) => true,
            Error::Embedding(_) => true,
            Error::Llm(_) => true,
            Error::NotFound(_) => false,
            Error::InvalidInput(_) => false,
            Error::Decryption => false,
            Error::Serialization(_) => false,
            Error::Timeout => true,
            Error::BudgetExhausted => false,
            Error::Io(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_backends_are_recoverable() {
        assert!(Error::Storage("connection reset".into()).is_recoverable());
        assert!(Error::VectorStore("502".into()).is_recoverable());
        assert!(Error::Embedding("timeout".into()).is_recoverable());
        assert!(Error::Timeout.is_recoverable());
    }

    #[test]
    fn logic_errors_are_not_recoverable() {
        assert!(!Error::NotFound(Uuid::nil()).is_recoverable());
        assert!(!Error::InvalidInput("bad rating".into()).is_recoverable());
        assert!(!Error::Decryption.is_recoverable());
        assert!(!Error::BudgetExhausted.is_recoverable());
    }
}
