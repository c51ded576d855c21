use thiserror::Error;

/// Errors surfaced at the session boundary (start commands, closed queues).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("countdown duration must be at least 1 second, got {0}")]
    InvalidDuration(i64),
    #[error("monitoring session has stopped")]
    SessionClosed,
}

/// A single Safety-Flag store could not be read or written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("flag store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("flag store holds malformed data: {0}")]
    Format(#[from] serde_json::Error),
    #[error("unknown flag store '{0}'")]
    UnknownStore(String),
}

/// The escalation sink could not complete a dispatch.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("sink rejected the command: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum WakeError {
    #[error("wake resource unavailable: {0}")]
    Unavailable(String),
}
