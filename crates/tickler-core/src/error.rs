use thiserror::Error;

#[derive(Debug, Error)]
pub enum TicklerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TicklerError {
    /// Short, stable code printed alongside CLI failures.
    pub fn code(&self) -> &'static str {
        match self {
            TicklerError::Config(_) => "CONFIG_ERROR",
            TicklerError::Database(_) => "DATABASE_ERROR",
            TicklerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            TicklerError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, TicklerError>;
