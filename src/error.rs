use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogisticsError>;

/// Failure kinds surfaced by every registry, engine and tracker operation.
#[derive(Error, Debug)]
pub enum LogisticsError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Cylinders unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Internal error: {0}")]
    InternalError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LogisticsError {
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(message.into())))
    }

    /// Stable outward status for each failure kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            Self::Unavailable(_) | Self::InvalidTransition(_) => 400,
            Self::ValidationError(_) => 422,
            Self::InternalError(_) => 500,
        }
    }
}

impl From<serde_json::Error> for LogisticsError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

impl From<std::io::Error> for LogisticsError {
    fn from(err: std::io::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

impl From<csv::Error> for LogisticsError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            Self::InternalError(Box::new(err))
        } else {
            Self::ValidationError(err.to_string())
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LogisticsError {
    fn from(err: rocksdb::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}
