use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Internal(format!("record encoding: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, GridError>;
