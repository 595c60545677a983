use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ReviewError>;

/// Errors produced by the review service and its storage backends
#[derive(Debug, Error)]
pub enum ReviewError {
    /// A lookup required by the operation matched nothing
    #[error("{0}")]
    NotFound(String),

    /// A second row for an existing (user, movie) pair was rejected by storage
    #[error("Review for user id [{user_id}] and movie id [{movie_id}] already exists")]
    UniqueViolation { user_id: Uuid, movie_id: Uuid },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to access {}: {source}", path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReviewError {
    pub fn review_not_found(user_id: Uuid, movie_id: Uuid) -> Self {
        Self::NotFound(format!(
            "Review with user id [{}] and movie id [{}] not found",
            user_id, movie_id
        ))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
