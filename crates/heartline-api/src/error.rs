use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use heartline_types::api::ErrorBody;

pub type Result<T> = std::result::Result<T, HeartlineError>;

/// Every failure a caller can see. The `Display` text is what the user is
/// shown as a notification.
#[derive(Debug, thiserror::Error)]
pub enum HeartlineError {
    /// Missing or empty required input. Never reaches the store.
    #[error("{0}")]
    Validation(String),

    /// The store rejected an insert, update or delete.
    #[error("Something went wrong saving your changes. Please try again.")]
    Write(String),

    /// The store could not be read.
    #[error("Something went wrong loading your data. Please try again.")]
    Unavailable(String),

    /// The target document no longer exists.
    #[error("That {0} no longer exists.")]
    NotFound(&'static str),

    /// A bulk delete removed some documents but not all.
    #[error("Some items could not be cleared. Please try again.")]
    PartialFailure { deleted: usize, failed: usize },

    #[error("{0}")]
    Conflict(String),

    /// The operation does not apply to the current protocol state.
    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Please log in to continue.")]
    Unauthorized,
}

impl HeartlineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Log a store write failure and wrap it.
    pub fn write(err: anyhow::Error) -> Self {
        error!("Store write failed: {:#}", err);
        Self::Write(err.to_string())
    }

    /// Log a store read failure and wrap it.
    pub fn unavailable(err: anyhow::Error) -> Self {
        error!("Store read failed: {:#}", err);
        Self::Unavailable(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Write(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PartialFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Conflict(_) | Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for HeartlineError {
    fn into_response(self) -> Response {
        let (deleted, failed) = match &self {
            Self::PartialFailure { deleted, failed } => (Some(*deleted), Some(*failed)),
            _ => (None, None),
        };

        let body = ErrorBody {
            error: self.to_string(),
            deleted,
            failed,
        };
        (self.status(), Json(body)).into_response()
    }
}
