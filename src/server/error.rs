use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::{EmbedError, SearchError};

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub struct AppError(pub StatusCode, pub anyhow::Error);

impl AppError {
    pub fn bad_request(err: impl Into<anyhow::Error>) -> Self {
        Self(StatusCode::BAD_REQUEST, err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, format!("Something went wrong: {}", self.1)).into_response()
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidQuery(_) | SearchError::Embed(EmbedError::Decode(_)) => {
                Self::bad_request(err)
            }
            _ => Self(StatusCode::INTERNAL_SERVER_ERROR, err.into()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, err.into())
    }
}
