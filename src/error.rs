//! Error type shared by every HTTP handler.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Input rejected before touching storage. The message is shown to the user.
    #[error("{0}")]
    Validation(String),

    #[error("Oturum açmanız gerekiyor")]
    Unauthorized,

    #[error("Kullanıcı adı veya şifre hatalı")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    /// Text sent to the client. Storage and internal failures are logged and
    /// replaced by a generic message.
    fn public_message(&self) -> String {
        match self {
            ApiError::Store(StoreError::DuplicateKey(_)) => {
                "Bu kayıt zaten mevcut".to_string()
            }
            ApiError::Store(e) => {
                error!("Storage failure: {}", e);
                "Sunucu hatası".to_string()
            }
            ApiError::Internal(e) => {
                error!("Internal failure: {}", e);
                "Sunucu hatası".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::Store(StoreError::DuplicateKey(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Store(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "message": self.public_message() }))
    }
}
