use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use derive_more::derive::Display;
use serde_json::json;

use crate::{email::client::EmailClientError, routes::handlers::auth::AuthCallbackError};

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

/// `Json` body extractor whose rejections render as [`AppError`] bodies.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(Debug, Display)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
    RequestTimeout,
    TooManyRequests,
    Unauthorized(String),
    Upstream(EmailClientError),
    Oauth2(AuthCallbackError),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        tracing::error!("Reqwest error: {:?}", error);
        if error.is_timeout() {
            return AppError::RequestTimeout;
        }
        match error.status() {
            Some(StatusCode::BAD_REQUEST) => AppError::BadRequest(error.to_string()),
            Some(StatusCode::REQUEST_TIMEOUT) => AppError::RequestTimeout,
            Some(StatusCode::TOO_MANY_REQUESTS) => AppError::TooManyRequests,
            _ => AppError::Internal(error.into()),
        }
    }
}

impl From<EmailClientError> for AppError {
    fn from(error: EmailClientError) -> Self {
        match error {
            EmailClientError::Http { status: 401, .. } => {
                AppError::Unauthorized("Gmail access expired, please log in again".to_string())
            }
            EmailClientError::Http { status: 404, .. } => {
                AppError::NotFound("Email not found".to_string())
            }
            EmailClientError::Http { status: 429, .. } => AppError::TooManyRequests,
            EmailClientError::Timeout(_) => AppError::RequestTimeout,
            error => AppError::Upstream(error),
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(json!({
            "error": message.into(),
            "success": false,
        })),
    )
}

// This centralizes all different errors from our app in one place
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::RequestTimeout => error_body(StatusCode::REQUEST_TIMEOUT, "Request took too long"),
            AppError::TooManyRequests => error_body(StatusCode::TOO_MANY_REQUESTS, "Too many requests"),
            AppError::Unauthorized(msg) => error_body(StatusCode::UNAUTHORIZED, msg),
            AppError::Upstream(e) => {
                tracing::error!("Gmail error: {}", e);
                error_body(StatusCode::BAD_GATEWAY, "Gmail request failed")
            }
            AppError::Oauth2(e) => {
                tracing::error!("OAuth2 error: {}", e);
                error_body(StatusCode::UNAUTHORIZED, "Could not authenticate with Google")
            }
        };
        tracing::warn!("Error response: {} {}", err.0, err.1 .0);

        err.into_response()
    }
}
