//! HTTP error responses and error classification shared by both transports.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};

use crate::{
    domain::{AuthError, Counter, MetricsSink},
    infrastructure::dto::{http::ErrorResponse, websocket::error_code},
    usecase::{ChatError, SessionError},
};

const INTERNAL_MESSAGE: &str = "internal server error";

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(AuthError),
    BadRequest(String),
    NotFound(String),
    Gone(String),
    Conflict(String),
    RateLimited { retry_after_secs: u64 },
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => error_code::AUTHENTICATION,
            ApiError::BadRequest(_) => error_code::VALIDATION,
            ApiError::NotFound(_) | ApiError::Gone(_) | ApiError::Conflict(_) => {
                error_code::SESSION
            }
            ApiError::RateLimited { .. } => error_code::RATE_LIMIT,
            ApiError::Internal(_) => error_code::INTERNAL,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized(e) => e.to_string(),
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Gone(message)
            | ApiError::Conflict(message) => message.clone(),
            ApiError::RateLimited { retry_after_secs } => {
                format!("rate limit exceeded, retry after {}s", retry_after_secs)
            }
            // Internal details stay in the logs
            ApiError::Internal(_) => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(_) | SessionError::NotOwned(_) => {
                ApiError::NotFound("session not found".to_string())
            }
            SessionError::Expired(_) => ApiError::Gone(e.to_string()),
            SessionError::AlreadyExists(_) => ApiError::Conflict(e.to_string()),
            SessionError::RateLimited { retry_after_secs } => {
                ApiError::RateLimited { retry_after_secs }
            }
            SessionError::Repository(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Authentication(e) => ApiError::Unauthorized(e),
            ChatError::Validation(message) => ApiError::BadRequest(message),
            ChatError::RateLimited { retry_after_secs } => {
                ApiError::RateLimited { retry_after_secs }
            }
            ChatError::Session(e) => e.into(),
            ChatError::Transport(_) | ChatError::Collaborator(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Internal(detail) = &self {
            tracing::error!("Request failed: {}", detail);
        }

        let retry_after = match &self {
            ApiError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorResponse {
            success: false,
            error: self.message(),
            code: self.code().to_string(),
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// In-band `code` of the error frame answering a failed chat exchange
pub fn chat_error_code(e: &ChatError) -> &'static str {
    match e {
        ChatError::Authentication(_) => error_code::AUTHENTICATION,
        ChatError::Validation(_) => error_code::VALIDATION,
        ChatError::RateLimited { .. } => error_code::RATE_LIMIT,
        ChatError::Session(_) => error_code::SESSION,
        ChatError::Transport(_) | ChatError::Collaborator(_) => error_code::INTERNAL,
    }
}

/// Client-facing text of a failed chat exchange; internal failures stay generic
pub fn chat_error_message(e: &ChatError) -> String {
    match e {
        ChatError::Transport(_) | ChatError::Collaborator(_) => INTERNAL_MESSAGE.to_string(),
        _ => e.to_string(),
    }
}

/// Count a failed chat exchange
pub fn record_chat_error(metrics: &dyn MetricsSink, e: &ChatError) {
    let counter = match e {
        ChatError::Validation(_) => Counter::ValidationErrors,
        ChatError::RateLimited { .. } => Counter::RateLimited,
        ChatError::Transport(_) => Counter::TransportErrors,
        ChatError::Collaborator(_) => Counter::CollaboratorErrors,
        ChatError::Authentication(_) | ChatError::Session(_) => return,
    };
    metrics.increment(counter);
}
