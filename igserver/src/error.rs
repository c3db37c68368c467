use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::config::ConfigError;

/// Startup / wiring errors for the binary.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    Config(#[from] ConfigError),
    B2(#[from] igb2::Error),
    Vertex(#[from] igvertex::Error),
    Reqwest(#[from] reqwest::Error),
    Sqlx(#[from] sqlx::Error),
    Bootstrap(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Everything a control-plane or generation-plane handler can answer with.
/// The executor never uses this, its failures land on the task record.
#[derive(Debug)]
pub enum ApiError {
    AuthMissing,
    AuthInvalid,
    /// 401 with a caller-facing message (the login failure string).
    Unauthorized(String),
    Forbidden,
    BadRequest(String),
    NotFound,
    Conflict(String),
    Precheck(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        use ApiError::*;
        match self {
            AuthMissing | AuthInvalid | Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Forbidden => StatusCode::FORBIDDEN,
            BadRequest(_) => StatusCode::BAD_REQUEST,
            NotFound => StatusCode::NOT_FOUND,
            Conflict(_) => StatusCode::CONFLICT,
            Precheck(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        use ApiError::*;
        match self {
            AuthMissing => "missing bearer token".to_string(),
            AuthInvalid => "invalid token".to_string(),
            Forbidden => "forbidden".to_string(),
            NotFound => "not found".to_string(),
            Unauthorized(msg) | BadRequest(msg) | Conflict(msg) | Precheck(msg)
            | Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(StatusCode::UNAUTHORIZED, ApiError::AuthMissing.status());
        assert_eq!(StatusCode::UNAUTHORIZED, ApiError::AuthInvalid.status());
        assert_eq!(StatusCode::FORBIDDEN, ApiError::Forbidden.status());
        assert_eq!(
            StatusCode::BAD_REQUEST,
            ApiError::BadRequest("配额不足".into()).status()
        );
        assert_eq!(StatusCode::NOT_FOUND, ApiError::NotFound.status());
        assert_eq!(
            StatusCode::CONFLICT,
            ApiError::Conflict("duplicate username".into()).status()
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Precheck("B2_PRECHECK_FAILED".into()).status()
        );
    }

    #[test]
    fn test_message_passthrough() {
        assert_eq!("配额不足", ApiError::BadRequest("配额不足".into()).message());
        let login_failed = ApiError::Unauthorized("用户名或密码错误".into());
        assert_eq!(StatusCode::UNAUTHORIZED, login_failed.status());
        assert_eq!("用户名或密码错误", login_failed.message());
    }
}
