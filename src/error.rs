//! Unified application error model and mapping helpers.
//! Component errors (access, token, store) are folded into [`AppError`] here; the HTTP layer
//! only ever sees this type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::error;

use crate::access::AccessError;
use crate::identity::TokenError;
use crate::storage::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Unauthenticated { code: String, message: String },
    Forbidden { code: String, message: String },
    NotFound { code: String, message: String },
    Validation { code: String, message: String },
    Store { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Unauthenticated { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Validation { code, .. }
            | AppError::Store { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Unauthenticated { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Validation { message, .. }
            | AppError::Store { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn unauthenticated() -> Self {
        AppError::Unauthenticated { code: "unauthenticated".into(), message: "authentication required".into() }
    }
    pub fn forbidden() -> Self {
        AppError::Forbidden { code: "forbidden".into(), message: "access denied".into() }
    }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn store<S: Into<String>>(code: S, msg: S) -> Self { AppError::Store { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Unauthenticated { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::Validation { .. } => 400,
            AppError::Store { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

/// Plain JSON fallback; the server normally routes errors through its renderer instead.
/// An unauthenticated caller is always sent to the login page.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Unauthenticated { .. } = self {
            return Redirect::to("/auth/login").into_response();
        }
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unauthenticated => AppError::unauthenticated(),
            AccessError::Forbidden => AppError::forbidden(),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::BadSignature | TokenError::Expired => AppError::unauthenticated(),
            other => {
                error!(target: "tablegate::error", "token failure: {other}");
                AppError::internal("token_error", "session could not be issued")
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownTable(t) => AppError::NotFound { code: "unknown_entity".into(), message: format!("no table for '{t}'") },
            StoreError::UnknownColumn { column, .. } => {
                AppError::Validation { code: "unknown_column".into(), message: format!("unknown column '{column}'") }
            }
            StoreError::Timeout(_) => AppError::store("store_timeout", "the data store did not respond in time"),
            other => {
                // raw store text stays in the log
                error!(target: "tablegate::error", "store failure: {other}");
                AppError::store("store_error", "the data store operation failed")
            }
        }
    }
}
