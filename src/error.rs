//! Domain error taxonomy shared across handlers, write-forward, and the indexer.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Errors the PDS write client can surface, mapped from HTTP status codes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PdsErrorKind {
    #[error("bad request")]
    BadRequest,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("transient")]
    Transient,
}

impl PdsErrorKind {
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            400 => PdsErrorKind::BadRequest,
            401 => PdsErrorKind::Unauthorized,
            403 => PdsErrorKind::Forbidden,
            404 => PdsErrorKind::NotFound,
            409 => PdsErrorKind::Conflict,
            _ => PdsErrorKind::Transient,
        }
    }
}

/// Domain errors emitted by the core.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("handle already taken: {0}")]
    HandleTaken(String),

    #[error("validation error on {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("member is banned")]
    MemberBanned,

    #[error("subscription not found")]
    SubscriptionNotFound,

    #[error("block not found")]
    BlockNotFound,

    #[error("block already exists")]
    BlockAlreadyExists,

    #[error("subscription already exists")]
    SubscriptionAlreadyExists,

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream PDS error: {0:?}")]
    Pds(PdsErrorKind),

    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    #[error("credential persist failed, community locked out: {0}")]
    PersistFailed(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NotFound",
            AppError::AlreadyExists(_) => "AlreadyExists",
            AppError::HandleTaken(_) => "HandleTaken",
            AppError::ValidationError { .. } => "InvalidRequest",
            AppError::Unauthorized => "AuthRequired",
            AppError::Forbidden(_) => "Forbidden",
            AppError::MemberBanned => "MemberBanned",
            AppError::SubscriptionNotFound => "SubscriptionNotFound",
            AppError::BlockNotFound => "BlockNotFound",
            AppError::BlockAlreadyExists => "BlockAlreadyExists",
            AppError::SubscriptionAlreadyExists => "SubscriptionAlreadyExists",
            AppError::InvalidCursor => "InvalidCursor",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Pds(PdsErrorKind::Unauthorized) | AppError::Pds(PdsErrorKind::Forbidden) => {
                "AuthRequired"
            }
            AppError::Pds(PdsErrorKind::NotFound) => "NotFound",
            AppError::Pds(PdsErrorKind::Conflict) => "Conflict",
            AppError::Pds(_) => "UpstreamError",
            AppError::RefreshFailed(_) => "RefreshFailed",
            AppError::PersistFailed(_) => "PersistFailed",
            AppError::Internal(_) => "InternalError",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_)
            | AppError::SubscriptionNotFound
            | AppError::BlockNotFound
            | AppError::Pds(PdsErrorKind::NotFound) => StatusCode::NOT_FOUND,
            AppError::AlreadyExists(_)
            | AppError::HandleTaken(_)
            | AppError::BlockAlreadyExists
            | AppError::SubscriptionAlreadyExists
            | AppError::Pds(PdsErrorKind::Conflict) => StatusCode::CONFLICT,
            AppError::ValidationError { .. } | AppError::InvalidInput(_) | AppError::InvalidCursor => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized
            | AppError::Pds(PdsErrorKind::Unauthorized)
            | AppError::Pds(PdsErrorKind::Forbidden) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::MemberBanned => StatusCode::FORBIDDEN,
            AppError::Pds(PdsErrorKind::BadRequest) => StatusCode::BAD_REQUEST,
            AppError::Pds(PdsErrorKind::Transient) => StatusCode::BAD_GATEWAY,
            AppError::RefreshFailed(_) | AppError::PersistFailed(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, AppError::Internal(_) | AppError::PersistFailed(_)) {
            tracing::error!(error = %self, "internal error surfaced to client");
        }
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
