use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Business outcomes of the verification engine. Each carries the detail
    // the caller is allowed to see and maps to a stable reason code.
    #[error("Session is not accepting attendance: {0}")]
    SessionNotActive(String),

    #[error("Attendance already marked for this session")]
    AlreadyMarked {
        status: String,
        marked_at: DateTime<Utc>,
    },

    #[error("Device already used by another student in this session")]
    DeviceReuseBlocked { bound_student: Uuid },

    #[error("Proximity check failed: {0}")]
    ProximityRejected(String),

    #[error("No pending OTP request for this session")]
    NoRequestFound,

    #[error("OTP has expired")]
    OtpExpired,

    #[error("OTP does not match")]
    OtpMismatch { remaining_attempts: i32 },

    #[error("Too many failed OTP attempts")]
    TooManyAttempts,

    #[error("An OTP is already active for this session")]
    RateLimited { wait_seconds: i64 },

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "bad_request", "message": msg }),
            ),
            Error::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized", "message": msg }),
            ),
            Error::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                json!({ "error": "forbidden", "message": msg }),
            ),
            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "message": msg }),
            ),
            Error::SessionNotActive(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "session_not_active", "message": msg }),
            ),
            Error::AlreadyMarked { status: s, marked_at } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "already_marked",
                    "message": "Attendance already marked for this session",
                    "status": s,
                    "marked_at": marked_at,
                }),
            ),
            Error::DeviceReuseBlocked { bound_student } => (
                StatusCode::FORBIDDEN,
                json!({
                    "error": "device_reuse_blocked",
                    "message": "This device has already marked attendance for another student",
                    "bound_student": bound_student,
                }),
            ),
            Error::ProximityRejected(reason) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "proximity_rejected", "message": reason }),
            ),
            Error::NoRequestFound => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "no_request_found",
                    "message": "Request an OTP before verifying",
                }),
            ),
            Error::OtpExpired => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "otp_expired",
                    "message": "OTP has expired, request a new one",
                }),
            ),
            Error::OtpMismatch { remaining_attempts } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "otp_mismatch",
                    "message": "Incorrect OTP",
                    "remaining_attempts": remaining_attempts,
                }),
            ),
            Error::TooManyAttempts => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "too_many_attempts",
                    "message": "Too many failed attempts, request a new OTP",
                }),
            ),
            Error::RateLimited { wait_seconds } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "rate_limited",
                    "message": "An OTP is already active for this session",
                    "wait_seconds": wait_seconds,
                }),
            ),
            Error::Validation(err) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation", "message": err.to_string() }),
            ),
            Error::Json(err) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "bad_json", "message": err.to_string() }),
            ),
            Error::Database(err) => {
                tracing::error!(error = ?err, "database failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "server_error", "message": "An unexpected error occurred" }),
                )
            }
            Error::Anyhow(err) => {
                tracing::error!(error = ?err, "unexpected failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "server_error", "message": "An unexpected error occurred" }),
                )
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "server_error", "message": "An unexpected error occurred" }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
