use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
    Extension,
};
use validator::Validate;

use crate::dto::attendance_dto::{
    CancelRequestResponse, RequestOtpPayload, RequestOtpResponse, SessionAttendanceResponse,
    SessionSummary, VerifyOtpPayload, VerifyOtpResponse,
};
use crate::error::Error;
use crate::middleware::auth::Claims;
use crate::models::attendance_record::AttendanceStatus;
use crate::AppState;

#[utoipa::path(
    post,
    path = "/api/attendance/request-otp",
    responses(
        (status = 200, description = "OTP issued, lifetime returned"),
        (status = 400, description = "Business-rule rejection (inactive session, already marked, proximity, throttle)"),
        (status = 403, description = "Device already bound to another student"),
        (status = 404, description = "Unknown session"),
    ),
)]
#[axum::debug_handler]
pub async fn request_otp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<RequestOtpPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let student_id = claims.user_id()?;

    let issued = state
        .attendance_service
        .request_otp(student_id, &payload)
        .await?;

    let response = RequestOtpResponse {
        message: "OTP sent successfully".to_string(),
        expires_in_seconds: issued.expires_in_seconds,
        session: SessionSummary::from(&issued.session),
    };
    Ok(Json(response).into_response())
}

#[utoipa::path(
    post,
    path = "/api/attendance/verify",
    responses(
        (status = 200, description = "Attendance recorded, status returned"),
        (status = 400, description = "Rejection with reason code; may carry remaining_attempts"),
        (status = 403, description = "Device already bound to another student"),
        (status = 404, description = "Unknown session"),
    ),
)]
#[axum::debug_handler]
pub async fn verify_attendance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<VerifyOtpPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let student_id = claims.user_id()?;

    let verified = state
        .attendance_service
        .verify_otp(student_id, &payload)
        .await?;

    let status: AttendanceStatus = verified
        .record
        .status
        .parse()
        .map_err(|_| Error::Internal("unknown attendance status".to_string()))?;
    let response = VerifyOtpResponse {
        message: format!("Attendance marked as {}", verified.record.status),
        status,
        marked_at: verified.record.marked_at,
        minutes_late: verified.record.minutes_late,
        session: SessionSummary::from(&verified.session),
    };
    Ok(Json(response).into_response())
}

#[axum::debug_handler]
pub async fn cancel_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<uuid::Uuid>,
) -> crate::error::Result<Response> {
    let student_id = claims.user_id()?;
    let cancelled = state
        .attendance_service
        .cancel_request(student_id, session_id)
        .await?;
    Ok(Json(CancelRequestResponse { cancelled }).into_response())
}

/// Teacher roster for one session, with per-status totals.
#[axum::debug_handler]
pub async fn session_attendance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<uuid::Uuid>,
) -> crate::error::Result<Response> {
    if !claims.is_teacher() {
        return Err(Error::Forbidden(
            "Only teachers can view session attendance".to_string(),
        ));
    }
    let teacher_id = claims.user_id()?;
    let session = state
        .session_service
        .get_owned(session_id, teacher_id)
        .await?;

    let attendance = state.attendance_service.session_roster(session_id).await?;
    let stats = state.attendance_service.session_stats(session_id).await?;

    let response = SessionAttendanceResponse {
        session: SessionSummary::from(&session),
        attendance,
        stats,
    };
    Ok(Json(response).into_response())
}

#[axum::debug_handler]
pub async fn attendance_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> crate::error::Result<Response> {
    let student_id = claims.user_id()?;
    let entries = state.attendance_service.history(student_id, 20).await?;
    Ok(Json(entries).into_response())
}
