use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// A pending OTP request. At most one row exists per (student, session);
/// re-issuance overwrites it. Transitions only pending -> verified or
/// pending -> expired/invalidated, never back.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceRequest {
    pub id: Uuid,
    pub student_id: Uuid,
    pub session_id: Uuid,
    pub device_id: String,
    pub device_meta: Option<JsonValue>,
    pub proximity: Option<JsonValue>,
    pub otp_code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub invalidated: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AttendanceRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Live = still eligible to be verified: unexpired, unverified, not
    /// invalidated by the attempt ceiling or an explicit cancel.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.invalidated && self.verified_at.is_none() && !self.is_expired(now)
    }
}
