use crate::models::attendance_record::AttendanceStatus;
use crate::models::session::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;
use validator::Validate;

/// Client-reported device fingerprint. Only `device_id` participates in
/// decisions; everything else is opaque audit metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceFingerprint {
    #[validate(length(min = 8, max = 128))]
    pub device_id: String,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl DeviceFingerprint {
    pub fn audit_meta(&self) -> Option<JsonValue> {
        if self.extra.is_empty() {
            None
        } else {
            Some(JsonValue::Object(self.extra.clone()))
        }
    }
}

/// Untrusted Bluetooth reading submitted by the client; the proximity
/// policy scores it, nothing here is taken as telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProximityReading {
    #[validate(range(min = -120, max = 0))]
    pub rssi: i32,
    #[validate(range(min = 0.0))]
    pub distance: f64,
    pub beacon_uuid: Option<Uuid>,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestOtpPayload {
    pub session_id: Uuid,
    #[validate(nested)]
    pub device_fingerprint: DeviceFingerprint,
    #[validate(nested)]
    pub proximity: Option<ProximityReading>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerifyOtpPayload {
    pub session_id: Uuid,
    #[validate(length(equal = 6))]
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub title: String,
    pub subject: Option<String>,
    pub room: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub late_entry_minutes: i32,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            title: s.title.clone(),
            subject: s.subject.clone(),
            room: s.room.clone(),
            start_time: s.start_time,
            end_time: s.end_time,
            late_entry_minutes: s.late_entry_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOtpResponse {
    pub message: String,
    pub expires_in_seconds: i64,
    pub session: SessionSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpResponse {
    pub message: String,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
    pub minutes_late: i32,
    pub session: SessionSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequestResponse {
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttendanceStats {
    pub total: i64,
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub excused: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRosterEntry {
    pub id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    pub marked_at: DateTime<Utc>,
    pub method: String,
    pub device_id: String,
    pub minutes_late: i32,
    pub flags: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAttendanceResponse {
    pub session: SessionSummary,
    pub attendance: Vec<SessionRosterEntry>,
    pub stats: AttendanceStats,
}
