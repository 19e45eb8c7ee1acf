use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const STATUS_SCHEDULED: &str = "scheduled";
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_ENDED: &str = "ended";

/// Read-only view supplied by the session directory. The engine never
/// mutates anything here except the attendance counter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub title: String,
    pub subject: Option<String>,
    pub room: Option<String>,
    pub session_code: String,
    pub beacon_uuid: Uuid,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub late_entry_minutes: i32,
    pub attendance_count: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub fn grace(&self) -> Duration {
        Duration::minutes(i64::from(self.late_entry_minutes))
    }

    /// Issuance window: teacher has activated the session and the clock is
    /// between `start - early_open` and `end`. The early-open buffer lets
    /// students who arrive before the scheduled start mark as present.
    pub fn accepts_requests_at(&self, now: DateTime<Utc>, early_open: Duration) -> bool {
        self.is_active() && now >= self.start_time - early_open && now <= self.end_time
    }
}
