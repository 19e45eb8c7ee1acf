use crate::dto::attendance_dto::{
    AttendanceStats, ProximityReading, RequestOtpPayload, SessionRosterEntry, VerifyOtpPayload,
};
use crate::error::{Error, Result};
use crate::models::attendance_record::{AttendanceRecord, AttendanceStatus, METHOD_BLUETOOTH};
use crate::models::session::Session;
use crate::services::device_service::DeviceLedger;
use crate::services::otp_service::{codes_match, IssuedOtp, OtpIssuer};
use crate::services::pending_store::{NewPendingRequest, PendingRequestStore};
use crate::services::proximity_service::ProximityPolicy;
use crate::services::session_service::SessionService;
use crate::utils::time;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const RECORD_KEY_CONSTRAINT: &str = "attendance_records_student_session_key";
const DEVICE_KEY_CONSTRAINT: &str = "attendance_records_session_device_key";

/// Lateness classification. Marked at or before the session start is
/// present; within the grace window is late; beyond it the policy is to
/// record the student as absent rather than reject the verify outright, so
/// a successful verify always yields exactly one record.
pub fn classify(
    marked_at: DateTime<Utc>,
    session_start: DateTime<Utc>,
    grace: Duration,
) -> AttendanceStatus {
    let lateness = marked_at - session_start;
    if lateness <= Duration::zero() {
        AttendanceStatus::Present
    } else if lateness <= grace {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Absent
    }
}

/// Whole minutes late, rounded up. Zero when on time or early.
pub fn minutes_late(marked_at: DateTime<Utc>, session_start: DateTime<Utc>) -> i32 {
    let secs = (marked_at - session_start).num_seconds();
    if secs <= 0 {
        0
    } else {
        ((secs + 59) / 60) as i32
    }
}

#[derive(Debug, Clone)]
pub struct OtpIssued {
    pub expires_in_seconds: i64,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub struct VerifiedAttendance {
    pub record: AttendanceRecord,
    pub session: Session,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub session_id: Uuid,
    pub status: String,
    pub marked_at: DateTime<Utc>,
    pub session_title: String,
    pub session_subject: Option<String>,
}

/// Orchestrates the request-OTP / verify-OTP protocol. All uniqueness
/// invariants (one record per key, one device binding per session) are
/// enforced by unique indexes at the storage boundary; the checks here are
/// for early, well-explained rejections, not for correctness under races.
#[derive(Clone)]
pub struct AttendanceService<P: PendingRequestStore> {
    pool: PgPool,
    pending: P,
    otp: OtpIssuer,
    proximity: ProximityPolicy,
    sessions: SessionService,
    devices: DeviceLedger,
    max_attempts: i32,
    early_open: Duration,
}

impl<P: PendingRequestStore> AttendanceService<P> {
    pub fn new(
        pool: PgPool,
        pending: P,
        otp: OtpIssuer,
        proximity: ProximityPolicy,
        max_attempts: i32,
        early_open_minutes: i64,
    ) -> Self {
        let sessions = SessionService::new(pool.clone());
        let devices = DeviceLedger::new(pool.clone());
        Self {
            pool,
            pending,
            otp,
            proximity,
            sessions,
            devices,
            max_attempts,
            early_open: Duration::minutes(early_open_minutes),
        }
    }

    /// Request-OTP protocol step. Checks run cheapest-rejection-first:
    /// terminal state, session window, device ledger, proximity, then the
    /// live-request throttle; only then is a code issued.
    pub async fn request_otp(
        &self,
        student_id: Uuid,
        payload: &RequestOtpPayload,
    ) -> Result<OtpIssued> {
        let now = time::now();
        let session = self.sessions.get(payload.session_id).await?;

        if let Some((status, marked_at)) = self.existing_record(student_id, session.id).await? {
            return Err(Error::AlreadyMarked { status, marked_at });
        }

        if !session.accepts_requests_at(now, self.early_open) {
            let reason = if !session.is_active() {
                "Session is not currently active".to_string()
            } else {
                "Current time is outside the session window".to_string()
            };
            return Err(Error::SessionNotActive(reason));
        }

        self.devices
            .check(session.id, &payload.device_fingerprint.device_id, student_id)
            .await?;

        if let Some(reading) = payload.proximity.as_ref() {
            if let Some(claimed) = reading.beacon_uuid {
                if claimed != session.beacon_uuid {
                    return Err(Error::ProximityRejected(
                        "beacon does not match this session".to_string(),
                    ));
                }
            }
        }
        self.proximity
            .score(payload.proximity.as_ref())
            .map_err(Error::ProximityRejected)?;

        // One live OTP per key: reject with the remaining wait instead of
        // silently re-issuing. Expired or invalidated requests are
        // superseded by the upsert below.
        if let Some(prev) = self.pending.get(student_id, session.id).await? {
            if prev.is_live(now) {
                let wait_seconds = (prev.expires_at - now).num_seconds().max(1);
                return Err(Error::RateLimited { wait_seconds });
            }
        }

        let issued: IssuedOtp = self.otp.issue(student_id, session.id, now);
        self.pending
            .put(NewPendingRequest {
                student_id,
                session_id: session.id,
                device_id: payload.device_fingerprint.device_id.clone(),
                device_meta: payload.device_fingerprint.audit_meta(),
                proximity: payload
                    .proximity
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()?,
                otp_code: issued.code,
                issued_at: issued.issued_at,
                expires_at: issued.expires_at,
            })
            .await?;

        tracing::info!(
            %student_id,
            session_id = %session.id,
            expires_at = %issued.expires_at,
            "otp issued"
        );

        Ok(OtpIssued {
            expires_in_seconds: self.otp.ttl_seconds(),
            session,
        })
    }

    /// Verify-OTP protocol step. The persist-and-bind at the end is a
    /// single transaction whose unique indexes decide races; the loser of
    /// a race gets the same rejection it would have gotten from the
    /// up-front checks.
    pub async fn verify_otp(
        &self,
        student_id: Uuid,
        payload: &VerifyOtpPayload,
    ) -> Result<VerifiedAttendance> {
        let now = time::now();

        let Some(request) = self.pending.get(student_id, payload.session_id).await? else {
            return Err(Error::NoRequestFound);
        };

        if let Some((status, marked_at)) =
            self.existing_record(student_id, payload.session_id).await?
        {
            return Err(Error::AlreadyMarked { status, marked_at });
        }

        if request.invalidated {
            // Attempt-ceiling invalidation keeps its own reason; a row the
            // student cancelled reads as if no request exists.
            if request.attempts >= self.max_attempts {
                return Err(Error::TooManyAttempts);
            }
            return Err(Error::NoRequestFound);
        }
        if request.is_expired(now) {
            return Err(Error::OtpExpired);
        }

        if !codes_match(&payload.otp, &request.otp_code) {
            let attempts = self
                .pending
                .record_failed_attempt(request.id, self.max_attempts)
                .await?;
            if attempts >= self.max_attempts {
                tracing::warn!(
                    %student_id,
                    session_id = %payload.session_id,
                    attempts,
                    "otp attempt ceiling reached, request invalidated"
                );
                return Err(Error::TooManyAttempts);
            }
            return Err(Error::OtpMismatch {
                remaining_attempts: self.max_attempts - attempts,
            });
        }

        let session = self.sessions.get(payload.session_id).await?;
        let status = classify(now, session.start_time, session.grace());
        let late_by = minutes_late(now, session.start_time);

        let snapshot: Option<ProximityReading> = request
            .proximity
            .clone()
            .and_then(|v| serde_json::from_value(v).ok());
        let flags: Vec<&str> = snapshot
            .as_ref()
            .map(|r| self.proximity.audit_flags(r))
            .unwrap_or_default();
        let flags_json = if flags.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&flags)?)
        };

        let record = self
            .persist_record(&request, &session, status, now, late_by, flags_json)
            .await?;

        // The record is durable at this point; failing to retire the
        // pending row must not fail the verify.
        if let Err(e) = self.pending.mark_verified(request.id, now).await {
            tracing::warn!(error = ?e, request_id = %request.id, "could not retire pending request");
        }

        tracing::info!(
            %student_id,
            session_id = %session.id,
            status = %status,
            minutes_late = late_by,
            "attendance marked"
        );

        Ok(VerifiedAttendance { record, session })
    }

    /// Insert + device bind + counter bump in one transaction. Unique
    /// violations are translated into the taxonomy instead of surfacing as
    /// storage errors.
    async fn persist_record(
        &self,
        request: &crate::models::attendance_request::AttendanceRequest,
        session: &Session,
        status: AttendanceStatus,
        marked_at: DateTime<Utc>,
        late_by: i32,
        flags: Option<serde_json::Value>,
    ) -> Result<AttendanceRecord> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            INSERT INTO attendance_records (
                student_id, session_id, status, marked_at, method,
                device_id, device_meta, proximity, minutes_late, flags
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(request.student_id)
        .bind(request.session_id)
        .bind(status.as_str())
        .bind(marked_at)
        .bind(METHOD_BLUETOOTH)
        .bind(&request.device_id)
        .bind(&request.device_meta)
        .bind(&request.proximity)
        .bind(late_by)
        .bind(flags)
        .fetch_one(&mut *tx)
        .await;

        let record = match inserted {
            Ok(record) => record,
            Err(sqlx::Error::Database(db)) => {
                drop(tx);
                return Err(self
                    .map_unique_violation(db.constraint(), request)
                    .await);
            }
            Err(other) => return Err(other.into()),
        };

        sqlx::query(
            r#"UPDATE sessions SET attendance_count = attendance_count + 1, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(session.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// A lost race must look exactly like a pre-checked rejection.
    async fn map_unique_violation(
        &self,
        constraint: Option<&str>,
        request: &crate::models::attendance_request::AttendanceRequest,
    ) -> Error {
        match constraint {
            Some(RECORD_KEY_CONSTRAINT) => {
                match self
                    .existing_record(request.student_id, request.session_id)
                    .await
                {
                    Ok(Some((status, marked_at))) => Error::AlreadyMarked { status, marked_at },
                    Ok(None) | Err(_) => Error::AlreadyMarked {
                        status: AttendanceStatus::Present.as_str().to_string(),
                        marked_at: time::now(),
                    },
                }
            }
            Some(DEVICE_KEY_CONSTRAINT) => {
                match self
                    .devices
                    .bound_student(request.session_id, &request.device_id)
                    .await
                {
                    Ok(Some(bound)) => Error::DeviceReuseBlocked {
                        bound_student: bound,
                    },
                    _ => Error::Internal("device binding conflict".to_string()),
                }
            }
            other => Error::Internal(format!(
                "unexpected unique violation: {}",
                other.unwrap_or("<unnamed>")
            )),
        }
    }

    /// Early cancel of a pending request; the student can request a fresh
    /// OTP immediately afterwards.
    pub async fn cancel_request(&self, student_id: Uuid, session_id: Uuid) -> Result<bool> {
        let cancelled = self.pending.invalidate(student_id, session_id).await?;
        if cancelled {
            tracing::info!(%student_id, %session_id, "pending request cancelled");
        }
        Ok(cancelled)
    }

    async fn existing_record(
        &self,
        student_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<(String, DateTime<Utc>)>> {
        let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            r#"SELECT status, marked_at FROM attendance_records
               WHERE student_id = $1 AND session_id = $2"#,
        )
        .bind(student_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn session_roster(&self, session_id: Uuid) -> Result<Vec<SessionRosterEntry>> {
        let rows = sqlx::query_as::<_, AttendanceRecord>(
            r#"SELECT * FROM attendance_records WHERE session_id = $1 ORDER BY marked_at DESC"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SessionRosterEntry {
                id: r.id,
                student_id: r.student_id,
                status: r.status,
                marked_at: r.marked_at,
                method: r.method,
                device_id: r.device_id,
                minutes_late: r.minutes_late,
                flags: r.flags,
            })
            .collect())
    }

    pub async fn session_stats(&self, session_id: Uuid) -> Result<AttendanceStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT status, COUNT(*) FROM attendance_records WHERE session_id = $1 GROUP BY status"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = AttendanceStats::default();
        for (status, count) in rows {
            stats.total += count;
            match status.as_str() {
                "present" => stats.present = count,
                "late" => stats.late = count,
                "absent" => stats.absent = count,
                "excused" => stats.excused = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    pub async fn history(&self, student_id: Uuid, limit: i64) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT ar.id, ar.session_id, ar.status, ar.marked_at,
                   s.title AS session_title, s.subject AS session_subject
            FROM attendance_records ar
            JOIN sessions s ON s.id = ar.session_id
            WHERE ar.student_id = $1
            ORDER BY ar.marked_at DESC
            LIMIT $2
            "#,
        )
        .bind(student_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        time::from_rfc3339("2026-03-02T09:00:00Z").unwrap()
    }

    #[test]
    fn on_time_and_early_are_present() {
        let grace = Duration::minutes(15);
        assert_eq!(classify(start(), start(), grace), AttendanceStatus::Present);
        assert_eq!(
            classify(start() - Duration::seconds(1), start(), grace),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn within_grace_is_late() {
        let grace = Duration::minutes(15);
        assert_eq!(
            classify(start() + Duration::minutes(10), start(), grace),
            AttendanceStatus::Late
        );
        // Grace boundary is inclusive.
        assert_eq!(
            classify(start() + grace, start(), grace),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn beyond_grace_is_recorded_absent() {
        let grace = Duration::minutes(15);
        assert_eq!(
            classify(start() + grace + Duration::seconds(1), start(), grace),
            AttendanceStatus::Absent
        );
        assert_eq!(
            classify(start() + Duration::minutes(20), start(), grace),
            AttendanceStatus::Absent
        );
    }

    #[test]
    fn minutes_late_rounds_up_and_clamps_at_zero() {
        assert_eq!(minutes_late(start() - Duration::minutes(3), start()), 0);
        assert_eq!(minutes_late(start(), start()), 0);
        assert_eq!(minutes_late(start() + Duration::seconds(1), start()), 1);
        assert_eq!(minutes_late(start() + Duration::seconds(60), start()), 1);
        assert_eq!(minutes_late(start() + Duration::seconds(61), start()), 2);
    }
}
