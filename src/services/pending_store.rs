use crate::error::Result;
use crate::models::attendance_request::AttendanceRequest;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::future::Future;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewPendingRequest {
    pub student_id: Uuid,
    pub session_id: Uuid,
    pub device_id: String,
    pub device_meta: Option<JsonValue>,
    pub proximity: Option<JsonValue>,
    pub otp_code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Storage seam for pending OTP requests. The engine owns the decision
/// logic; the store owns the at-most-one-live-row-per-key guarantee
/// (unique (student_id, session_id) in the Postgres implementation).
pub trait PendingRequestStore: Clone + Send + Sync + 'static {
    fn get(
        &self,
        student_id: Uuid,
        session_id: Uuid,
    ) -> impl Future<Output = Result<Option<AttendanceRequest>>> + Send;

    /// Upsert: a fresh issuance supersedes any previous request for the
    /// same key, resetting attempts and clearing invalidation.
    fn put(&self, req: NewPendingRequest) -> impl Future<Output = Result<AttendanceRequest>> + Send;

    /// Increments the attempt counter; once `max_attempts` is reached the
    /// request is invalidated in the same write. Returns the new count.
    fn record_failed_attempt(
        &self,
        id: Uuid,
        max_attempts: i32,
    ) -> impl Future<Output = Result<i32>> + Send;

    fn mark_verified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Early cancel by the student. Returns whether a live request existed.
    fn invalidate(
        &self,
        student_id: Uuid,
        session_id: Uuid,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Removes unverified rows whose expiry lies before `cutoff`.
    fn purge_expired(&self, cutoff: DateTime<Utc>) -> impl Future<Output = Result<u64>> + Send;
}

#[derive(Clone)]
pub struct PgPendingRequestStore {
    pool: PgPool,
}

impl PgPendingRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PendingRequestStore for PgPendingRequestStore {
    async fn get(&self, student_id: Uuid, session_id: Uuid) -> Result<Option<AttendanceRequest>> {
        let row = sqlx::query_as::<_, AttendanceRequest>(
            r#"SELECT * FROM attendance_requests WHERE student_id = $1 AND session_id = $2"#,
        )
        .bind(student_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn put(&self, req: NewPendingRequest) -> Result<AttendanceRequest> {
        let row = sqlx::query_as::<_, AttendanceRequest>(
            r#"
            INSERT INTO attendance_requests (
                student_id, session_id, device_id, device_meta, proximity,
                otp_code, issued_at, expires_at, attempts, invalidated, verified_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, FALSE, NULL)
            ON CONFLICT (student_id, session_id) DO UPDATE
            SET device_id = EXCLUDED.device_id,
                device_meta = EXCLUDED.device_meta,
                proximity = EXCLUDED.proximity,
                otp_code = EXCLUDED.otp_code,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at,
                attempts = 0,
                invalidated = FALSE,
                verified_at = NULL,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(req.student_id)
        .bind(req.session_id)
        .bind(req.device_id)
        .bind(req.device_meta)
        .bind(req.proximity)
        .bind(req.otp_code)
        .bind(req.issued_at)
        .bind(req.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_failed_attempt(&self, id: Uuid, max_attempts: i32) -> Result<i32> {
        let attempts: i32 = sqlx::query_scalar(
            r#"
            UPDATE attendance_requests
            SET attempts = attempts + 1,
                invalidated = (attempts + 1 >= $2),
                updated_at = NOW()
            WHERE id = $1
            RETURNING attempts
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"UPDATE attendance_requests SET verified_at = $2, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate(&self, student_id: Uuid, session_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE attendance_requests
            SET invalidated = TRUE, updated_at = NOW()
            WHERE student_id = $1 AND session_id = $2
              AND verified_at IS NULL AND invalidated = FALSE
            "#,
        )
        .bind(student_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM attendance_requests WHERE verified_at IS NULL AND expires_at < $1"#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory store used by engine unit tests.
    #[derive(Clone, Default)]
    pub struct MemoryPendingRequestStore {
        rows: Arc<Mutex<HashMap<(Uuid, Uuid), AttendanceRequest>>>,
    }

    impl PendingRequestStore for MemoryPendingRequestStore {
        async fn get(
            &self,
            student_id: Uuid,
            session_id: Uuid,
        ) -> Result<Option<AttendanceRequest>> {
            let rows = self.rows.lock().expect("pending store mutex poisoned");
            Ok(rows.get(&(student_id, session_id)).cloned())
        }

        async fn put(&self, req: NewPendingRequest) -> Result<AttendanceRequest> {
            let mut rows = self.rows.lock().expect("pending store mutex poisoned");
            let existing_id = rows
                .get(&(req.student_id, req.session_id))
                .map(|r| r.id);
            let row = AttendanceRequest {
                id: existing_id.unwrap_or_else(Uuid::new_v4),
                student_id: req.student_id,
                session_id: req.session_id,
                device_id: req.device_id,
                device_meta: req.device_meta,
                proximity: req.proximity,
                otp_code: req.otp_code,
                issued_at: req.issued_at,
                expires_at: req.expires_at,
                attempts: 0,
                invalidated: false,
                verified_at: None,
                created_at: Some(Utc::now()),
                updated_at: Some(Utc::now()),
            };
            rows.insert((row.student_id, row.session_id), row.clone());
            Ok(row)
        }

        async fn record_failed_attempt(&self, id: Uuid, max_attempts: i32) -> Result<i32> {
            let mut rows = self.rows.lock().expect("pending store mutex poisoned");
            let row = rows
                .values_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| crate::error::Error::NotFound("pending request".to_string()))?;
            row.attempts += 1;
            if row.attempts >= max_attempts {
                row.invalidated = true;
            }
            Ok(row.attempts)
        }

        async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
            let mut rows = self.rows.lock().expect("pending store mutex poisoned");
            if let Some(row) = rows.values_mut().find(|r| r.id == id) {
                row.verified_at = Some(at);
            }
            Ok(())
        }

        async fn invalidate(&self, student_id: Uuid, session_id: Uuid) -> Result<bool> {
            let mut rows = self.rows.lock().expect("pending store mutex poisoned");
            match rows.get_mut(&(student_id, session_id)) {
                Some(row) if row.verified_at.is_none() && !row.invalidated => {
                    row.invalidated = true;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
            let mut rows = self.rows.lock().expect("pending store mutex poisoned");
            let before = rows.len();
            rows.retain(|_, r| r.verified_at.is_some() || r.expires_at >= cutoff);
            Ok((before - rows.len()) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryPendingRequestStore;
    use super::*;
    use chrono::Duration;

    fn pending(student: Uuid, session: Uuid, code: &str, now: DateTime<Utc>) -> NewPendingRequest {
        NewPendingRequest {
            student_id: student,
            session_id: session,
            device_id: "device-a".to_string(),
            device_meta: None,
            proximity: None,
            otp_code: code.to_string(),
            issued_at: now,
            expires_at: now + Duration::seconds(90),
        }
    }

    #[tokio::test]
    async fn reissue_supersedes_previous_code_and_resets_attempts() {
        let store = MemoryPendingRequestStore::default();
        let (s, x) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let first = store.put(pending(s, x, "111111", now)).await.unwrap();
        store.record_failed_attempt(first.id, 3).await.unwrap();

        let second = store
            .put(pending(s, x, "222222", now + Duration::seconds(120)))
            .await
            .unwrap();
        assert_eq!(second.otp_code, "222222");
        assert_eq!(second.attempts, 0);
        assert!(!second.invalidated);

        // Only one row per key: the old code is gone.
        let current = store.get(s, x).await.unwrap().unwrap();
        assert_eq!(current.otp_code, "222222");
    }

    #[tokio::test]
    async fn attempt_ceiling_invalidates_the_request() {
        let store = MemoryPendingRequestStore::default();
        let (s, x) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let row = store.put(pending(s, x, "111111", now)).await.unwrap();

        assert_eq!(store.record_failed_attempt(row.id, 3).await.unwrap(), 1);
        assert_eq!(store.record_failed_attempt(row.id, 3).await.unwrap(), 2);
        assert!(!store.get(s, x).await.unwrap().unwrap().invalidated);

        assert_eq!(store.record_failed_attempt(row.id, 3).await.unwrap(), 3);
        let row = store.get(s, x).await.unwrap().unwrap();
        assert!(row.invalidated);
        assert!(!row.is_live(now));
    }

    #[tokio::test]
    async fn invalidate_is_reported_once() {
        let store = MemoryPendingRequestStore::default();
        let (s, x) = (Uuid::new_v4(), Uuid::new_v4());
        store.put(pending(s, x, "111111", Utc::now())).await.unwrap();

        assert!(store.invalidate(s, x).await.unwrap());
        assert!(!store.invalidate(s, x).await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_unverified_rows() {
        let store = MemoryPendingRequestStore::default();
        let now = Utc::now();
        let (s1, s2, x) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store.put(pending(s1, x, "111111", now - Duration::hours(2))).await.unwrap();
        store.put(pending(s2, x, "222222", now)).await.unwrap();

        let purged = store.purge_expired(now - Duration::hours(1)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(s1, x).await.unwrap().is_none());
        assert!(store.get(s2, x).await.unwrap().is_some());
    }
}
