use crate::error::{Error, Result};
use sqlx::PgPool;
use uuid::Uuid;

/// Per-session device-to-student ledger, derived from verified attendance
/// records. Always consults the durable store so concurrent service
/// instances see the same bindings; the final bind itself is enforced by
/// the unique (session_id, device_id) index at insert time.
#[derive(Clone)]
pub struct DeviceLedger {
    pool: PgPool,
}

impl DeviceLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Verified-only policy: abandoned pending requests never block a
    /// device, only a persisted record does. Same student retrying with
    /// the same device is accepted.
    pub async fn check(&self, session_id: Uuid, device_id: &str, student_id: Uuid) -> Result<()> {
        match self.bound_student(session_id, device_id).await? {
            Some(bound) if bound != student_id => {
                tracing::warn!(
                    %session_id,
                    device_id,
                    %student_id,
                    bound_student = %bound,
                    "device reuse blocked"
                );
                Err(Error::DeviceReuseBlocked {
                    bound_student: bound,
                })
            }
            _ => Ok(()),
        }
    }

    pub async fn bound_student(&self, session_id: Uuid, device_id: &str) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"SELECT student_id FROM attendance_records WHERE session_id = $1 AND device_id = $2"#,
        )
        .bind(session_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }
}
