use crate::error::{Error, Result};
use crate::models::session::Session;
use sqlx::PgPool;
use uuid::Uuid;

/// Read-only view onto the session directory. Session CRUD and scheduling
/// live outside this service; the engine only looks windows up and bumps
/// the attendance counter.
#[derive(Clone)]
pub struct SessionService {
    pool: PgPool,
}

impl SessionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Session> {
        sqlx::query_as::<_, Session>(r#"SELECT * FROM sessions WHERE id = $1"#)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))
    }

    /// Teacher-facing lookup with ownership enforcement.
    pub async fn get_owned(&self, session_id: Uuid, teacher_id: Uuid) -> Result<Session> {
        let session = self.get(session_id).await?;
        if session.teacher_id != teacher_id {
            return Err(Error::Forbidden(
                "You do not own this session".to_string(),
            ));
        }
        Ok(session)
    }
}
