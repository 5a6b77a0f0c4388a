use chrono::Utc;
use sqlx::Row;

use showroom_core::domain::session::{SessionId, SessionState, UserId};

use super::{
    decode_json, decode_timestamp, encode_json, RepositoryError, WorkingEntry,
    WorkingMemoryRepository,
};
use crate::DbPool;

pub struct SqlWorkingMemoryRepository {
    pool: DbPool,
}

impl SqlWorkingMemoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WorkingMemoryRepository for SqlWorkingMemoryRepository {
    async fn find(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<Option<WorkingEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT session_id, user_id, state_json, updated_at \
             FROM working_session WHERE session_id = ? AND user_id = ?",
        )
        .bind(&session_id.0)
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_json: String = row.try_get("state_json")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(Some(WorkingEntry {
            session_id: SessionId(row.try_get("session_id")?),
            user_id: UserId(row.try_get("user_id")?),
            state: decode_json::<SessionState>(&state_json)?,
            updated_at: decode_timestamp(&updated_at)?,
        }))
    }

    async fn upsert(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        state: &SessionState,
    ) -> Result<(), RepositoryError> {
        let state_json = encode_json(state)?;
        let stage = state.stage.map(|stage| stage.as_str());

        sqlx::query(
            "INSERT INTO working_session (session_id, user_id, state_json, stage, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(session_id, user_id) DO UPDATE SET \
                state_json = excluded.state_json, \
                stage = excluded.stage, \
                updated_at = excluded.updated_at",
        )
        .bind(&session_id.0)
        .bind(&user_id.0)
        .bind(state_json)
        .bind(stage)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM working_session").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
