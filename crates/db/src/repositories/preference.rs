use chrono::Utc;

use showroom_core::domain::preference::PreferenceRecord;
use showroom_core::domain::session::{SessionId, SessionState, UserId};

use super::{decode_json, encode_json, PreferenceRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPreferenceRepository {
    pool: DbPool,
}

impl SqlPreferenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PreferenceRepository for SqlPreferenceRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<PreferenceRecord>, RepositoryError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT record_json FROM preference_record WHERE user_id = ?")
                .bind(&user_id.0)
                .fetch_optional(&self.pool)
                .await?;

        raw.as_deref().map(decode_json::<PreferenceRecord>).transpose()
    }

    async fn merge(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        state: &SessionState,
    ) -> Result<PreferenceRecord, RepositoryError> {
        let now = Utc::now();
        // take the write lock up front; a deferred read snapshot cannot be
        // upgraded once another connection has committed
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let raw: Option<String> =
            sqlx::query_scalar("SELECT record_json FROM preference_record WHERE user_id = ?")
                .bind(&user_id.0)
                .fetch_optional(&mut *tx)
                .await?;

        let mut record = match raw {
            Some(raw) => decode_json::<PreferenceRecord>(&raw)?,
            None => PreferenceRecord::new(user_id.clone(), now),
        };
        record.absorb(session_id, state, now);

        sqlx::query(
            "INSERT INTO preference_record (user_id, record_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
                record_json = excluded.record_json, \
                updated_at = excluded.updated_at",
        )
        .bind(&user_id.0)
        .bind(encode_json(&record)?)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use showroom_core::domain::session::{SessionId, SessionState, UserId};
    use showroom_core::funnel::states::FunnelStage;

    use super::SqlPreferenceRepository;
    use crate::migrations::run_pending;
    use crate::repositories::PreferenceRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn merge_creates_then_updates_record_field_wise() {
        let pool = setup().await;
        let repo = SqlPreferenceRepository::new(pool.clone());
        let user = UserId("alice".to_string());

        let mut first = SessionState::default();
        first.slots.brand = Some("Audi".to_string());
        first.slots.body = Some("SUV".to_string());
        first.stage = Some(FunnelStage::Intake);
        let created = repo
            .merge(&user, &SessionId("s1".to_string()), &first)
            .await
            .expect("first merge");

        let mut second = SessionState::default();
        second.slots.body = Some("sedan".to_string());
        second.stage = Some(FunnelStage::Shortlist);
        let updated = repo
            .merge(&user, &SessionId("s2".to_string()), &second)
            .await
            .expect("second merge");

        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.slots.brand.as_deref(), Some("Audi"));
        assert_eq!(updated.slots.body.as_deref(), Some("sedan"));
        assert_eq!(updated.furthest_stage(), Some(FunnelStage::Shortlist));
        assert_eq!(updated.stage_history.len(), 2);

        let stored = repo.find(&user).await.expect("find").expect("record exists");
        assert_eq!(stored, updated);

        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_user_has_no_record() {
        let pool = setup().await;
        let repo = SqlPreferenceRepository::new(pool.clone());

        assert!(repo.find(&UserId("ghost".to_string())).await.expect("find").is_none());

        pool.close().await;
    }
}
