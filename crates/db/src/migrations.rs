use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] =
        &["working_session", "preference_record", "idx_working_session_user_id"];

    #[tokio::test]
    async fn migrations_create_memory_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE name = ?")
                    .bind(object)
                    .fetch_one(&pool)
                    .await
                    .expect("inspect sqlite_master");
            assert_eq!(count, 1, "schema object `{object}` should exist after migrations");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn working_session_is_keyed_by_session_and_user() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let key_columns: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM pragma_table_info('working_session') WHERE pk > 0 ORDER BY pk",
        )
        .fetch_all(&pool)
        .await
        .expect("inspect primary key");
        assert_eq!(key_columns, vec!["session_id".to_string(), "user_id".to_string()]);

        pool.close().await;
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run is a no-op");
        pool.close().await;
    }
}
