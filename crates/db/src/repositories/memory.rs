use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use showroom_core::domain::preference::PreferenceRecord;
use showroom_core::domain::session::{SessionId, SessionState, UserId};

use super::{PreferenceRepository, RepositoryError, WorkingEntry, WorkingMemoryRepository};

#[derive(Default)]
pub struct InMemoryWorkingMemoryRepository {
    entries: RwLock<HashMap<(String, String), WorkingEntry>>,
}

impl InMemoryWorkingMemoryRepository {
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait::async_trait]
impl WorkingMemoryRepository for InMemoryWorkingMemoryRepository {
    async fn find(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<Option<WorkingEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(session_id.0.clone(), user_id.0.clone())).cloned())
    }

    async fn upsert(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        state: &SessionState,
    ) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            (session_id.0.clone(), user_id.0.clone()),
            WorkingEntry {
                session_id: session_id.clone(),
                user_id: user_id.clone(),
                state: state.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let mut entries = self.entries.write().await;
        let deleted = entries.len() as u64;
        entries.clear();
        Ok(deleted)
    }
}

#[derive(Default)]
pub struct InMemoryPreferenceRepository {
    records: RwLock<HashMap<String, PreferenceRecord>>,
}

impl InMemoryPreferenceRepository {
    pub async fn insert(&self, record: PreferenceRecord) {
        self.records.write().await.insert(record.user_id.0.clone(), record);
    }
}

#[async_trait::async_trait]
impl PreferenceRepository for InMemoryPreferenceRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<PreferenceRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&user_id.0).cloned())
    }

    async fn merge(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        state: &SessionState,
    ) -> Result<PreferenceRecord, RepositoryError> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let record = records
            .entry(user_id.0.clone())
            .or_insert_with(|| PreferenceRecord::new(user_id.clone(), now));
        record.absorb(session_id, state, now);
        Ok(record.clone())
    }
}
