use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use showroom_core::domain::preference::PreferenceRecord;
use showroom_core::domain::session::{SessionId, SessionState, UserId};

pub mod memory;
pub mod preference;
pub mod session;

pub use memory::{InMemoryPreferenceRepository, InMemoryWorkingMemoryRepository};
pub use preference::SqlPreferenceRepository;
pub use session::SqlWorkingMemoryRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A persisted session snapshot together with the user it was written for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingEntry {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub state: SessionState,
    pub updated_at: DateTime<Utc>,
}

/// Short-lived store keyed by (session id, user id). Writes replace the whole
/// entry; a session id reused by another user never touches the owner's entry.
#[async_trait]
pub trait WorkingMemoryRepository: Send + Sync {
    async fn find(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<Option<WorkingEntry>, RepositoryError>;

    async fn upsert(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        state: &SessionState,
    ) -> Result<(), RepositoryError>;

    /// Removes every working entry and returns how many were deleted.
    async fn delete_all(&self) -> Result<u64, RepositoryError>;
}

/// Cross-session, per-user store. Writes merge field-wise into the stored record.
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn find(&self, user_id: &UserId) -> Result<Option<PreferenceRecord>, RepositoryError>;

    async fn merge(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        state: &SessionState,
    ) -> Result<PreferenceRecord, RepositoryError>;
}

pub(crate) fn encode_json<T>(value: &T) -> Result<String, RepositoryError>
where
    T: serde::Serialize,
{
    serde_json::to_string(value).map_err(|error| RepositoryError::Decode(error.to_string()))
}

pub(crate) fn decode_json<T>(raw: &str) -> Result<T, RepositoryError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(raw).map_err(|error| RepositoryError::Decode(error.to_string()))
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}
