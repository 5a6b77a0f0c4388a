use std::sync::Arc;
use std::time::Duration;

use showroom_core::domain::session::{SessionId, SessionState, SlotName, UserId};
use showroom_db::{PreferenceRepository, RepositoryError, WorkingMemoryRepository};
use tracing::{debug, error, warn};

/// Where a turn's starting state came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HydrationSource {
    Working,
    Preference,
    Fresh,
}

impl HydrationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Preference => "preference",
            Self::Fresh => "fresh",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hydrated {
    pub state: SessionState,
    pub source: HydrationSource,
    pub seeded: Vec<SlotName>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub working_saved: bool,
    pub preferences_saved: bool,
}

/// Two-tier memory: working state per session, preferences per user.
pub struct MemoryReconciler {
    working: Arc<dyn WorkingMemoryRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    retry_delay: Duration,
}

impl MemoryReconciler {
    pub fn new(
        working: Arc<dyn WorkingMemoryRepository>,
        preferences: Arc<dyn PreferenceRepository>,
    ) -> Self {
        Self { working, preferences, retry_delay: Duration::from_millis(100) }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Loads the state a turn starts from. Store failures degrade to "no prior
    /// state"; a brand-new session is seeded from the user's preferences.
    pub async fn hydrate(&self, session_id: &SessionId, user_id: &UserId) -> Hydrated {
        if let Some(state) = self.read_working(session_id, user_id).await {
            return Hydrated { state, source: HydrationSource::Working, seeded: Vec::new() };
        }

        let mut state = SessionState::default();
        match self.preferences.find(user_id).await {
            Ok(Some(record)) => {
                let seeded = record.seed(&mut state);
                debug!(
                    event_name = "memory.seeded_from_preferences",
                    session_id = %session_id,
                    user_id = %user_id,
                    seeded = ?seeded,
                    "new session seeded from long-term memory"
                );
                Hydrated { state, source: HydrationSource::Preference, seeded }
            }
            Ok(None) => Hydrated { state, source: HydrationSource::Fresh, seeded: Vec::new() },
            Err(read_error) => {
                warn!(
                    event_name = "memory.preference_read_failed",
                    session_id = %session_id,
                    user_id = %user_id,
                    error = %read_error,
                    "long-term memory unavailable; starting without defaults"
                );
                Hydrated { state, source: HydrationSource::Fresh, seeded: Vec::new() }
            }
        }
    }

    /// Current snapshot for a read-only caller; never seeds and never writes.
    pub async fn current(&self, session_id: &SessionId, user_id: &UserId) -> SessionState {
        self.read_working(session_id, user_id).await.unwrap_or_default()
    }

    /// Writes working memory (full replace) and merges long-term memory. Each
    /// write is retried once; failures are logged, never returned.
    pub async fn persist(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        state: &SessionState,
        correlation_id: &str,
    ) -> PersistOutcome {
        let working_saved = self
            .with_single_retry("working", session_id, correlation_id, move || async move {
                self.working.upsert(session_id, user_id, state).await
            })
            .await;

        let preferences_saved = self
            .with_single_retry("preference", session_id, correlation_id, move || async move {
                self.preferences.merge(user_id, session_id, state).await.map(|_| ())
            })
            .await;

        PersistOutcome { working_saved, preferences_saved }
    }

    pub async fn delete_all_sessions(&self) -> Result<u64, RepositoryError> {
        self.working.delete_all().await
    }

    async fn read_working(&self, session_id: &SessionId, user_id: &UserId) -> Option<SessionState> {
        match self.working.find(session_id, user_id).await {
            Ok(entry) => entry.map(|entry| entry.state),
            Err(read_error) => {
                warn!(
                    event_name = "memory.working_read_failed",
                    session_id = %session_id,
                    user_id = %user_id,
                    error = %read_error,
                    "working memory unavailable; treating as no prior state"
                );
                None
            }
        }
    }

    async fn with_single_retry<F, Fut>(
        &self,
        store: &'static str,
        session_id: &SessionId,
        correlation_id: &str,
        mut write: F,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), RepositoryError>>,
    {
        let first_error = match write().await {
            Ok(()) => return true,
            Err(first_error) => first_error,
        };

        warn!(
            event_name = "memory.write_failed",
            correlation_id = %correlation_id,
            session_id = %session_id,
            store,
            error = %first_error,
            "memory write failed; retrying once"
        );
        tokio::time::sleep(self.retry_delay).await;

        match write().await {
            Ok(()) => true,
            Err(retry_error) => {
                error!(
                    event_name = "memory.write_abandoned",
                    correlation_id = %correlation_id,
                    session_id = %session_id,
                    store,
                    error = %retry_error,
                    "memory write failed after retry"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use showroom_core::domain::preference::PreferenceRecord;
    use showroom_core::domain::session::{SessionId, SessionState, SlotName, UserId};
    use showroom_db::{
        InMemoryPreferenceRepository, InMemoryWorkingMemoryRepository, PreferenceRepository,
        RepositoryError, WorkingEntry, WorkingMemoryRepository,
    };

    use super::{HydrationSource, MemoryReconciler};

    /// Fails the first `failures` calls of every operation.
    struct FlakyWorking {
        inner: InMemoryWorkingMemoryRepository,
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyWorking {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryWorkingMemoryRepository::default(),
                failures,
                calls: AtomicUsize::new(0),
            }
        }

        fn trip(&self) -> Result<(), RepositoryError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(RepositoryError::Unavailable("disk on fire".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl WorkingMemoryRepository for FlakyWorking {
        async fn find(
            &self,
            session_id: &SessionId,
            user_id: &UserId,
        ) -> Result<Option<WorkingEntry>, RepositoryError> {
            self.trip()?;
            self.inner.find(session_id, user_id).await
        }

        async fn upsert(
            &self,
            session_id: &SessionId,
            user_id: &UserId,
            state: &SessionState,
        ) -> Result<(), RepositoryError> {
            self.trip()?;
            self.inner.upsert(session_id, user_id, state).await
        }

        async fn delete_all(&self) -> Result<u64, RepositoryError> {
            self.inner.delete_all().await
        }
    }

    fn ids() -> (SessionId, UserId) {
        (SessionId("session_memory".to_string()), UserId("alice".to_string()))
    }

    async fn audi_preferences() -> Arc<InMemoryPreferenceRepository> {
        let preferences = Arc::new(InMemoryPreferenceRepository::default());
        let mut record = PreferenceRecord::new(UserId("alice".to_string()), chrono::Utc::now());
        record.slots.brand = Some("Audi".to_string());
        preferences.insert(record).await;
        preferences
    }

    #[tokio::test]
    async fn new_session_is_seeded_from_preferences() {
        let (session, user) = ids();
        let reconciler = MemoryReconciler::new(
            Arc::new(InMemoryWorkingMemoryRepository::default()),
            audi_preferences().await,
        );

        let hydrated = reconciler.hydrate(&session, &user).await;

        assert_eq!(hydrated.source, HydrationSource::Preference);
        assert_eq!(hydrated.seeded, vec![SlotName::Brand]);
        assert_eq!(hydrated.state.slots.brand.as_deref(), Some("Audi"));
    }

    #[tokio::test]
    async fn existing_session_is_not_reseeded() {
        let (session, user) = ids();
        let working = Arc::new(InMemoryWorkingMemoryRepository::default());
        let mut state = SessionState::default();
        state.slots.brand = Some("BMW".to_string());
        working.upsert(&session, &user, &state).await.expect("seed working");
        let reconciler = MemoryReconciler::new(working, audi_preferences().await);

        let hydrated = reconciler.hydrate(&session, &user).await;

        assert_eq!(hydrated.source, HydrationSource::Working);
        assert_eq!(hydrated.state.slots.brand.as_deref(), Some("BMW"));
    }

    #[tokio::test]
    async fn foreign_session_id_is_treated_as_fresh() {
        let (session, _) = ids();
        let working = Arc::new(InMemoryWorkingMemoryRepository::default());
        let mut state = SessionState::default();
        state.slots.fuel = Some("diesel".to_string());
        working.upsert(&session, &UserId("mallory".to_string()), &state).await.expect("seed");
        let reconciler = MemoryReconciler::new(
            working,
            Arc::new(InMemoryPreferenceRepository::default()),
        );

        let hydrated = reconciler.hydrate(&session, &UserId("bob".to_string())).await;

        assert_eq!(hydrated.source, HydrationSource::Fresh);
        assert_eq!(hydrated.state, SessionState::default());
    }

    #[tokio::test]
    async fn reused_session_id_leaves_owner_state_intact() {
        let (session, alice) = ids();
        let bob = UserId("bob".to_string());
        let working = Arc::new(InMemoryWorkingMemoryRepository::default());
        let reconciler =
            MemoryReconciler::new(working, Arc::new(InMemoryPreferenceRepository::default()));
        let mut owned = SessionState::default();
        owned.slots.fuel = Some("diesel".to_string());
        reconciler.persist(&session, &alice, &owned, "corr-owner").await;

        reconciler.persist(&session, &bob, &SessionState::default(), "corr-other").await;

        assert_eq!(reconciler.current(&session, &alice).await, owned);
        assert_eq!(reconciler.current(&session, &bob).await, SessionState::default());
    }

    #[tokio::test]
    async fn working_read_failure_falls_back_to_preferences() {
        let (session, user) = ids();
        let reconciler =
            MemoryReconciler::new(Arc::new(FlakyWorking::new(1)), audi_preferences().await);

        let hydrated = reconciler.hydrate(&session, &user).await;

        assert_eq!(hydrated.source, HydrationSource::Preference);
        assert_eq!(hydrated.state.slots.brand.as_deref(), Some("Audi"));
    }

    #[tokio::test]
    async fn write_is_retried_once_then_succeeds() {
        let (session, user) = ids();
        let working = Arc::new(FlakyWorking::new(1));
        let preferences = Arc::new(InMemoryPreferenceRepository::default());
        let reconciler = MemoryReconciler::new(working.clone(), preferences.clone())
            .with_retry_delay(Duration::from_millis(1));
        let mut state = SessionState::default();
        state.slots.seats_min = Some(5);

        let outcome = reconciler.persist(&session, &user, &state, "corr-1").await;

        assert!(outcome.working_saved);
        assert!(outcome.preferences_saved);
        assert_eq!(working.calls.load(Ordering::SeqCst), 2);
        let stored = preferences.find(&user).await.expect("find").expect("record");
        assert_eq!(stored.slots.seats_min, Some(5));
    }

    #[tokio::test]
    async fn persistent_write_failure_is_reported_not_raised() {
        let (session, user) = ids();
        let reconciler = MemoryReconciler::new(
            Arc::new(FlakyWorking::new(usize::MAX)),
            Arc::new(InMemoryPreferenceRepository::default()),
        )
        .with_retry_delay(Duration::from_millis(1));

        let outcome = reconciler.persist(&session, &user, &SessionState::default(), "corr-2").await;

        assert!(!outcome.working_saved);
        assert!(outcome.preferences_saved);
    }
}
