use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use showroom_core::domain::session::SessionId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-session mutual exclusion. A turn holds its session's guard from hydrate
/// to persist; different sessions never contend.
#[derive(Default)]
pub struct SessionLocks {
    table: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

/// Held for the duration of one session critical section.
pub struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `session_id`. Waiters are served in the
    /// order they first polled this future.
    pub async fn acquire(&self, session_id: &SessionId) -> SessionGuard {
        let lock = self.lock_for(session_id);
        SessionGuard { _guard: lock.lock_owned().await }
    }

    /// Number of sessions with a live guard or waiter.
    pub fn active(&self) -> usize {
        let table = match self.table.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.values().filter(|lock| lock.strong_count() > 0).count()
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<AsyncMutex<()>> {
        let mut table = match self.table.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = table.get(&session_id.0).and_then(Weak::upgrade) {
            return existing;
        }

        table.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        table.insert(session_id.0.clone(), Arc::downgrade(&lock));
        lock
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use showroom_core::domain::session::SessionId;

    use super::SessionLocks;

    #[tokio::test]
    async fn same_session_is_serialised() {
        let locks = Arc::new(SessionLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&SessionId("shared".to_string())).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_sessions_do_not_block_each_other() {
        let locks = SessionLocks::new();
        let _first = locks.acquire(&SessionId("a".to_string())).await;

        let second = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(&SessionId("b".to_string())),
        )
        .await;

        assert!(second.is_ok(), "session b must not wait on session a");
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn released_sessions_are_pruned() {
        let locks = SessionLocks::new();
        {
            let _guard = locks.acquire(&SessionId("gone".to_string())).await;
        }
        assert_eq!(locks.active(), 0);

        let _guard = locks.acquire(&SessionId("fresh".to_string())).await;
        assert_eq!(locks.active(), 1);
    }
}
