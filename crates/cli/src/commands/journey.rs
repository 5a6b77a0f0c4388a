use std::sync::Arc;

use showroom_agent::MemoryReconciler;
use showroom_core::domain::session::{SessionId, UserId};
use showroom_db::{SqlPreferenceRepository, SqlWorkingMemoryRepository};

use crate::commands::{open_store, prepare, CommandFailure, CommandResult};

/// Prints the journey of one session as JSON. Unknown sessions, and sessions
/// owned by another user, read as the empty default journey.
pub fn run(session_id: &str, user_id: &str) -> CommandResult {
    if session_id.trim().is_empty() || user_id.trim().is_empty() {
        return CommandFailure::new("invalid_input", "both --session and --user are required", 2)
            .into_result("journey");
    }

    let session = SessionId(session_id.trim().to_string());
    let user = UserId(user_id.trim().to_string());

    let outcome = prepare().and_then(|(config, runtime)| {
        runtime.block_on(async {
            let pool = open_store(&config).await?;
            let memory = MemoryReconciler::new(
                Arc::new(SqlWorkingMemoryRepository::new(pool.clone())),
                Arc::new(SqlPreferenceRepository::new(pool.clone())),
            );
            let state = memory.current(&session, &user).await;
            pool.close().await;
            Ok::<_, CommandFailure>(state)
        })
    });

    match outcome {
        Ok(state) => {
            let stage =
                state.stage.map(|stage| stage.to_string()).unwrap_or_else(|| "none".to_string());
            let snapshot = serde_json::to_value(state.snapshot()).ok();
            CommandResult::success_with_data(
                "journey",
                format!(
                    "session `{session}` at stage {stage} after {} turn(s)",
                    state.history.len()
                ),
                snapshot,
            )
        }
        Err(failure) => failure.into_result("journey"),
    }
}
