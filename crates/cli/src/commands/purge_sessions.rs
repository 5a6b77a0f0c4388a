use std::sync::Arc;

use showroom_agent::MemoryReconciler;
use showroom_db::{SqlPreferenceRepository, SqlWorkingMemoryRepository};

use crate::commands::{open_store, prepare, CommandFailure, CommandResult};

/// Deletes every working-memory session. Preference records are kept, so a
/// returning user is still recognised afterwards.
pub fn run(confirm: bool) -> CommandResult {
    if !confirm {
        return CommandFailure::new(
            "confirmation_required",
            "refusing to delete all sessions without --confirm",
            6,
        )
        .into_result("purge-sessions");
    }

    let outcome = prepare().and_then(|(config, runtime)| {
        runtime.block_on(async {
            let pool = open_store(&config).await?;
            let memory = MemoryReconciler::new(
                Arc::new(SqlWorkingMemoryRepository::new(pool.clone())),
                Arc::new(SqlPreferenceRepository::new(pool.clone())),
            );
            let deleted = memory.delete_all_sessions().await;
            pool.close().await;
            deleted.map_err(|error| CommandFailure::new("persistence", error.to_string(), 7))
        })
    });

    match outcome {
        Ok(deleted) => CommandResult::success_with_data(
            "purge-sessions",
            format!("deleted {deleted} session(s); long-term preferences kept"),
            Some(serde_json::json!({ "deleted": deleted })),
        ),
        Err(failure) => failure.into_result("purge-sessions"),
    }
}
