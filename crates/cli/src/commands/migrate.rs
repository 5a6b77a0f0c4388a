use crate::commands::{open_store, prepare, CommandFailure, CommandResult};
use showroom_db::migrations::MIGRATOR;

pub fn run() -> CommandResult {
    let outcome = prepare().and_then(|(config, runtime)| {
        runtime.block_on(async {
            let pool = open_store(&config).await?;
            pool.close().await;
            Ok::<(), CommandFailure>(())
        })
    });

    match outcome {
        Ok(()) => CommandResult::success(
            "migrate",
            format!("schema up to date ({} migration(s) known)", MIGRATOR.iter().count()),
        ),
        Err(failure) => failure.into_result("migrate"),
    }
}
