use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use showroom_db::DbPool;

#[derive(Clone)]
struct HealthState {
    db_pool: DbPool,
    extractor: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub ready: bool,
    pub detail: String,
}

impl Probe {
    fn ready(detail: impl Into<String>) -> Self {
        Self { ready: true, detail: detail.into() }
    }

    fn down(detail: impl Into<String>) -> Self {
        Self { ready: false, detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub extractor: &'static str,
    pub probes: BTreeMap<&'static str, Probe>,
    pub checked_at: String,
}

/// `GET /health`: 200 when the session store is usable, 503 otherwise.
pub fn router(db_pool: DbPool, extractor: &'static str) -> Router {
    Router::new().route("/health", get(readiness)).with_state(HealthState { db_pool, extractor })
}

async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<Readiness>) {
    let mut probes = BTreeMap::new();
    let database = probe_database(&state.db_pool).await;
    let schema = if database.ready {
        probe_schema(&state.db_pool).await
    } else {
        Probe::down("not checked; database unreachable")
    };
    probes.insert("database", database);
    probes.insert("session_schema", schema);

    let ready = probes.values().all(|probe| probe.ready);
    let body = Readiness {
        status: if ready { "ready" } else { "degraded" },
        extractor: state.extractor,
        probes,
        checked_at: Utc::now().to_rfc3339(),
    };
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

async fn probe_database(pool: &DbPool) -> Probe {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => Probe::ready("query succeeded"),
        Err(error) => Probe::down(format!("query failed: {error}")),
    }
}

async fn probe_schema(pool: &DbPool) -> Probe {
    let tables = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master \
         WHERE type = 'table' AND name IN ('working_session', 'preference_record')",
    )
    .fetch_one(pool)
    .await;

    match tables {
        Ok(2) => Probe::ready("working and long-term memory tables present"),
        Ok(_) => Probe::down("memory tables missing; run `showroom migrate`"),
        Err(error) => Probe::down(format!("schema inspection failed: {error}")),
    }
}
