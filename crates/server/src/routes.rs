//! Conversation HTTP surface.
//!
//! - `GET    /`                                     liveness and active extractor
//! - `POST   /chat`                                 submit one user turn
//! - `GET    /journey/{session_id}?user_id=`        read a session's journey
//! - `DELETE /sessions/all?confirm=delete-all-sessions` purge working memory

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use showroom_agent::{TurnController, TurnRequest};
use showroom_core::domain::session::JourneySnapshot;
use showroom_core::errors::{ApplicationError, InterfaceError};
use showroom_core::funnel::states::FunnelSignal;
use showroom_db::DbPool;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::health;

#[derive(Clone)]
pub struct ApiState {
    controller: Arc<TurnController>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub signals: Vec<FunnelSignal>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub state: JourneySnapshot,
    pub stage_advanced: bool,
}

#[derive(Debug, Deserialize)]
pub struct JourneyQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JourneyResponse {
    pub session_id: String,
    pub state: JourneySnapshot,
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    pub confirm: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub message: String,
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub status: &'static str,
    pub extractor: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

/// `InterfaceError` rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        Self(error.into_interface(Uuid::new_v4().to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = StatusCode::from_u16(error.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(
                event_name = "http.request_failed",
                correlation_id = %error.correlation_id,
                status = status.as_u16(),
                error = %error,
                "request failed"
            );
        } else {
            warn!(
                event_name = "http.request_rejected",
                correlation_id = %error.correlation_id,
                status = status.as_u16(),
                error = %error,
                "request rejected"
            );
        }

        let body = ErrorBody {
            error: error.user_message(),
            detail: error.message,
            correlation_id: error.correlation_id,
        };
        (status, Json(body)).into_response()
    }
}

/// Full application router: conversation API, health and the HTTP layers.
pub fn app_router(
    controller: Arc<TurnController>,
    db_pool: DbPool,
    allowed_origins: &[String],
) -> Router {
    let extractor = controller.extractor_name();
    api_router(controller)
        .merge(health::router(db_pool, extractor))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

pub fn api_router(controller: Arc<TurnController>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/chat", post(chat))
        .route("/journey/{session_id}", get(journey))
        .route("/sessions/all", delete(purge_sessions))
        .with_state(ApiState { controller })
}

pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(
                    event_name = "system.server.invalid_origin",
                    origin = %origin,
                    "ignoring unparseable CORS origin"
                );
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

async fn service_info(State(state): State<ApiState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "showroom",
        status: "ok",
        extractor: state.controller.extractor_name(),
    })
}

async fn chat(
    State(state): State<ApiState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let turn = state
        .controller
        .submit_turn(TurnRequest {
            user_id: body.user_id,
            session_id: body.session_id,
            message: body.message,
            signals: body.signals,
        })
        .await?;

    Ok(Json(ChatResponse {
        response: turn.reply,
        session_id: turn.session_id.0,
        state: turn.state,
        stage_advanced: turn.stage_advanced,
    }))
}

async fn journey(
    Path(session_id): Path<String>,
    Query(query): Query<JourneyQuery>,
    State(state): State<ApiState>,
) -> Result<Json<JourneyResponse>, ApiError> {
    let user_id = query.user_id.unwrap_or_default();
    let snapshot = state.controller.get_state(&session_id, &user_id).await?;
    Ok(Json(JourneyResponse { session_id, state: snapshot }))
}

async fn purge_sessions(
    Query(query): Query<PurgeQuery>,
    State(state): State<ApiState>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let deleted = state.controller.delete_all_sessions(query.confirm.as_deref()).await?;
    Ok(Json(PurgeResponse {
        success: true,
        message: format!("deleted {deleted} session(s); long-term preferences kept"),
        deleted,
    }))
}
