use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use showroom_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use showroom_core::config::ConversationConfig;
use showroom_core::domain::session::{JourneySnapshot, SessionId, TurnRole, UserId};
use showroom_core::errors::ApplicationError;
use showroom_core::funnel::engine::{FunnelEngine, SalesFunnel};
use showroom_core::funnel::states::{FunnelContext, FunnelSignal, TransitionKind};
use showroom_core::merge::StateMerger;
use showroom_db::{PreferenceRepository, WorkingMemoryRepository};
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::extraction::{ExtractionAdapter, SlotExtractor};
use crate::locks::{SessionGuard, SessionLocks};
use crate::memory::MemoryReconciler;
use crate::reply::ReplyComposer;

/// Confirmation token the caller must echo to delete every session.
pub const DELETE_ALL_CONFIRMATION: &str = "delete-all-sessions";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnSettings {
    pub history_window: usize,
    pub nlu_timeout: Duration,
    pub fallback_reply: String,
}

impl From<&ConversationConfig> for TurnSettings {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            history_window: config.history_window,
            nlu_timeout: Duration::from_secs(config.nlu_timeout_secs),
            fallback_reply: config.fallback_reply.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub signals: Vec<FunnelSignal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub session_id: SessionId,
    pub reply: String,
    pub state: JourneySnapshot,
    pub stage_advanced: bool,
}

struct TurnCore {
    extraction: ExtractionAdapter,
    merger: StateMerger,
    funnel: FunnelEngine<SalesFunnel>,
    composer: ReplyComposer,
    memory: MemoryReconciler,
    locks: SessionLocks,
    audit: Arc<dyn AuditSink>,
    fallback_reply: String,
}

struct PendingTurn {
    session_id: SessionId,
    user_id: UserId,
    message: String,
    signals: Vec<FunnelSignal>,
    correlation_id: String,
}

/// Orchestrates one turn: hydrate, extract, merge, transition, reply, persist.
/// The session lock is taken before the turn task is spawned, so turns of one
/// session run in the order their submissions reached the lock. The task then
/// owns the guard; a caller that goes away mid-turn cannot leave state half
/// written.
pub struct TurnController {
    core: Arc<TurnCore>,
    tracker: TaskTracker,
}

impl TurnController {
    pub fn new(
        extractor: Arc<dyn SlotExtractor>,
        working: Arc<dyn WorkingMemoryRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        settings: TurnSettings,
    ) -> Self {
        Self::with_audit_sink(extractor, working, preferences, settings, Arc::new(NoopAuditSink))
    }

    pub fn with_audit_sink(
        extractor: Arc<dyn SlotExtractor>,
        working: Arc<dyn WorkingMemoryRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        settings: TurnSettings,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let core = TurnCore {
            extraction: ExtractionAdapter::new(
                extractor,
                settings.nlu_timeout,
                settings.history_window,
            ),
            merger: StateMerger::new(),
            funnel: FunnelEngine::default(),
            composer: ReplyComposer::new(),
            memory: MemoryReconciler::new(working, preferences),
            locks: SessionLocks::new(),
            audit,
            fallback_reply: settings.fallback_reply,
        };
        Self { core: Arc::new(core), tracker: TaskTracker::new() }
    }

    pub fn extractor_name(&self) -> &'static str {
        self.core.extraction.extractor_name()
    }

    pub async fn submit_turn(
        &self,
        request: TurnRequest,
    ) -> Result<TurnResponse, ApplicationError> {
        let user_id = required_field("user_id", &request.user_id)?;
        let message = required_field("message", &request.message)?;
        let session_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| SessionId(value.to_string()))
            .unwrap_or_else(new_session_id);

        let pending = PendingTurn {
            session_id,
            user_id: UserId(user_id),
            message,
            signals: request.signals,
            correlation_id: Uuid::new_v4().to_string(),
        };

        info!(
            event_name = "turn.received",
            correlation_id = %pending.correlation_id,
            session_id = %pending.session_id,
            user_id = %pending.user_id,
            message_chars = pending.message.chars().count(),
            signals = ?pending.signals,
            "turn received"
        );

        let guard = self.core.locks.acquire(&pending.session_id).await;
        let (reply_tx, reply_rx) = oneshot::channel();
        let core = Arc::clone(&self.core);
        self.tracker.spawn(async move {
            core.run_turn(pending, guard, reply_tx).await;
        });

        reply_rx.await.map_err(|_| {
            ApplicationError::Integration("turn task ended before producing a reply".to_string())
        })
    }

    /// Current journey for `session_id`, or an empty default when unknown.
    pub async fn get_state(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<JourneySnapshot, ApplicationError> {
        let user_id = UserId(required_field("user_id", user_id)?);
        let session_id = SessionId(required_field("session_id", session_id)?);

        let _guard = self.core.locks.acquire(&session_id).await;
        let state = self.core.memory.current(&session_id, &user_id).await;
        Ok(state.snapshot())
    }

    /// Clears all working memory. Long-term preferences are untouched.
    pub async fn delete_all_sessions(
        &self,
        confirmation: Option<&str>,
    ) -> Result<u64, ApplicationError> {
        if confirmation.map(str::trim) != Some(DELETE_ALL_CONFIRMATION) {
            return Err(ApplicationError::ConfirmationRequired(format!(
                "pass confirm={DELETE_ALL_CONFIRMATION} to delete all sessions"
            )));
        }

        let deleted = self
            .core
            .memory
            .delete_all_sessions()
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        let correlation_id = Uuid::new_v4().to_string();
        warn!(
            event_name = "sessions.deleted_all",
            correlation_id = %correlation_id,
            deleted,
            "all working-memory sessions deleted"
        );
        let context = AuditContext::new(None, None, correlation_id, "administrator");
        self.core.audit.emit(
            AuditEvent::new(
                &context,
                "sessions.deleted_all",
                AuditCategory::Session,
                AuditOutcome::Success,
            )
            .with_metadata("deleted", deleted.to_string()),
        );
        Ok(deleted)
    }

    /// Waits for every in-flight turn, including its persistence, to finish.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Waits up to `grace` for in-flight turns. Returns false when the grace
    /// period ran out first.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let in_flight = self.tracker.len();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if drained {
            info!(event_name = "turns.drained", in_flight, "in-flight turns finished");
        } else {
            warn!(
                event_name = "turns.drain_timeout",
                in_flight,
                remaining = self.tracker.len(),
                "shutdown grace period elapsed with turns still running"
            );
        }
        drained
    }
}

impl TurnCore {
    async fn run_turn(
        &self,
        turn: PendingTurn,
        _guard: SessionGuard,
        reply_tx: oneshot::Sender<TurnResponse>,
    ) {
        let PendingTurn { session_id, user_id, message, signals, correlation_id } = turn;

        let hydrated = self.memory.hydrate(&session_id, &user_id).await;
        debug!(
            event_name = "turn.hydrated",
            correlation_id = %correlation_id,
            session_id = %session_id,
            source = hydrated.source.as_str(),
            "session state hydrated"
        );
        let mut state = hydrated.state;
        let first_turn = state.is_fresh();

        let extraction =
            self.extraction.propose(&state, &message, &session_id, &correlation_id).await;
        let mut candidate = extraction.candidate;
        for signal in signals {
            candidate = candidate.with_signal(signal);
        }

        state.record_turn(TurnRole::User, message);
        let report = self.merger.merge(&mut state, &candidate);
        for rejection in &report.rejected {
            warn!(
                event_name = "merge.slot_rejected",
                correlation_id = %correlation_id,
                session_id = %session_id,
                slot = %rejection.key,
                value = %rejection.value,
                reason = ?rejection.reason,
                "candidate slot value dropped"
            );
        }

        let context = FunnelContext {
            first_turn,
            signals: candidate.signals.clone(),
            quiet_turn: candidate.is_empty(),
        };
        let audit = AuditContext::new(
            Some(session_id.clone()),
            Some(user_id.clone()),
            correlation_id.clone(),
            "turn_controller",
        );
        let transition =
            self.funnel.advance_with_audit(&mut state, &context, self.audit.as_ref(), &audit);
        let outcome = match transition {
            Ok(outcome) => outcome,
            Err(domain_error) => {
                error!(
                    event_name = "funnel.transition_rejected",
                    correlation_id = %correlation_id,
                    session_id = %session_id,
                    error = %domain_error,
                    "stage transition rejected; stage left unchanged"
                );
                self.funnel.evaluate(&state, &FunnelContext { quiet_turn: true, ..context })
            }
        };

        if outcome.advanced() {
            info!(
                event_name = "funnel.stage_advanced",
                correlation_id = %correlation_id,
                session_id = %session_id,
                from = outcome.from.map(|stage| stage.as_str()).unwrap_or("none"),
                to = outcome.to.as_str(),
                "stage advanced"
            );
        }

        let reply = if extraction.fell_back {
            self.composer.compose_fallback(&self.fallback_reply, &state, &outcome)
        } else {
            match candidate.reply.clone() {
                Some(reply) if outcome.kind != TransitionKind::Advanced => reply,
                Some(reply) => format!("{reply} {}", self.composer.compose(&state, &outcome)),
                None => self.composer.compose(&state, &outcome),
            }
        };
        state.record_turn(TurnRole::Assistant, reply.clone());

        let response = TurnResponse {
            session_id: session_id.clone(),
            reply,
            state: state.snapshot(),
            stage_advanced: outcome.advanced(),
        };
        if reply_tx.send(response).is_err() {
            debug!(
                event_name = "turn.caller_gone",
                correlation_id = %correlation_id,
                session_id = %session_id,
                "caller left before the reply; persisting anyway"
            );
        }

        let persisted = self.memory.persist(&session_id, &user_id, &state, &correlation_id).await;
        info!(
            event_name = "turn.completed",
            correlation_id = %correlation_id,
            session_id = %session_id,
            stage = state.stage.map(|stage| stage.as_str()).unwrap_or("none"),
            applied = ?report.applied,
            working_saved = persisted.working_saved,
            preferences_saved = persisted.preferences_saved,
            "turn completed"
        );
    }
}

fn required_field(name: &str, value: &str) -> Result<String, ApplicationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApplicationError::InvalidInput(format!("{name} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// `session_` followed by 16 lowercase hex characters.
pub fn new_session_id() -> SessionId {
    let hex = Uuid::new_v4().simple().to_string();
    SessionId(format!("session_{}", &hex[..16]))
}
