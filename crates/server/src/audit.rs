use showroom_core::audit::{AuditEvent, AuditSink};
use tracing::info;

/// Writes funnel audit events into the structured log stream.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session_id = event.session_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        let user_id = event.user_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");

        info!(
            event_name = "audit.recorded",
            audit_event_type = %event.event_type,
            audit_event_id = %event.event_id,
            correlation_id = %event.correlation_id,
            session_id,
            user_id,
            actor = %event.actor,
            category = ?event.category,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}
