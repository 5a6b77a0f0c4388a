pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod funnel;
pub mod merge;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::preference::{PreferenceRecord, StageHighlight};
pub use domain::session::{
    JourneySnapshot, SessionId, SessionState, SlotName, SlotValue, Slots, Turn, TurnRole, UserId,
};
pub use errors::{ApplicationError, DomainError, InterfaceError, InterfaceErrorKind};
pub use funnel::{
    is_complete, required_slots_for, FunnelContext, FunnelEngine, FunnelSignal, FunnelStage,
    Requirement, SalesFunnel, TransitionKind, TransitionOutcome,
};
pub use merge::{CandidateUpdate, MergeReport, StateMerger};
