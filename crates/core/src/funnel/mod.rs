pub mod engine;
pub mod states;

pub use engine::{
    is_complete, missing_requirements, required_slots_for, FunnelDefinition, FunnelEngine,
    SalesFunnel,
};
pub use states::{
    FunnelContext, FunnelSignal, FunnelStage, Requirement, TransitionKind, TransitionOutcome,
};
