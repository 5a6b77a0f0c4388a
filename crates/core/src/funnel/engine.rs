use std::collections::BTreeSet;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::session::{SessionState, SlotName};
use crate::errors::DomainError;
use crate::funnel::states::{
    FunnelContext, FunnelSignal, FunnelStage, Requirement, TransitionKind, TransitionOutcome,
};

pub trait FunnelDefinition {
    fn initial_stage(&self) -> FunnelStage;
    fn next_stage(&self, current: FunnelStage) -> Option<FunnelStage>;
    fn requirements(&self, stage: FunnelStage) -> Vec<Requirement>;
}

/// needs discovery -> shortlist -> test drive -> financing -> delivery
#[derive(Clone, Debug, Default)]
pub struct SalesFunnel;

impl FunnelDefinition for SalesFunnel {
    fn initial_stage(&self) -> FunnelStage {
        FunnelStage::Intake
    }

    fn next_stage(&self, current: FunnelStage) -> Option<FunnelStage> {
        current.next()
    }

    fn requirements(&self, stage: FunnelStage) -> Vec<Requirement> {
        sales_requirements(stage)
    }
}

fn sales_requirements(stage: FunnelStage) -> Vec<Requirement> {
    match stage {
        FunnelStage::Intake => vec![
            Requirement::EitherSlot { first: SlotName::Body, second: SlotName::Brand },
            Requirement::Slot { slot: SlotName::SeatsMin },
            Requirement::Slot { slot: SlotName::Fuel },
        ],
        FunnelStage::Shortlist => vec![
            Requirement::Slot { slot: SlotName::Brand },
            Requirement::Slot { slot: SlotName::Model },
        ],
        FunnelStage::TestDrive => vec![Requirement::TestDriveCompleted],
        FunnelStage::Financing => vec![Requirement::AdvanceSignal],
        FunnelStage::Delivery => Vec::new(),
    }
}

impl Requirement {
    pub fn is_met(&self, state: &SessionState, signals: &[FunnelSignal]) -> bool {
        match self {
            Self::Slot { slot } => state.slots.is_set(*slot),
            Self::EitherSlot { first, second } => {
                state.slots.is_set(*first) || state.slots.is_set(*second)
            }
            Self::TestDriveCompleted => state.test_drive_completed,
            Self::AdvanceSignal => signals.contains(&FunnelSignal::AdvanceStage),
        }
    }

    pub fn slots(&self) -> Vec<SlotName> {
        match self {
            Self::Slot { slot } => vec![*slot],
            Self::EitherSlot { first, second } => vec![*first, *second],
            Self::TestDriveCompleted | Self::AdvanceSignal => Vec::new(),
        }
    }
}

/// Every slot named by the requirements for leaving `stage`.
pub fn required_slots_for(stage: FunnelStage) -> BTreeSet<SlotName> {
    sales_requirements(stage).iter().flat_map(Requirement::slots).collect()
}

pub fn missing_requirements(
    stage: FunnelStage,
    state: &SessionState,
    signals: &[FunnelSignal],
) -> Vec<Requirement> {
    sales_requirements(stage)
        .into_iter()
        .filter(|requirement| !requirement.is_met(state, signals))
        .collect()
}

/// Whether everything needed to leave `stage` is present. The terminal stage is
/// never complete.
pub fn is_complete(stage: FunnelStage, state: &SessionState, signals: &[FunnelSignal]) -> bool {
    !stage.is_terminal() && missing_requirements(stage, state, signals).is_empty()
}

pub struct FunnelEngine<F> {
    funnel: F,
}

impl<F> FunnelEngine<F>
where
    F: FunnelDefinition,
{
    pub fn new(funnel: F) -> Self {
        Self { funnel }
    }

    pub fn initial_stage(&self) -> FunnelStage {
        self.funnel.initial_stage()
    }

    /// Evaluates the transition rule once. At most one stage is gained per call.
    pub fn evaluate(&self, state: &SessionState, context: &FunnelContext) -> TransitionOutcome {
        let current = match state.stage {
            None => {
                let initial = self.funnel.initial_stage();
                if context.first_turn {
                    return TransitionOutcome {
                        from: None,
                        to: initial,
                        kind: TransitionKind::Initialized,
                        missing: self.missing(initial, state, context),
                    };
                }
                initial
            }
            Some(stage) => stage,
        };

        let missing = self.missing(current, state, context);
        let next = self.funnel.next_stage(current);

        let (to, kind, missing) = match next {
            None => (current, TransitionKind::Terminal, missing),
            Some(_) if context.first_turn || context.quiet_turn => {
                (current, TransitionKind::Held, missing)
            }
            Some(next) if missing.is_empty() => {
                (next, TransitionKind::Advanced, self.missing(next, state, context))
            }
            Some(_) => (current, TransitionKind::Held, missing),
        };

        let kind = if state.stage.is_none() && kind == TransitionKind::Held {
            TransitionKind::Initialized
        } else {
            kind
        };

        TransitionOutcome { from: state.stage, to, kind, missing }
    }

    /// Evaluates and writes the resulting stage into `state`.
    pub fn advance(
        &self,
        state: &mut SessionState,
        context: &FunnelContext,
    ) -> Result<TransitionOutcome, DomainError> {
        let outcome = self.evaluate(state, context);
        state.advance_to(outcome.to)?;
        Ok(outcome)
    }

    pub fn advance_with_audit<S>(
        &self,
        state: &mut SessionState,
        context: &FunnelContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, DomainError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.advance(state, context);
        match &result {
            Ok(outcome) => {
                let event_type = match outcome.kind {
                    TransitionKind::Advanced => "funnel.stage_advanced",
                    TransitionKind::Initialized => "funnel.stage_initialized",
                    TransitionKind::Held | TransitionKind::Terminal => "funnel.stage_held",
                };
                let missing = outcome
                    .missing
                    .iter()
                    .map(|requirement| format!("{requirement:?}"))
                    .collect::<Vec<_>>()
                    .join(",");
                sink.emit(
                    AuditEvent::new(audit, event_type, AuditCategory::Funnel, AuditOutcome::Success)
                        .with_metadata(
                            "from",
                            outcome.from.map(FunnelStage::as_str).unwrap_or("none"),
                        )
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("missing", missing),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "funnel.transition_rejected",
                        AuditCategory::Funnel,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    fn missing(
        &self,
        stage: FunnelStage,
        state: &SessionState,
        context: &FunnelContext,
    ) -> Vec<Requirement> {
        self.funnel
            .requirements(stage)
            .into_iter()
            .filter(|requirement| !requirement.is_met(state, &context.signals))
            .collect()
    }
}

impl Default for FunnelEngine<SalesFunnel> {
    fn default() -> Self {
        Self::new(SalesFunnel)
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::{SessionState, SlotName, TurnRole};
    use crate::funnel::engine::{is_complete, required_slots_for, FunnelEngine};
    use crate::funnel::states::{
        FunnelContext, FunnelSignal, FunnelStage, Requirement, TransitionKind,
    };

    fn ongoing() -> FunnelContext {
        FunnelContext { first_turn: false, signals: Vec::new(), quiet_turn: false }
    }

    fn intake_complete_state() -> SessionState {
        let mut state = SessionState::default();
        state.record_turn(TurnRole::User, "hello");
        state.slots.body = Some("SUV".to_string());
        state.slots.seats_min = Some(5);
        state.slots.fuel = Some("hybrid".to_string());
        state.stage = Some(FunnelStage::Intake);
        state
    }

    #[test]
    fn required_slots_table_matches_funnel() {
        assert_eq!(
            required_slots_for(FunnelStage::Intake).into_iter().collect::<Vec<_>>(),
            vec![SlotName::Body, SlotName::SeatsMin, SlotName::Fuel, SlotName::Brand]
        );
        assert_eq!(
            required_slots_for(FunnelStage::Shortlist).into_iter().collect::<Vec<_>>(),
            vec![SlotName::Brand, SlotName::Model]
        );
        assert!(required_slots_for(FunnelStage::TestDrive).is_empty());
        assert!(required_slots_for(FunnelStage::Financing).is_empty());
    }

    #[test]
    fn intake_accepts_brand_in_place_of_body() {
        let mut state = intake_complete_state();
        state.slots.body = None;
        assert!(!is_complete(FunnelStage::Intake, &state, &[]));

        state.slots.brand = Some("Audi".to_string());
        assert!(is_complete(FunnelStage::Intake, &state, &[]));
    }

    #[test]
    fn first_turn_initializes_without_completeness_check() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();
        state.stage = None;
        state.history.clear();

        let outcome = engine
            .advance(&mut state, &FunnelContext { first_turn: true, ..ongoing() })
            .expect("initialize");

        assert_eq!(outcome.kind, TransitionKind::Initialized);
        assert_eq!(outcome.to, FunnelStage::Intake);
        assert_eq!(state.stage, Some(FunnelStage::Intake));
    }

    #[test]
    fn complete_intake_advances_exactly_one_stage() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();
        state.slots.brand = Some("Audi".to_string());
        state.slots.model = Some("Q5".to_string());
        state.test_drive_completed = true;

        let outcome = engine.advance(&mut state, &ongoing()).expect("advance");

        assert_eq!(outcome.kind, TransitionKind::Advanced);
        assert_eq!(outcome.from, Some(FunnelStage::Intake));
        assert_eq!(state.stage, Some(FunnelStage::Shortlist));
        assert!(outcome.missing.is_empty(), "shortlist requirements already satisfied");
    }

    #[test]
    fn incomplete_stage_holds_and_reports_missing() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();
        state.slots.fuel = None;

        let outcome = engine.advance(&mut state, &ongoing()).expect("hold");

        assert_eq!(outcome.kind, TransitionKind::Held);
        assert_eq!(outcome.missing, vec![Requirement::Slot { slot: SlotName::Fuel }]);
        assert_eq!(state.stage, Some(FunnelStage::Intake));
    }

    #[test]
    fn quiet_turn_holds_even_when_requirements_are_met() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();

        let outcome = engine
            .advance(&mut state, &FunnelContext { quiet_turn: true, ..ongoing() })
            .expect("hold");

        assert_eq!(outcome.kind, TransitionKind::Held);
        assert!(outcome.missing.is_empty());
        assert_eq!(state.stage, Some(FunnelStage::Intake));
    }

    #[test]
    fn test_drive_completion_moves_to_financing() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();
        state.stage = Some(FunnelStage::TestDrive);
        state.test_drive_completed = true;

        let outcome = engine.advance(&mut state, &ongoing()).expect("advance");

        assert_eq!(outcome.to, FunnelStage::Financing);
        assert_eq!(outcome.missing, vec![Requirement::AdvanceSignal]);
    }

    #[test]
    fn financing_requires_explicit_advance_signal() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();
        state.stage = Some(FunnelStage::Financing);

        let held = engine.evaluate(&state, &ongoing());
        assert_eq!(held.kind, TransitionKind::Held);

        let advanced = engine
            .advance(
                &mut state,
                &FunnelContext { signals: vec![FunnelSignal::AdvanceStage], ..ongoing() },
            )
            .expect("advance");
        assert_eq!(advanced.to, FunnelStage::Delivery);
    }

    #[test]
    fn delivery_is_terminal() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();
        state.stage = Some(FunnelStage::Delivery);

        let outcome = engine
            .advance(
                &mut state,
                &FunnelContext { signals: vec![FunnelSignal::AdvanceStage], ..ongoing() },
            )
            .expect("terminal");

        assert_eq!(outcome.kind, TransitionKind::Terminal);
        assert_eq!(state.stage, Some(FunnelStage::Delivery));
        assert!(!is_complete(FunnelStage::Delivery, &state, &[FunnelSignal::AdvanceStage]));
    }

    #[test]
    fn stage_never_regresses_when_earlier_slots_change() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();
        state.stage = Some(FunnelStage::Financing);
        state.slots.brand = Some("BMW".to_string());
        state.slots.fuel = None;

        let outcome = engine.advance(&mut state, &ongoing()).expect("hold");

        assert_eq!(outcome.to, FunnelStage::Financing);
        assert_eq!(state.stage, Some(FunnelStage::Financing));
    }

    #[test]
    fn stage_sequence_is_monotonic_over_many_turns() {
        let engine = FunnelEngine::default();
        let mut state = intake_complete_state();
        let mut previous = state.stage;

        let turns: Vec<Box<dyn Fn(&mut SessionState) -> Vec<FunnelSignal>>> = vec![
            Box::new(|_| Vec::new()),
            Box::new(|s| {
                s.slots.brand = Some("Audi".to_string());
                Vec::new()
            }),
            Box::new(|s| {
                s.slots.model = Some("Q5".to_string());
                Vec::new()
            }),
            Box::new(|s| {
                s.test_drive_completed = true;
                vec![FunnelSignal::AdvanceStage]
            }),
            Box::new(|_| vec![FunnelSignal::AdvanceStage]),
            Box::new(|_| vec![FunnelSignal::AdvanceStage]),
            Box::new(|_| vec![FunnelSignal::AdvanceStage]),
        ];

        for apply in turns {
            let signals = apply(&mut state);
            let outcome = engine
                .advance(&mut state, &FunnelContext { signals, ..ongoing() })
                .expect("advance");
            assert!(Some(outcome.to) >= previous, "stage went backwards");
            if let (Some(before), Some(after)) = (previous, state.stage) {
                assert!(
                    FunnelStage::ORDER.iter().position(|stage| *stage == after)
                        <= FunnelStage::ORDER
                            .iter()
                            .position(|stage| *stage == before)
                            .map(|index| index + 1),
                    "more than one stage gained in a single turn"
                );
            }
            previous = state.stage;
        }

        assert_eq!(state.stage, Some(FunnelStage::Delivery));
    }

    #[test]
    fn transition_emits_audit_event() {
        let engine = FunnelEngine::default();
        let sink = InMemoryAuditSink::default();
        let mut state = intake_complete_state();

        let _ = engine
            .advance_with_audit(
                &mut state,
                &ongoing(),
                &sink,
                &AuditContext::new(None, None, "req-42", "funnel-engine"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].event_type, "funnel.stage_advanced");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("shortlist"));
    }
}
