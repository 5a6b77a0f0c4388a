use showroom_core::domain::session::{SessionState, SlotName, Slots};
use showroom_core::funnel::states::{FunnelStage, Requirement, TransitionKind, TransitionOutcome};

/// Builds assistant replies when the extractor did not provide one: narrates a
/// stage change and asks for the first thing still missing.
#[derive(Clone, Debug, Default)]
pub struct ReplyComposer;

impl ReplyComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(&self, state: &SessionState, outcome: &TransitionOutcome) -> String {
        let prompt = self.next_prompt(state, outcome);
        match outcome.kind {
            TransitionKind::Initialized => match describe_preferences(&state.slots) {
                Some(summary) => format!(
                    "Welcome back to the showroom! Last time you were looking at {summary}. {prompt}"
                ),
                None => format!("Welcome to the showroom! {prompt}"),
            },
            TransitionKind::Advanced => format!("{} {prompt}", stage_intro(outcome.to)),
            TransitionKind::Held | TransitionKind::Terminal => prompt,
        }
    }

    /// Reply used when extraction failed: the generic fallback, followed by the
    /// open question for the current stage when there is one.
    pub fn compose_fallback(
        &self,
        fallback_reply: &str,
        state: &SessionState,
        outcome: &TransitionOutcome,
    ) -> String {
        match outcome.missing.first() {
            Some(requirement) => {
                format!("{fallback_reply} {}", question_for(requirement, &state.slots))
            }
            None => fallback_reply.to_string(),
        }
    }

    fn next_prompt(&self, state: &SessionState, outcome: &TransitionOutcome) -> String {
        if outcome.to.is_terminal() {
            return "Your car is being prepared for delivery. Is there anything else I can help you with?"
                .to_string();
        }

        match outcome.missing.first() {
            Some(requirement) => question_for(requirement, &state.slots),
            None => "Anything else you'd like to adjust before we move on?".to_string(),
        }
    }
}

pub fn stage_intro(stage: FunnelStage) -> &'static str {
    match stage {
        FunnelStage::Intake => "Let's figure out what you need.",
        FunnelStage::Shortlist => "That gives me a clear picture, so let's build your shortlist.",
        FunnelStage::TestDrive => "Great pick! The next step is a test drive.",
        FunnelStage::Financing => "Glad the test drive went well! Let's look at financing.",
        FunnelStage::Delivery => "Financing is settled. Let's arrange delivery.",
    }
}

pub fn question_for(requirement: &Requirement, slots: &Slots) -> String {
    match requirement {
        Requirement::EitherSlot { .. } => {
            "Do you have a body style (SUV, sedan, hatchback) or a brand in mind?".to_string()
        }
        Requirement::Slot { slot } => match slot {
            SlotName::Body => "What body style are you after?".to_string(),
            SlotName::SeatsMin => "How many seats do you need at minimum?".to_string(),
            SlotName::Fuel => {
                "Which fuel type do you prefer: petrol, diesel, hybrid or electric?".to_string()
            }
            SlotName::Brand => "Which brand would you like to shortlist?".to_string(),
            SlotName::Model => match &slots.brand {
                Some(brand) => format!("Which {brand} model are you interested in?"),
                None => "Which model are you interested in?".to_string(),
            },
        },
        Requirement::TestDriveCompleted => {
            "Let me know once you've completed your test drive.".to_string()
        }
        Requirement::AdvanceSignal => {
            "When you're happy with the financing plan, confirm and we'll move on to delivery."
                .to_string()
        }
    }
}

/// Short natural-language summary, e.g. "a 7-seat hybrid SUV (Volvo XC90)".
pub fn describe_preferences(slots: &Slots) -> Option<String> {
    if slots.is_empty() {
        return None;
    }

    let mut words = Vec::new();
    if let Some(seats) = slots.seats_min {
        words.push(format!("{seats}-seat"));
    }
    if let Some(fuel) = &slots.fuel {
        words.push(fuel.clone());
    }
    words.push(slots.body.clone().unwrap_or_else(|| "car".to_string()));

    let mut summary = format!("a {}", words.join(" "));
    let make = [slots.brand.as_deref(), slots.model.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if !make.is_empty() {
        summary.push_str(&format!(" ({make})"));
    }
    Some(summary)
}
