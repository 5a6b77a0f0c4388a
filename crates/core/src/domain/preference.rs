use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::{SessionId, SessionState, SlotName, Slots, UserId};
use crate::funnel::states::FunnelStage;

pub const STAGE_HISTORY_LIMIT: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHighlight {
    pub stage: FunnelStage,
    pub session_id: SessionId,
    pub reached_at: DateTime<Utc>,
}

/// Long-lived, per-user memory of the most recently known preferences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub user_id: UserId,
    #[serde(default)]
    pub slots: Slots,
    #[serde(default)]
    pub stage_history: Vec<StageHighlight>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PreferenceRecord {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            slots: Slots::default(),
            stage_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Field-wise upsert of a session's observed values. Absent session values
    /// never erase stored ones.
    pub fn absorb(
        &mut self,
        session_id: &SessionId,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> Vec<SlotName> {
        let changed = self.slots.overlay(&state.slots);

        if let Some(stage) = state.stage {
            let already_recorded = self
                .stage_history
                .iter()
                .any(|highlight| highlight.stage == stage && &highlight.session_id == session_id);
            if !already_recorded {
                self.stage_history.push(StageHighlight {
                    stage,
                    session_id: session_id.clone(),
                    reached_at: now,
                });
                let overflow = self.stage_history.len().saturating_sub(STAGE_HISTORY_LIMIT);
                self.stage_history.drain(..overflow);
            }
        }

        self.updated_at = now;
        changed
    }

    /// Seeds an empty session with stored values acting as defaults.
    pub fn seed(&self, state: &mut SessionState) -> Vec<SlotName> {
        state.slots.fill_absent_from(&self.slots)
    }

    pub fn furthest_stage(&self) -> Option<FunnelStage> {
        self.stage_history.iter().map(|highlight| highlight.stage).max()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::session::{SessionId, SessionState, SlotName, UserId};
    use crate::funnel::states::FunnelStage;

    use super::{PreferenceRecord, STAGE_HISTORY_LIMIT};

    fn session(id: &str) -> SessionId {
        SessionId(id.to_string())
    }

    #[test]
    fn absorb_replaces_only_newly_observed_fields() {
        let mut record = PreferenceRecord::new(UserId("u-1".to_string()), Utc::now());
        record.slots.brand = Some("Audi".to_string());
        record.slots.fuel = Some("diesel".to_string());

        let mut state = SessionState::default();
        state.slots.fuel = Some("electric".to_string());

        let changed = record.absorb(&session("s-1"), &state, Utc::now());

        assert_eq!(changed, vec![SlotName::Fuel]);
        assert_eq!(record.slots.brand.as_deref(), Some("Audi"));
        assert_eq!(record.slots.fuel.as_deref(), Some("electric"));
    }

    #[test]
    fn stage_highlights_are_recorded_once_per_session_and_stage() {
        let mut record = PreferenceRecord::new(UserId("u-1".to_string()), Utc::now());
        let mut state = SessionState::default();
        state.stage = Some(FunnelStage::Intake);

        record.absorb(&session("s-1"), &state, Utc::now());
        record.absorb(&session("s-1"), &state, Utc::now());
        state.stage = Some(FunnelStage::Shortlist);
        record.absorb(&session("s-1"), &state, Utc::now());

        assert_eq!(record.stage_history.len(), 2);
        assert_eq!(record.furthest_stage(), Some(FunnelStage::Shortlist));
    }

    #[test]
    fn stage_history_is_bounded() {
        let mut record = PreferenceRecord::new(UserId("u-1".to_string()), Utc::now());
        let mut state = SessionState::default();
        state.stage = Some(FunnelStage::Intake);

        for index in 0..(STAGE_HISTORY_LIMIT + 5) {
            record.absorb(&session(&format!("s-{index}")), &state, Utc::now());
        }

        assert_eq!(record.stage_history.len(), STAGE_HISTORY_LIMIT);
        assert_eq!(record.stage_history[0].session_id, session("s-5"));
    }

    #[test]
    fn seed_fills_only_absent_session_slots() {
        let mut record = PreferenceRecord::new(UserId("u-1".to_string()), Utc::now());
        record.slots.brand = Some("Audi".to_string());
        record.slots.body = Some("sedan".to_string());

        let mut state = SessionState::default();
        state.slots.body = Some("SUV".to_string());

        let seeded = record.seed(&mut state);

        assert_eq!(seeded, vec![SlotName::Brand]);
        assert_eq!(state.slots.brand.as_deref(), Some("Audi"));
        assert_eq!(state.slots.body.as_deref(), Some("SUV"));
    }
}
