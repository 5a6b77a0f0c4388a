use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::session::{SessionState, SlotName, SlotValue};
use crate::funnel::states::FunnelSignal;

pub const MAX_TEXT_SLOT_CHARS: usize = 64;
pub const MAX_SEATS_MIN: u32 = 20;

/// Advisory output of the slot extractor. Values are untrusted until merged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateUpdate {
    #[serde(default)]
    pub slots: BTreeMap<String, Value>,
    #[serde(default)]
    pub signals: Vec<FunnelSignal>,
    #[serde(default)]
    pub reply: Option<String>,
}

impl CandidateUpdate {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_slot(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.slots.insert(name.into(), value.into());
        self
    }

    pub fn with_signal(mut self, signal: FunnelSignal) -> Self {
        if !self.signals.contains(&signal) {
            self.signals.push(signal);
        }
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.signals.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    UnknownSlot,
    Absent,
    WrongType,
    Empty,
    TooLong,
    NotPositive,
    OutOfRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotRejection {
    pub key: String,
    pub value: Value,
    pub reason: RejectionReason,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub applied: Vec<SlotName>,
    pub unchanged: Vec<SlotName>,
    pub rejected: Vec<SlotRejection>,
    pub test_drive_marked: bool,
}

impl MergeReport {
    pub fn changed_anything(&self) -> bool {
        !self.applied.is_empty() || self.test_drive_marked
    }
}

/// Applies candidate updates to session state under the monotonic-fill policy.
#[derive(Clone, Debug, Default)]
pub struct StateMerger;

impl StateMerger {
    pub fn new() -> Self {
        Self
    }

    pub fn merge(&self, state: &mut SessionState, candidate: &CandidateUpdate) -> MergeReport {
        let mut report = MergeReport::default();

        for (key, raw) in &candidate.slots {
            let validated = key
                .parse::<SlotName>()
                .map_err(|_| RejectionReason::UnknownSlot)
                .and_then(|name| validate_slot(name, raw));

            match validated {
                Ok(value) => {
                    let name = value.name();
                    if state.slots.set(value) {
                        report.applied.push(name);
                    } else {
                        report.unchanged.push(name);
                    }
                }
                Err(reason) => report.rejected.push(SlotRejection {
                    key: key.clone(),
                    value: raw.clone(),
                    reason,
                }),
            }
        }

        if candidate.signals.contains(&FunnelSignal::TestDriveCompleted)
            && !state.test_drive_completed
        {
            state.test_drive_completed = true;
            report.test_drive_marked = true;
        }

        report
    }
}

pub fn validate_slot(name: SlotName, raw: &Value) -> Result<SlotValue, RejectionReason> {
    match name {
        SlotName::SeatsMin => coerce_seats(raw).map(SlotValue::SeatsMin),
        SlotName::Body => coerce_text(raw).map(SlotValue::Body),
        SlotName::Fuel => coerce_text(raw).map(SlotValue::Fuel),
        SlotName::Brand => coerce_text(raw).map(SlotValue::Brand),
        SlotName::Model => coerce_text(raw).map(SlotValue::Model),
    }
}

fn coerce_text(raw: &Value) -> Result<String, RejectionReason> {
    let text = match raw {
        Value::Null => return Err(RejectionReason::Absent),
        Value::String(text) => text.trim(),
        _ => return Err(RejectionReason::WrongType),
    };

    if text.is_empty() {
        return Err(RejectionReason::Empty);
    }
    if text.chars().count() > MAX_TEXT_SLOT_CHARS {
        return Err(RejectionReason::TooLong);
    }
    Ok(text.to_string())
}

fn coerce_seats(raw: &Value) -> Result<u32, RejectionReason> {
    let seats = match raw {
        Value::Null => return Err(RejectionReason::Absent),
        Value::Number(number) => {
            if let Some(whole) = number.as_i64() {
                whole
            } else {
                match number.as_f64() {
                    Some(float) if float.fract() == 0.0 && float.abs() < 1e6 => float as i64,
                    _ => return Err(RejectionReason::WrongType),
                }
            }
        }
        Value::String(text) => {
            let digits: String = text.trim().chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                return Err(if text.trim().is_empty() {
                    RejectionReason::Empty
                } else {
                    RejectionReason::WrongType
                });
            }
            digits.parse::<i64>().map_err(|_| RejectionReason::OutOfRange)?
        }
        _ => return Err(RejectionReason::WrongType),
    };

    if seats < 1 {
        return Err(RejectionReason::NotPositive);
    }
    if seats > i64::from(MAX_SEATS_MIN) {
        return Err(RejectionReason::OutOfRange);
    }
    Ok(seats as u32)
}
