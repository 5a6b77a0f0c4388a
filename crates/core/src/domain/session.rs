use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::funnel::states::FunnelStage;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Body,
    SeatsMin,
    Fuel,
    Brand,
    Model,
}

impl SlotName {
    pub const ALL: [SlotName; 5] =
        [SlotName::Body, SlotName::SeatsMin, SlotName::Fuel, SlotName::Brand, SlotName::Model];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::SeatsMin => "seats_min",
            Self::Fuel => "fuel",
            Self::Brand => "brand",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotName {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "body" => Ok(Self::Body),
            "seats_min" => Ok(Self::SeatsMin),
            "fuel" => Ok(Self::Fuel),
            "brand" => Ok(Self::Brand),
            "model" => Ok(Self::Model),
            other => Err(format!("unknown slot `{other}`")),
        }
    }
}

/// A validated, well-typed slot value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotValue {
    Body(String),
    SeatsMin(u32),
    Fuel(String),
    Brand(String),
    Model(String),
}

impl SlotValue {
    pub fn name(&self) -> SlotName {
        match self {
            Self::Body(_) => SlotName::Body,
            Self::SeatsMin(_) => SlotName::SeatsMin,
            Self::Fuel(_) => SlotName::Fuel,
            Self::Brand(_) => SlotName::Brand,
            Self::Model(_) => SlotName::Model,
        }
    }
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeatsMin(seats) => write!(f, "{seats}"),
            Self::Body(value) | Self::Fuel(value) | Self::Brand(value) | Self::Model(value) => {
                f.write_str(value)
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slots {
    pub body: Option<String>,
    pub seats_min: Option<u32>,
    pub fuel: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
}

impl Slots {
    pub fn get(&self, name: SlotName) -> Option<SlotValue> {
        match name {
            SlotName::Body => self.body.clone().map(SlotValue::Body),
            SlotName::SeatsMin => self.seats_min.map(SlotValue::SeatsMin),
            SlotName::Fuel => self.fuel.clone().map(SlotValue::Fuel),
            SlotName::Brand => self.brand.clone().map(SlotValue::Brand),
            SlotName::Model => self.model.clone().map(SlotValue::Model),
        }
    }

    pub fn is_set(&self, name: SlotName) -> bool {
        match name {
            SlotName::Body => self.body.is_some(),
            SlotName::SeatsMin => self.seats_min.is_some(),
            SlotName::Fuel => self.fuel.is_some(),
            SlotName::Brand => self.brand.is_some(),
            SlotName::Model => self.model.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        SlotName::ALL.iter().all(|name| !self.is_set(*name))
    }

    pub fn filled(&self) -> Vec<SlotName> {
        SlotName::ALL.into_iter().filter(|name| self.is_set(*name)).collect()
    }

    /// Writes `value` into its slot. Returns false when the slot already held it.
    pub fn set(&mut self, value: SlotValue) -> bool {
        if self.get(value.name()).as_ref() == Some(&value) {
            return false;
        }

        match value {
            SlotValue::Body(body) => self.body = Some(body),
            SlotValue::SeatsMin(seats) => self.seats_min = Some(seats),
            SlotValue::Fuel(fuel) => self.fuel = Some(fuel),
            SlotValue::Brand(brand) => self.brand = Some(brand),
            SlotValue::Model(model) => self.model = Some(model),
        }
        true
    }

    /// Copies every non-absent value of `newer` over this one, field by field.
    pub fn overlay(&mut self, newer: &Slots) -> Vec<SlotName> {
        SlotName::ALL
            .into_iter()
            .filter(|name| newer.get(*name).map(|value| self.set(value)).unwrap_or(false))
            .collect()
    }

    /// Fills only the slots that are still absent; present values always win.
    pub fn fill_absent_from(&mut self, defaults: &Slots) -> Vec<SlotName> {
        let mut seeded = Vec::new();
        for name in SlotName::ALL {
            if self.is_set(name) {
                continue;
            }
            if let Some(value) = defaults.get(name) {
                self.set(value);
                seeded.push(name);
            }
        }
        seeded
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub slots: Slots,
    #[serde(default)]
    pub stage: Option<FunnelStage>,
    #[serde(default)]
    pub test_drive_completed: bool,
    #[serde(default)]
    pub history: Vec<Turn>,
}

impl SessionState {
    pub fn is_fresh(&self) -> bool {
        self.history.is_empty()
    }

    pub fn record_turn(&mut self, role: TurnRole, text: impl Into<String>) {
        self.history.push(Turn { role, text: text.into() });
    }

    pub fn recent_history(&self, window: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    /// Moves the funnel to `next`. Staying put is allowed; going backwards is not.
    pub fn advance_to(&mut self, next: FunnelStage) -> Result<(), DomainError> {
        match self.stage {
            Some(current) if next < current => {
                Err(DomainError::StageRegression { from: current, to: next })
            }
            _ => {
                self.stage = Some(next);
                Ok(())
            }
        }
    }

    pub fn snapshot(&self) -> JourneySnapshot {
        JourneySnapshot {
            slots: self.slots.clone(),
            stage: self.stage,
            test_drive_completed: self.test_drive_completed,
            history: self.history.clone(),
        }
    }
}

/// Flat view of a session consumed by the funnel visualisation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneySnapshot {
    #[serde(flatten)]
    pub slots: Slots,
    pub stage: Option<FunnelStage>,
    pub test_drive_completed: bool,
    pub history: Vec<Turn>,
}
