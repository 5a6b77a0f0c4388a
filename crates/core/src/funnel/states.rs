use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::session::SlotName;

/// Sales funnel phases, declared in their only legal order of progression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Intake,
    Shortlist,
    TestDrive,
    Financing,
    Delivery,
}

impl FunnelStage {
    pub const ORDER: [FunnelStage; 5] = [
        FunnelStage::Intake,
        FunnelStage::Shortlist,
        FunnelStage::TestDrive,
        FunnelStage::Financing,
        FunnelStage::Delivery,
    ];

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Intake => Some(Self::Shortlist),
            Self::Shortlist => Some(Self::TestDrive),
            Self::TestDrive => Some(Self::Financing),
            Self::Financing => Some(Self::Delivery),
            Self::Delivery => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Shortlist => "shortlist",
            Self::TestDrive => "test_drive",
            Self::Financing => "financing",
            Self::Delivery => "delivery",
        }
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunnelStage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "intake" => Ok(Self::Intake),
            "shortlist" => Ok(Self::Shortlist),
            "test_drive" => Ok(Self::TestDrive),
            "financing" => Ok(Self::Financing),
            "delivery" => Ok(Self::Delivery),
            other => Err(format!("unknown funnel stage `{other}`")),
        }
    }
}

/// Structured signals that only an explicit UI action or structured extractor
/// output can raise. Never derived from keywords in free text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelSignal {
    TestDriveCompleted,
    AdvanceStage,
}

impl FunnelSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TestDriveCompleted => "test_drive_completed",
            Self::AdvanceStage => "advance_stage",
        }
    }
}

impl FromStr for FunnelSignal {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "test_drive_completed" => Ok(Self::TestDriveCompleted),
            "advance_stage" => Ok(Self::AdvanceStage),
            other => Err(format!("unknown funnel signal `{other}`")),
        }
    }
}

/// A single condition that must hold before the funnel leaves a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Requirement {
    Slot { slot: SlotName },
    EitherSlot { first: SlotName, second: SlotName },
    TestDriveCompleted,
    AdvanceSignal,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunnelContext {
    /// True when the session had no history before this turn.
    pub first_turn: bool,
    pub signals: Vec<FunnelSignal>,
    /// True when the turn carried no candidate update and no signal. The stage
    /// is held so an empty turn never moves the funnel.
    #[serde(default)]
    pub quiet_turn: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Initialized,
    Advanced,
    Held,
    Terminal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: Option<FunnelStage>,
    pub to: FunnelStage,
    pub kind: TransitionKind,
    /// Requirements still unmet for the resulting stage.
    pub missing: Vec<Requirement>,
}

impl TransitionOutcome {
    pub fn advanced(&self) -> bool {
        self.kind == TransitionKind::Advanced
    }
}
