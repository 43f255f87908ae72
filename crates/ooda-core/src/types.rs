use crate::error::OodaError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// CycleStatus
// ---------------------------------------------------------------------------

/// Phase of an OODA cycle.
///
/// Forward order is `Observing → Orienting → Deciding → Acting → Reflecting →
/// Completed`. `Failed` is reachable from every non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Observing,
    Orienting,
    Deciding,
    Acting,
    Reflecting,
    Completed,
    Failed,
}

impl CycleStatus {
    pub fn all() -> &'static [CycleStatus] {
        &[
            CycleStatus::Observing,
            CycleStatus::Orienting,
            CycleStatus::Deciding,
            CycleStatus::Acting,
            CycleStatus::Reflecting,
            CycleStatus::Completed,
            CycleStatus::Failed,
        ]
    }

    /// The single forward successor, if any. `Failed` is never a successor.
    pub fn next(self) -> Option<CycleStatus> {
        match self {
            CycleStatus::Observing => Some(CycleStatus::Orienting),
            CycleStatus::Orienting => Some(CycleStatus::Deciding),
            CycleStatus::Deciding => Some(CycleStatus::Acting),
            CycleStatus::Acting => Some(CycleStatus::Reflecting),
            CycleStatus::Reflecting => Some(CycleStatus::Completed),
            CycleStatus::Completed | CycleStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CycleStatus::Completed | CycleStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Observing => "observing",
            CycleStatus::Orienting => "orienting",
            CycleStatus::Deciding => "deciding",
            CycleStatus::Acting => "acting",
            CycleStatus::Reflecting => "reflecting",
            CycleStatus::Completed => "completed",
            CycleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CycleStatus {
    type Err = OodaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CycleStatus::all()
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| OodaError::invalid("cycle status", s))
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Action priority. The derived `Ord` is the documented total order:
/// `Critical < High < Medium < Low`, so an ascending sort puts the most
/// urgent work first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn all() -> &'static [Priority] {
        &[
            Priority::Critical,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = OodaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(OodaError::invalid("priority", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a persisted action.
///
/// Transitions: `Pending → Executing → Completed | Failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }

    /// Whether the store accepts moving from `self` to `to`.
    ///
    /// Rewriting the current status is accepted (last write wins).
    pub fn can_transition_to(self, to: ActionStatus) -> bool {
        self == to
            || matches!(
                (self, to),
                (ActionStatus::Pending, ActionStatus::Executing)
                    | (ActionStatus::Executing, ActionStatus::Completed)
                    | (ActionStatus::Executing, ActionStatus::Failed)
            )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Executing => "executing",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = OodaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "executing" => Ok(ActionStatus::Executing),
            "completed" => Ok(ActionStatus::Completed),
            "failed" => Ok(ActionStatus::Failed),
            _ => Err(OodaError::invalid("action status", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity shared by anomaly records and alerts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = OodaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(OodaError::invalid("severity", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
