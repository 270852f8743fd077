use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow phase. `Clarifying` is optional and entered only when the
/// clarification predicate over the initial request holds; `Deciding` loops
/// back to `Working` until the quality gate passes or iterations run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Init,
    Planning,
    Clarifying,
    Working,
    Evaluating,
    Deciding,
    Reporting,
    Done,
}

impl Phase {
    pub fn allowed_transitions(&self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Init => &[Planning],
            Planning => &[Clarifying, Working],
            Clarifying => &[Working],
            Working => &[Evaluating],
            Evaluating => &[Deciding],
            Deciding => &[Working, Reporting],
            Reporting => &[Done],
            Done => &[],
        }
    }

    pub fn can_transition_to(&self, target: Phase) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "Init",
            Self::Planning => "Planning",
            Self::Clarifying => "Clarifying",
            Self::Working => "Working",
            Self::Evaluating => "Evaluating",
            Self::Deciding => "Deciding",
            Self::Reporting => "Reporting",
            Self::Done => "Done",
        };
        write!(f, "{}", s)
    }
}

/// Session lifecycle. An aborted session keeps a path back to `Running` so
/// the checkpoint reported at abort time is a usable resume point; only
/// `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Paused,
    AwaitingInput,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn allowed_transitions(&self) -> &'static [SessionStatus] {
        use SessionStatus::*;
        match self {
            Running => &[Paused, AwaitingInput, Completed, Aborted],
            Paused => &[Running, Aborted],
            AwaitingInput => &[Running, Aborted],
            Completed => &[],
            Aborted => &[Running],
        }
    }

    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }

    pub fn can_resume(&self) -> bool {
        matches!(
            self,
            SessionStatus::Paused | SessionStatus::AwaitingInput | SessionStatus::Aborted
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::AwaitingInput => "AwaitingInput",
            Self::Completed => "Completed",
            Self::Aborted => "Aborted",
        };
        write!(f, "{}", s)
    }
}

/// Audit record for one phase transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl PhaseTransition {
    pub fn new(from: Phase, to: Phase, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}
