use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::MemberId;
use crate::state::{Phase, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Interactive,
    Autonomous,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "interactive" => Ok(Self::Interactive),
            "autonomous" => Ok(Self::Autonomous),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Scalar fields of one brainstorming session. Phase, status and iteration
/// are written exclusively by the orchestrator through the store's
/// compare-and-set operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub request: String,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
    pub status: SessionStatus,
    pub mode: ExecutionMode,
    pub iteration: u32,
    pub max_iterations: u32,
    pub quality_threshold: f64,
    pub total_cost: f64,
}

impl Session {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: format!("s-{}", Uuid::new_v4()),
            request: request.into(),
            created_at: Utc::now(),
            phase: Phase::Init,
            status: SessionStatus::Running,
            mode: ExecutionMode::default(),
            iteration: 0,
            max_iterations: 10,
            quality_threshold: 8.0,
            total_cost: 0.0,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_limits(mut self, max_iterations: u32, quality_threshold: f64) -> Self {
        self.max_iterations = max_iterations;
        self.quality_threshold = quality_threshold;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanApproval {
    Proposed,
    Approved,
    Modified,
    Rejected,
}

/// Ordered plan proposed by the planner. Approved plans are immutable; a
/// user modification produces a new version referencing the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub version: u32,
    pub steps: Vec<String>,
    pub approval: PlanApproval,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn proposed(steps: Vec<String>) -> Self {
        Self {
            version: 1,
            steps,
            approval: PlanApproval::Proposed,
            created_at: Utc::now(),
        }
    }

    /// New version carrying user-edited steps; the caller marks the old
    /// version `Modified`.
    pub fn revised(&self, steps: Vec<String>) -> Self {
        Self {
            version: self.version + 1,
            steps,
            approval: PlanApproval::Approved,
            created_at: Utc::now(),
        }
    }
}

/// One item of research output. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub member: MemberId,
    pub topic: String,
    pub content: String,
    pub cost_record_id: Option<String>,
    pub iteration: u32,
}

impl Finding {
    pub fn new(member: MemberId, topic: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("f-{}", Uuid::new_v4()),
            member,
            topic: topic.into(),
            content: content.into(),
            cost_record_id: None,
            iteration: 0,
        }
    }
}

/// A generated solution artifact. Refinement never mutates: it appends a new
/// candidate whose `parent_id` points at the refined one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub member: MemberId,
    pub variant: String,
    pub content: String,
    /// Generation reasoning trace. Kept for the audit trail but filtered
    /// out of every evaluator context to avoid anchoring the scores.
    pub rationale: Option<String>,
    pub parent_id: Option<String>,
    pub iteration: u32,
}

impl Candidate {
    pub fn new(member: MemberId, variant: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("c-{}", Uuid::new_v4()),
            member,
            variant: variant.into(),
            content: content.into(),
            rationale: None,
            parent_id: None,
            iteration: 0,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn refinement_of(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Score components, each bounded to [0, 10].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub quality: f64,
    pub clarity: f64,
    pub specificity: f64,
    pub overall: f64,
}

impl Scores {
    pub fn clamped(quality: f64, clarity: f64, specificity: f64, overall: f64) -> Self {
        let clamp = |v: f64| v.clamp(0.0, 10.0);
        Self {
            quality: clamp(quality),
            clarity: clamp(clarity),
            specificity: clamp(specificity),
            overall: clamp(overall),
        }
    }
}

/// One evaluation per (candidate, iteration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub candidate_id: String,
    pub iteration: u32,
    pub scores: Scores,
    pub rationale: String,
    pub human_override: Option<f64>,
}

impl Evaluation {
    pub fn new(candidate_id: impl Into<String>, iteration: u32, scores: Scores) -> Self {
        Self {
            id: format!("e-{}", Uuid::new_v4()),
            candidate_id: candidate_id.into(),
            iteration,
            scores,
            rationale: String::new(),
            human_override: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Human override wins when present, otherwise the computed overall.
    pub fn final_score(&self) -> f64 {
        self.human_override.unwrap_or(self.scores.overall)
    }
}
