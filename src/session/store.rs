use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Candidate, Evaluation, Finding, Plan, PlanApproval, Session};
use crate::agent::MemberId;
use crate::config::PricingConfig;
use crate::cost::{CostLedger, CostRecord, Usage};
use crate::error::{Result, SymposiumError};
use crate::state::{Phase, PhaseTransition, SessionStatus};

/// Immutable view of the full session aggregate. This is what readers see,
/// what the context filter consumes, and what checkpoints serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub plans: Vec<Plan>,
    pub findings: Vec<Finding>,
    pub candidates: Vec<Candidate>,
    pub evaluations: Vec<Evaluation>,
    pub ledger: CostLedger,
    pub transitions: Vec<PhaseTransition>,
    /// Clarified requirements collected during the Clarifying phase.
    pub clarification: Option<String>,
    /// Feedback injected by `stop_with_feedback`, consumed by the next
    /// phase's context construction.
    pub feedback: Option<String>,
    /// Candidate ids selected for refinement by the last Deciding phase.
    /// Persisted so a resumed Working phase refines the same set.
    pub refine_targets: Vec<String>,
}

impl SessionSnapshot {
    pub fn approved_plan(&self) -> Option<&Plan> {
        self.plans
            .iter()
            .rev()
            .find(|p| p.approval == PlanApproval::Approved)
    }

    pub fn latest_plan(&self) -> Option<&Plan> {
        self.plans.last()
    }

    pub fn candidates_for_iteration(&self, iteration: u32) -> Vec<&Candidate> {
        self.candidates
            .iter()
            .filter(|c| c.iteration == iteration)
            .collect()
    }

    pub fn evaluations_for_iteration(&self, iteration: u32) -> Vec<&Evaluation> {
        self.evaluations
            .iter()
            .filter(|e| e.iteration == iteration)
            .collect()
    }

    pub fn best_evaluation(&self) -> Option<&Evaluation> {
        self.evaluations.iter().max_by(|a, b| {
            a.final_score()
                .partial_cmp(&b.final_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Consistency checks over the aggregate. Run on checkpoint load and
    /// before every checkpoint write; a failure here is a design bug.
    pub fn validate(&self) -> Result<()> {
        if self.session.iteration > self.session.max_iterations {
            return Err(SymposiumError::InvariantViolation(format!(
                "iteration {} exceeds max_iterations {}",
                self.session.iteration, self.session.max_iterations
            )));
        }

        let approved = self
            .plans
            .iter()
            .filter(|p| p.approval == PlanApproval::Approved)
            .count();
        if approved > 1 {
            return Err(SymposiumError::InvariantViolation(format!(
                "{} plans approved at once",
                approved
            )));
        }

        for eval in &self.evaluations {
            if !self.candidates.iter().any(|c| c.id == eval.candidate_id) {
                return Err(SymposiumError::InvariantViolation(format!(
                    "evaluation {} references missing candidate {}",
                    eval.id, eval.candidate_id
                )));
            }
        }

        let ledger_total = self.ledger.total();
        if (self.session.total_cost - ledger_total).abs() > 1e-9 {
            return Err(SymposiumError::InvariantViolation(format!(
                "session total_cost {} disagrees with ledger total {}",
                self.session.total_cost, ledger_total
            )));
        }

        Ok(())
    }
}

/// Authoritative mutable record of the active session.
///
/// All mutation flows through the orchestrator's single logical thread of
/// control; scalar updates are compare-and-set so the single-writer
/// invariant is enforceable, not just conventional. Readers clone an
/// immutable snapshot instead of touching live state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<SessionSnapshot>>,
}

impl SessionStore {
    pub fn new(session: Session, pricing: &PricingConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SessionSnapshot {
                session,
                plans: Vec::new(),
                findings: Vec::new(),
                candidates: Vec::new(),
                evaluations: Vec::new(),
                ledger: CostLedger::new(pricing),
                transitions: Vec::new(),
                clarification: None,
                feedback: None,
                refine_targets: Vec::new(),
            })),
        }
    }

    /// Rebuild the store from a checkpointed snapshot for resume.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().clone()
    }

    pub fn session_id(&self) -> String {
        self.inner.read().session.id.clone()
    }

    /// Compare-and-set phase transition. Fails if another writer moved the
    /// phase (single-writer violation) or the transition is not allowed by
    /// the state machine.
    pub fn set_phase(&self, expected: Phase, next: Phase, reason: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let current = inner.session.phase;
        if current != expected {
            return Err(SymposiumError::InvariantViolation(format!(
                "phase CAS failed: expected {}, found {}",
                expected, current
            )));
        }
        if !current.can_transition_to(next) {
            return Err(SymposiumError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
                allowed: current
                    .allowed_transitions()
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        inner.session.phase = next;
        inner
            .transitions
            .push(PhaseTransition::new(current, next, reason));
        debug!(from = %current, to = %next, reason, "Phase transition");
        Ok(())
    }

    pub fn set_status(&self, expected: SessionStatus, next: SessionStatus) -> Result<()> {
        let mut inner = self.inner.write();
        let current = inner.session.status;
        if current != expected {
            return Err(SymposiumError::InvariantViolation(format!(
                "status CAS failed: expected {}, found {}",
                expected, current
            )));
        }
        if !current.can_transition_to(next) {
            return Err(SymposiumError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
                allowed: current
                    .allowed_transitions()
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        inner.session.status = next;
        Ok(())
    }

    /// Increment the iteration counter. Strictly increasing and bounded by
    /// `max_iterations`.
    pub fn advance_iteration(&self, expected: u32) -> Result<u32> {
        let mut inner = self.inner.write();
        if inner.session.iteration != expected {
            return Err(SymposiumError::InvariantViolation(format!(
                "iteration CAS failed: expected {}, found {}",
                expected, inner.session.iteration
            )));
        }
        let next = expected + 1;
        if next > inner.session.max_iterations {
            return Err(SymposiumError::InvariantViolation(format!(
                "iteration {} would exceed max_iterations {}",
                next, inner.session.max_iterations
            )));
        }
        inner.session.iteration = next;
        Ok(next)
    }

    pub fn set_mode(&self, mode: super::ExecutionMode) {
        self.inner.write().session.mode = mode;
    }

    pub fn set_max_iterations(&self, max: u32) -> Result<()> {
        let mut inner = self.inner.write();
        if max < inner.session.iteration {
            return Err(SymposiumError::InvariantViolation(format!(
                "max_iterations {} below current iteration {}",
                max, inner.session.iteration
            )));
        }
        inner.session.max_iterations = max;
        Ok(())
    }

    /// Append a new plan version. Any previously approved plan is demoted to
    /// `Modified` so at most one plan is approved at a time.
    pub fn push_plan(&self, plan: Plan) {
        let mut inner = self.inner.write();
        if plan.approval == PlanApproval::Approved {
            for existing in inner.plans.iter_mut() {
                if existing.approval == PlanApproval::Approved {
                    existing.approval = PlanApproval::Modified;
                }
            }
        }
        inner.plans.push(plan);
    }

    pub fn approve_latest_plan(&self) -> Result<()> {
        let mut inner = self.inner.write();
        for plan in inner.plans.iter_mut() {
            if plan.approval == PlanApproval::Approved {
                plan.approval = PlanApproval::Modified;
            }
        }
        match inner.plans.last_mut() {
            Some(plan) => {
                plan.approval = PlanApproval::Approved;
                Ok(())
            }
            None => Err(SymposiumError::InvariantViolation(
                "no plan to approve".into(),
            )),
        }
    }

    pub fn reject_latest_plan(&self) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.plans.last_mut() {
            Some(plan) => {
                plan.approval = PlanApproval::Rejected;
                Ok(())
            }
            None => Err(SymposiumError::InvariantViolation(
                "no plan to reject".into(),
            )),
        }
    }

    pub fn append_finding(&self, mut finding: Finding) {
        let mut inner = self.inner.write();
        finding.iteration = inner.session.iteration;
        inner.findings.push(finding);
    }

    pub fn append_candidate(&self, mut candidate: Candidate) {
        let mut inner = self.inner.write();
        candidate.iteration = inner.session.iteration;
        inner.candidates.push(candidate);
    }

    pub fn append_evaluation(&self, evaluation: Evaluation) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner
            .candidates
            .iter()
            .any(|c| c.id == evaluation.candidate_id)
        {
            return Err(SymposiumError::InvariantViolation(format!(
                "evaluation references missing candidate {}",
                evaluation.candidate_id
            )));
        }
        inner.evaluations.push(evaluation);
        Ok(())
    }

    /// Apply a human score override to the newest evaluation of a candidate.
    /// The override wins over the computed overall in `final_score`.
    pub fn override_score(&self, candidate_id: &str, score: f64) -> Result<()> {
        let mut inner = self.inner.write();
        match inner
            .evaluations
            .iter_mut()
            .rev()
            .find(|e| e.candidate_id == candidate_id)
        {
            Some(evaluation) => {
                evaluation.human_override = Some(score.clamp(0.0, 10.0));
                Ok(())
            }
            None => Err(SymposiumError::InvariantViolation(format!(
                "no evaluation to override for candidate {}",
                candidate_id
            ))),
        }
    }

    /// Record provider usage; keeps `Session.total_cost` equal to the ledger
    /// sum.
    pub fn record_cost(&self, member: MemberId, model: &str, usage: Usage) -> CostRecord {
        let mut inner = self.inner.write();
        let record = inner.ledger.record(member, model, usage);
        inner.session.total_cost = inner.ledger.total();
        record
    }

    pub fn set_clarification(&self, text: impl Into<String>) {
        self.inner.write().clarification = Some(text.into());
    }

    pub fn set_feedback(&self, text: impl Into<String>) {
        self.inner.write().feedback = Some(text.into());
    }

    pub fn clear_feedback(&self) {
        self.inner.write().feedback = None;
    }

    pub fn set_refine_targets(&self, targets: Vec<String>) {
        self.inner.write().refine_targets = targets;
    }
}
