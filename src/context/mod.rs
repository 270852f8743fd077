//! Per-role context filtering.
//!
//! A pure function from (snapshot, role, phase) to the subset of session
//! state that invocation may see. The visibility contract:
//!
//! | Role         | Sees                                                      |
//! |--------------|-----------------------------------------------------------|
//! | Planner      | original request only                                     |
//! | Expert       | request + plan                                            |
//! | Researcher   | request + plan + clarified requirements                   |
//! | Brainstormer | request + clarified requirements + findings summary       |
//! | Evaluator    | request + candidates under evaluation only                |
//!
//! The evaluator must never receive the reasoning trace that produced a
//! candidate, nor any other role's in-flight output; anchoring the scores
//! on generation rationale is a design bug.

use serde::{Deserialize, Serialize};

use crate::agent::Role;
use crate::session::SessionSnapshot;
use crate::state::Phase;

const FINDING_SUMMARY_CHARS: usize = 400;

/// A candidate as the evaluator sees it: content only, no rationale, no
/// originating member details beyond the variant label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateView {
    pub candidate_id: String,
    pub variant: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredContext {
    pub role: Option<Role>,
    pub phase: Option<Phase>,
    pub request: String,
    pub plan_steps: Vec<String>,
    pub clarification: Option<String>,
    pub findings_summary: Option<String>,
    pub candidates: Vec<CandidateView>,
    /// Supervisor feedback injected via `stop_with_feedback`.
    pub feedback: Option<String>,
    /// Candidate ids the generation round should refine instead of starting
    /// fresh. Empty on the first iteration.
    pub refine_targets: Vec<String>,
}

pub struct ContextFilter;

impl ContextFilter {
    pub fn build(snapshot: &SessionSnapshot, role: Role, phase: Phase) -> FilteredContext {
        let mut ctx = FilteredContext {
            role: Some(role),
            phase: Some(phase),
            request: snapshot.session.request.clone(),
            feedback: snapshot.feedback.clone(),
            ..Default::default()
        };

        match role {
            Role::Planner => {}
            Role::Expert => {
                ctx.plan_steps = plan_steps(snapshot);
            }
            Role::Researcher => {
                ctx.plan_steps = plan_steps(snapshot);
                ctx.clarification = snapshot.clarification.clone();
            }
            Role::Brainstormer => {
                ctx.clarification = snapshot.clarification.clone();
                ctx.findings_summary = Some(summarize_findings(snapshot));
            }
            Role::Evaluator => {
                let iteration = snapshot.session.iteration;
                ctx.candidates = snapshot
                    .candidates_for_iteration(iteration)
                    .into_iter()
                    .map(|c| CandidateView {
                        candidate_id: c.id.clone(),
                        variant: c.variant.clone(),
                        content: c.content.clone(),
                    })
                    .collect();
            }
        }

        ctx
    }

    /// Brainstormer context for a refinement round: same visibility as
    /// generation plus the top-K candidate contents to refine.
    pub fn build_refinement(
        snapshot: &SessionSnapshot,
        role: Role,
        phase: Phase,
        refine_targets: &[String],
    ) -> FilteredContext {
        let mut ctx = Self::build(snapshot, role, phase);
        ctx.refine_targets = refine_targets.to_vec();
        ctx.candidates = snapshot
            .candidates
            .iter()
            .filter(|c| refine_targets.contains(&c.id))
            .map(|c| CandidateView {
                candidate_id: c.id.clone(),
                variant: c.variant.clone(),
                content: c.content.clone(),
            })
            .collect();
        ctx
    }
}

fn plan_steps(snapshot: &SessionSnapshot) -> Vec<String> {
    snapshot
        .approved_plan()
        .or_else(|| snapshot.latest_plan())
        .map(|p| p.steps.clone())
        .unwrap_or_default()
}

/// Topic-labelled digest of findings; raw research transcripts stay out of
/// downstream contexts.
fn summarize_findings(snapshot: &SessionSnapshot) -> String {
    snapshot
        .findings
        .iter()
        .map(|f| {
            let mut content = f.content.as_str();
            if content.len() > FINDING_SUMMARY_CHARS {
                let mut cut = FINDING_SUMMARY_CHARS;
                while !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                content = &content[..cut];
            }
            format!("[{}] {}", f.topic, content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::MemberId;
    use crate::config::PricingConfig;
    use crate::session::{Candidate, Finding, Plan, Session, SessionStore};

    fn snapshot_with_history() -> SessionSnapshot {
        let store = SessionStore::new(Session::new("design a tagline"), &PricingConfig::default());
        store.push_plan(Plan::proposed(vec!["research".into(), "generate".into()]));
        store.approve_latest_plan().unwrap();
        store.set_clarification("aimed at developers");
        store.append_finding(Finding::new(
            MemberId::new(Role::Researcher, 0),
            "market",
            "raw transcript of research, long and detailed",
        ));
        store.append_candidate(
            Candidate::new(MemberId::new(Role::Brainstormer, 0), "v1", "Ship faster.")
                .with_rationale("I chose this because of anchoring on brevity"),
        );
        store.snapshot()
    }

    #[test]
    fn test_planner_sees_request_only() {
        let ctx = ContextFilter::build(&snapshot_with_history(), Role::Planner, Phase::Planning);
        assert_eq!(ctx.request, "design a tagline");
        assert!(ctx.plan_steps.is_empty());
        assert!(ctx.clarification.is_none());
        assert!(ctx.findings_summary.is_none());
        assert!(ctx.candidates.is_empty());
    }

    #[test]
    fn test_expert_sees_plan_but_not_clarification() {
        let ctx = ContextFilter::build(&snapshot_with_history(), Role::Expert, Phase::Planning);
        assert_eq!(ctx.plan_steps.len(), 2);
        assert!(ctx.clarification.is_none());
    }

    #[test]
    fn test_researcher_sees_plan_and_clarification() {
        let ctx = ContextFilter::build(&snapshot_with_history(), Role::Researcher, Phase::Working);
        assert_eq!(ctx.plan_steps.len(), 2);
        assert_eq!(ctx.clarification.as_deref(), Some("aimed at developers"));
        assert!(ctx.findings_summary.is_none());
        assert!(ctx.candidates.is_empty());
    }

    #[test]
    fn test_brainstormer_gets_summary_not_transcript() {
        let ctx =
            ContextFilter::build(&snapshot_with_history(), Role::Brainstormer, Phase::Working);
        let summary = ctx.findings_summary.unwrap();
        assert!(summary.starts_with("[market]"));
        assert!(ctx.plan_steps.is_empty());
    }

    #[test]
    fn test_evaluator_never_sees_rationale() {
        let snapshot = snapshot_with_history();
        let ctx = ContextFilter::build(&snapshot, Role::Evaluator, Phase::Evaluating);

        assert_eq!(ctx.candidates.len(), 1);
        assert_eq!(ctx.candidates[0].content, "Ship faster.");
        assert!(ctx.findings_summary.is_none());
        assert!(ctx.plan_steps.is_empty());

        // No serialized field of the context may leak the rationale.
        let encoded = serde_json::to_string(&ctx).unwrap();
        assert!(!encoded.contains("anchoring on brevity"));
    }

    #[test]
    fn test_feedback_reaches_every_role() {
        let store = SessionStore::new(Session::new("req"), &PricingConfig::default());
        store.set_feedback("focus on sustainable materials");
        let snapshot = store.snapshot();

        for role in [
            Role::Planner,
            Role::Expert,
            Role::Researcher,
            Role::Brainstormer,
            Role::Evaluator,
        ] {
            let ctx = ContextFilter::build(&snapshot, role, Phase::Working);
            assert_eq!(
                ctx.feedback.as_deref(),
                Some("focus on sustainable materials")
            );
        }
    }

    #[test]
    fn test_refinement_targets_scope_candidates() {
        let snapshot = snapshot_with_history();
        let target = snapshot.candidates[0].id.clone();
        let ctx = ContextFilter::build_refinement(
            &snapshot,
            Role::Brainstormer,
            Phase::Working,
            &[target.clone()],
        );
        assert_eq!(ctx.refine_targets, vec![target.clone()]);
        assert_eq!(ctx.candidates.len(), 1);
        assert_eq!(ctx.candidates[0].candidate_id, target);
    }
}
