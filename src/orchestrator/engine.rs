use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::events::{EngineEvent, EventBus, EventKind};
use crate::agent::{
    AgentInvoker, ExecutionPolicy, MemberId, MemberOutcome, MemberResult, ParallelTaskGroup, Role,
    TextProvider,
};
use crate::checkpoint::CheckpointManager;
use crate::config::{ClarificationMode, ExecutionPolicyKind, SymposiumConfig};
use crate::context::{ContextFilter, FilteredContext};
use crate::error::{Result, SymposiumError};
use crate::interrupt::{CancelToken, ControlSignal, InterruptChannel};
use crate::session::{
    Candidate, Evaluation, ExecutionMode, Finding, Plan, Scores, Session, SessionSnapshot,
    SessionStore,
};
use crate::state::{Phase, SessionStatus};

const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Final outcome of one engine run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub iterations: u32,
    pub best_candidate_id: Option<String>,
    pub best_score: Option<f64>,
    pub total_cost: f64,
    pub cost_breakdown: BTreeMap<Role, f64>,
    pub checkpoint_id: Option<String>,
    pub quit_requested: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Why an in-flight task group was cancelled.
enum CancelCause {
    Feedback(String),
    Quit,
}

/// Result of running one role's members, after the single phase-level retry.
enum RoleGroupResult {
    /// At least one member succeeded; outcomes in (role, index) order.
    Outcomes(Vec<MemberResult>),
    Interrupted(CancelCause),
    /// Every member failed twice; the session must abort.
    Exhausted(String),
}

/// What the run loop should do after a phase body returns.
enum PhaseOutcome {
    Advance,
    /// Phase was cancelled by feedback; run it again without advancing.
    Rerun,
    Quit,
    Abort(String),
}

enum BoundaryAction {
    Continue,
    Quit,
}

/// User verdict on a proposed plan in interactive mode.
enum PlanDecision {
    Approved,
    Rejected,
    Quit,
}

/// The workflow state machine driver.
///
/// Owns the single logical thread of control that mutates session state.
/// Agents run concurrently inside task groups, but their results are
/// integrated serially here, and every phase transition is followed by a
/// checkpoint write before the next phase begins.
pub struct Engine {
    config: SymposiumConfig,
    store: SessionStore,
    checkpoints: CheckpointManager,
    provider: Arc<dyn TextProvider>,
    interrupts: InterruptChannel,
    events: EventBus,
    deferred: VecDeque<ControlSignal>,
    skip_clarification: bool,
    last_checkpoint: Option<String>,
}

impl Engine {
    pub fn new(
        request: impl Into<String>,
        config: SymposiumConfig,
        provider: Arc<dyn TextProvider>,
        checkpoints: CheckpointManager,
    ) -> Self {
        let session = Session::new(request)
            .with_mode(config.engine.mode)
            .with_limits(config.engine.max_iterations, config.engine.quality_threshold);
        let store = SessionStore::new(session, &config.pricing);
        Self::with_store(config, store, provider, checkpoints)
    }

    /// Rebuild an engine from a checkpointed snapshot. Paused,
    /// awaiting-input and aborted sessions are moved back to running and
    /// re-enter the checkpointed phase; completed sessions cannot resume.
    pub fn resume(
        snapshot: SessionSnapshot,
        config: SymposiumConfig,
        provider: Arc<dyn TextProvider>,
        checkpoints: CheckpointManager,
    ) -> Result<Self> {
        let status = snapshot.session.status;
        if status.is_terminal() {
            return Err(SymposiumError::Other(format!(
                "session {} is {} and cannot resume",
                snapshot.session.id, status
            )));
        }
        let store = SessionStore::from_snapshot(snapshot);
        if status.can_resume() {
            store.set_status(status, SessionStatus::Running)?;
        }
        Ok(Self::with_store(config, store, provider, checkpoints))
    }

    fn with_store(
        config: SymposiumConfig,
        store: SessionStore,
        provider: Arc<dyn TextProvider>,
        checkpoints: CheckpointManager,
    ) -> Self {
        Self {
            config,
            store,
            checkpoints,
            provider,
            interrupts: InterruptChannel::new(),
            events: EventBus::default(),
            deferred: VecDeque::new(),
            skip_clarification: false,
            last_checkpoint: None,
        }
    }

    /// Control surface handed to the CLI / supervising user.
    pub fn interrupts(&self) -> InterruptChannel {
        self.interrupts.clone()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        loop {
            if matches!(self.apply_boundary_signals().await?, BoundaryAction::Quit) {
                return self.quit_report();
            }

            let snapshot = self.store.snapshot();
            let phase = snapshot.session.phase;
            self.emit(EventKind::PhaseStarted {
                phase,
                iteration: snapshot.session.iteration,
            });

            let step = match phase {
                Phase::Init => self
                    .transition(Phase::Init, Phase::Planning, "session started")
                    .map(|_| PhaseOutcome::Advance),
                Phase::Planning => self.phase_planning().await,
                Phase::Clarifying => self.phase_clarifying().await,
                Phase::Working => self.phase_working().await,
                Phase::Evaluating => self.phase_evaluating().await,
                Phase::Deciding => self.phase_deciding(),
                Phase::Reporting => self.phase_reporting(),
                Phase::Done => return Ok(self.report(false)),
            };

            let outcome = match step {
                Ok(outcome) => outcome,
                // A transition whose checkpoint write failed must not let the
                // next phase start; the last durable checkpoint stays the
                // resume point.
                Err(SymposiumError::Persistence(reason)) => PhaseOutcome::Abort(reason),
                Err(e) => return Err(e),
            };

            match outcome {
                PhaseOutcome::Advance | PhaseOutcome::Rerun => {}
                PhaseOutcome::Quit => return self.quit_report(),
                PhaseOutcome::Abort(reason) => return self.abort(reason),
            }
        }
    }

    // ---- phases -----------------------------------------------------------

    async fn phase_planning(&mut self) -> Result<PhaseOutcome> {
        let snapshot = self.store.snapshot();
        let contexts = vec![ContextFilter::build(&snapshot, Role::Planner, Phase::Planning)];

        match self
            .run_role_group(Phase::Planning, Role::Planner, &contexts, ExecutionPolicy::WaitAll)
            .await?
        {
            RoleGroupResult::Outcomes(results) => {
                let content = match first_success(&results) {
                    Some(content) => content,
                    None => return Ok(PhaseOutcome::Abort("planner produced no output".into())),
                };
                let steps = parse_plan_steps(&content);
                if steps.is_empty() {
                    return Ok(PhaseOutcome::Abort("planner produced an empty plan".into()));
                }
                self.store.push_plan(Plan::proposed(steps));
                if self.store.snapshot().session.mode == ExecutionMode::Interactive {
                    match self.await_plan_decision().await? {
                        PlanDecision::Approved => {}
                        // Feedback is already stored; replanning sees it.
                        PlanDecision::Rejected => return Ok(PhaseOutcome::Rerun),
                        PlanDecision::Quit => return Ok(PhaseOutcome::Quit),
                    }
                } else {
                    self.store.approve_latest_plan()?;
                }
                self.store.clear_feedback();

                let next = if self.needs_clarification() {
                    Phase::Clarifying
                } else {
                    Phase::Working
                };
                self.transition(Phase::Planning, next, "plan approved")?;
                Ok(PhaseOutcome::Advance)
            }
            RoleGroupResult::Interrupted(cause) => Ok(self.interrupted(cause)),
            RoleGroupResult::Exhausted(reason) => Ok(PhaseOutcome::Abort(reason)),
        }
    }

    async fn phase_clarifying(&mut self) -> Result<PhaseOutcome> {
        if self.skip_clarification {
            info!("Clarification skipped by user");
            self.transition(Phase::Clarifying, Phase::Working, "clarification skipped")?;
            return Ok(PhaseOutcome::Advance);
        }

        let snapshot = self.store.snapshot();
        let contexts = vec![ContextFilter::build(&snapshot, Role::Expert, Phase::Clarifying)];

        match self
            .run_role_group(Phase::Clarifying, Role::Expert, &contexts, ExecutionPolicy::WaitAll)
            .await?
        {
            RoleGroupResult::Outcomes(results) => {
                if let Some(content) = first_success(&results) {
                    self.store.set_clarification(content);
                }
                self.store.clear_feedback();
                self.transition(Phase::Clarifying, Phase::Working, "requirements clarified")?;
                Ok(PhaseOutcome::Advance)
            }
            RoleGroupResult::Interrupted(cause) => Ok(self.interrupted(cause)),
            // Clarification is optional; losing it degrades but never aborts.
            RoleGroupResult::Exhausted(reason) => {
                warn!(%reason, "Clarification failed, continuing without it");
                self.transition(Phase::Clarifying, Phase::Working, "clarification unavailable")?;
                Ok(PhaseOutcome::Advance)
            }
        }
    }

    async fn phase_working(&mut self) -> Result<PhaseOutcome> {
        if self.store.snapshot().session.iteration == 0 {
            self.store.advance_iteration(0)?;
        }

        let snapshot = self.store.snapshot();
        let iteration = snapshot.session.iteration;
        let refine_targets = snapshot.refine_targets.clone();
        let refinement = !refine_targets.is_empty();
        // A feedback-cancelled generation round reruns this phase; research
        // already integrated for this iteration is not repeated.
        let have_findings = snapshot.findings.iter().any(|f| f.iteration == iteration);

        if !refinement && !have_findings {
            match self.research_round().await? {
                Some(outcome) => return Ok(outcome),
                None => {}
            }
        }

        match self.generation_round(&refine_targets).await? {
            Some(outcome) => return Ok(outcome),
            None => {}
        }

        self.store.clear_feedback();
        self.transition(Phase::Working, Phase::Evaluating, "candidates generated")?;
        Ok(PhaseOutcome::Advance)
    }

    /// Research sub-round of the Working phase. Returns a phase outcome when
    /// the phase cannot advance normally.
    async fn research_round(&mut self) -> Result<Option<PhaseOutcome>> {
        let snapshot = self.store.snapshot();
        let contexts: Vec<_> = (0..self.config.engine.researcher_count)
            .map(|_| ContextFilter::build(&snapshot, Role::Researcher, Phase::Working))
            .collect();
        let plan_steps: Vec<String> = snapshot
            .approved_plan()
            .map(|p| p.steps.clone())
            .unwrap_or_default();

        match self
            .run_role_group(Phase::Working, Role::Researcher, &contexts, self.group_policy())
            .await?
        {
            RoleGroupResult::Outcomes(results) => {
                for result in &results {
                    if let MemberOutcome::Success(output) = &result.outcome {
                        self.record_member_cost(result.member, &output.calls);
                        let topic = plan_steps
                            .get(result.member.index)
                            .cloned()
                            .unwrap_or_else(|| "general".to_string());
                        self.store.append_finding(Finding::new(
                            result.member,
                            topic,
                            output.content.clone(),
                        ));
                    }
                }
                Ok(None)
            }
            RoleGroupResult::Interrupted(cause) => Ok(Some(self.interrupted(cause))),
            RoleGroupResult::Exhausted(reason) => Ok(Some(PhaseOutcome::Abort(reason))),
        }
    }

    /// Generation sub-round: fresh candidates on the first pass, refinement
    /// of the top-K selection on iteration loops.
    async fn generation_round(&mut self, refine_targets: &[String]) -> Result<Option<PhaseOutcome>> {
        let snapshot = self.store.snapshot();
        let iteration = snapshot.session.iteration;
        let count = self.config.engine.brainstormer_count;

        let contexts: Vec<_> = (0..count)
            .map(|_| {
                if refine_targets.is_empty() {
                    ContextFilter::build(&snapshot, Role::Brainstormer, Phase::Working)
                } else {
                    ContextFilter::build_refinement(
                        &snapshot,
                        Role::Brainstormer,
                        Phase::Working,
                        refine_targets,
                    )
                }
            })
            .collect();

        match self
            .run_role_group(Phase::Working, Role::Brainstormer, &contexts, self.group_policy())
            .await?
        {
            RoleGroupResult::Outcomes(results) => {
                for result in &results {
                    if let MemberOutcome::Success(output) = &result.outcome {
                        self.record_member_cost(result.member, &output.calls);
                        let variant = format!("i{}-b{}", iteration, result.member.index);
                        let mut candidate =
                            Candidate::new(result.member, variant, output.content.clone());
                        if !refine_targets.is_empty() {
                            let parent =
                                &refine_targets[result.member.index % refine_targets.len()];
                            candidate = candidate.refinement_of(parent.clone());
                        }
                        self.store.append_candidate(candidate);
                    }
                }
                Ok(None)
            }
            RoleGroupResult::Interrupted(cause) => Ok(Some(self.interrupted(cause))),
            RoleGroupResult::Exhausted(reason) => Ok(Some(PhaseOutcome::Abort(reason))),
        }
    }

    async fn phase_evaluating(&mut self) -> Result<PhaseOutcome> {
        let snapshot = self.store.snapshot();
        let iteration = snapshot.session.iteration;
        let base = ContextFilter::build(&snapshot, Role::Evaluator, Phase::Evaluating);
        if base.candidates.is_empty() {
            return Ok(PhaseOutcome::Abort(format!(
                "no candidates to evaluate at iteration {}",
                iteration
            )));
        }

        // One evaluator member per candidate; contexts narrowed so each
        // member scores exactly one candidate.
        let contexts: Vec<_> = base
            .candidates
            .iter()
            .map(|candidate| {
                let mut ctx = base.clone();
                ctx.candidates = vec![candidate.clone()];
                ctx
            })
            .collect();

        match self
            .run_role_group(Phase::Evaluating, Role::Evaluator, &contexts, ExecutionPolicy::WaitAll)
            .await?
        {
            RoleGroupResult::Outcomes(results) => {
                for result in &results {
                    if let MemberOutcome::Success(output) = &result.outcome {
                        self.record_member_cost(result.member, &output.calls);
                        let candidate_id =
                            base.candidates[result.member.index].candidate_id.clone();
                        let scores = parse_scores(&output.content);
                        self.store.append_evaluation(
                            Evaluation::new(candidate_id, iteration, scores)
                                .with_rationale(output.content.clone()),
                        )?;
                    }
                }
                self.store.clear_feedback();
                self.transition(Phase::Evaluating, Phase::Deciding, "candidates scored")?;
                Ok(PhaseOutcome::Advance)
            }
            RoleGroupResult::Interrupted(cause) => Ok(self.interrupted(cause)),
            RoleGroupResult::Exhausted(reason) => Ok(PhaseOutcome::Abort(reason)),
        }
    }

    fn phase_deciding(&mut self) -> Result<PhaseOutcome> {
        let snapshot = self.store.snapshot();
        let iteration = snapshot.session.iteration;
        let best = snapshot.best_evaluation().map(|e| e.final_score());
        let threshold = snapshot.session.quality_threshold;

        if let Some(score) = best {
            if score >= threshold {
                info!(score, threshold, iteration, "Quality gate met");
                self.transition(Phase::Deciding, Phase::Reporting, "quality gate met")?;
                return Ok(PhaseOutcome::Advance);
            }
        }

        if iteration >= snapshot.session.max_iterations {
            info!(iteration, "Iteration budget exhausted");
            self.store.set_refine_targets(Vec::new());
            self.transition(Phase::Deciding, Phase::Reporting, "iterations exhausted")?;
            return Ok(PhaseOutcome::Advance);
        }

        // Narrow the next round to the top-K candidates of this iteration.
        let mut scored: Vec<(String, f64)> = snapshot
            .evaluations_for_iteration(iteration)
            .iter()
            .map(|e| (e.candidate_id.clone(), e.final_score()))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let targets: Vec<String> = scored
            .into_iter()
            .take(self.config.engine.refine_top_k)
            .map(|(id, _)| id)
            .collect();

        self.store.set_refine_targets(targets);
        self.store.advance_iteration(iteration)?;
        self.transition(Phase::Deciding, Phase::Working, "refining top candidates")?;
        Ok(PhaseOutcome::Advance)
    }

    fn phase_reporting(&mut self) -> Result<PhaseOutcome> {
        self.store
            .set_status(SessionStatus::Running, SessionStatus::Completed)?;
        self.transition(Phase::Reporting, Phase::Done, "report delivered")?;

        let best = self.store.snapshot().best_evaluation().map(|e| e.final_score());
        self.emit(EventKind::SessionCompleted {
            best_score: best,
            checkpoint_id: self.last_checkpoint.clone().unwrap_or_default(),
        });
        Ok(PhaseOutcome::Advance)
    }

    // ---- group execution --------------------------------------------------

    async fn run_role_group(
        &mut self,
        phase: Phase,
        role: Role,
        contexts: &[FilteredContext],
        policy: ExecutionPolicy,
    ) -> Result<RoleGroupResult> {
        for attempt in 0..2 {
            let cancel = CancelToken::new();
            let mut group = ParallelTaskGroup::new(policy, cancel.clone());
            for (index, context) in contexts.iter().enumerate() {
                group.add_member(
                    AgentInvoker::new(
                        MemberId::new(role, index),
                        Arc::clone(&self.provider),
                        self.config.agent.clone(),
                        self.config.retry.clone(),
                    ),
                    context.clone(),
                );
            }

            let (results, cause) = self.run_with_interrupts(group, cancel).await;

            if let Some(cause) = cause {
                match &cause {
                    CancelCause::Feedback(text) => {
                        self.emit(EventKind::GroupCancelled { phase });
                        self.store.set_feedback(text.clone());
                        self.emit(EventKind::FeedbackInjected { text: text.clone() });
                        self.try_save_checkpoint();
                    }
                    CancelCause::Quit => {
                        self.emit(EventKind::GroupCancelled { phase });
                        self.try_save_checkpoint();
                    }
                }
                return Ok(RoleGroupResult::Interrupted(cause));
            }

            for result in &results {
                self.emit(EventKind::MemberFinished {
                    member: result.member,
                    success: result.outcome.is_success(),
                });
            }

            let successes = results.iter().filter(|r| r.outcome.is_success()).count();
            let failures: Vec<String> = results
                .iter()
                .filter(|r| matches!(r.outcome, MemberOutcome::Failure(_)))
                .map(|r| r.member.to_string())
                .collect();

            if successes > 0 {
                if !failures.is_empty() {
                    warn!(phase = %phase, role = %role, failed = ?failures, "Phase degraded but advancing");
                    self.emit(EventKind::PhaseDegraded {
                        phase,
                        failed_members: failures,
                    });
                }
                return Ok(RoleGroupResult::Outcomes(results));
            }

            if attempt == 0 {
                warn!(phase = %phase, role = %role, "All members failed, retrying phase once");
                self.emit(EventKind::PhaseRetrying {
                    phase,
                    role: role.to_string(),
                });
            }
        }

        Ok(RoleGroupResult::Exhausted(format!(
            "all {} members failed in {} after retry",
            role, phase
        )))
    }

    /// Await a task group while watching the interrupt channel. Signals that
    /// cancel in-flight work are applied immediately; everything else is
    /// deferred to the next phase boundary.
    async fn run_with_interrupts(
        &mut self,
        group: ParallelTaskGroup,
        cancel: CancelToken,
    ) -> (Vec<MemberResult>, Option<CancelCause>) {
        let run = group.run();
        tokio::pin!(run);

        let mut cause = None;
        let results = loop {
            tokio::select! {
                results = &mut run => break results,
                _ = tokio::time::sleep(INTERRUPT_POLL_INTERVAL) => {
                    while let Some(signal) = self.interrupts.poll() {
                        match signal {
                            ControlSignal::StopWithFeedback(text) if cause.is_none() => {
                                info!("Stop requested, cancelling in-flight members");
                                cancel.cancel();
                                cause = Some(CancelCause::Feedback(text));
                            }
                            ControlSignal::Quit if cause.is_none() => {
                                info!("Quit requested, cancelling in-flight members");
                                cancel.cancel();
                                cause = Some(CancelCause::Quit);
                            }
                            other => self.deferred.push_back(other),
                        }
                    }
                }
            }
        };

        (results, cause)
    }

    // ---- signals ----------------------------------------------------------

    async fn apply_boundary_signals(&mut self) -> Result<BoundaryAction> {
        let mut pending: VecDeque<ControlSignal> = std::mem::take(&mut self.deferred);
        while let Some(signal) = self.interrupts.poll() {
            pending.push_back(signal);
        }

        while let Some(signal) = pending.pop_front() {
            match signal {
                ControlSignal::Skip => {
                    self.skip_clarification = true;
                }
                ControlSignal::Pause => {
                    if matches!(self.pause_until_resumed().await?, BoundaryAction::Quit) {
                        return Ok(BoundaryAction::Quit);
                    }
                }
                ControlSignal::Resume => {}
                ControlSignal::StopWithFeedback(text) => {
                    self.store.set_feedback(text.clone());
                    self.emit(EventKind::FeedbackInjected { text });
                }
                ControlSignal::ApprovePlan | ControlSignal::RejectPlan(_) => {
                    warn!("Plan decision received outside plan approval, ignoring");
                }
                ControlSignal::OverrideScore {
                    candidate_id,
                    score,
                } => match self.store.override_score(&candidate_id, score) {
                    Ok(()) => info!(%candidate_id, score, "Score override applied"),
                    Err(e) => warn!(error = %e, "Rejected score override"),
                },
                ControlSignal::ChangeMode(mode) => {
                    info!(%mode, "Execution mode changed");
                    self.store.set_mode(mode);
                }
                ControlSignal::AdjustMaxIterations(max) => {
                    if let Err(e) = self.store.set_max_iterations(max) {
                        warn!(error = %e, "Rejected max_iterations adjustment");
                    }
                }
                ControlSignal::Quit => return Ok(BoundaryAction::Quit),
            }
        }

        Ok(BoundaryAction::Continue)
    }

    async fn pause_until_resumed(&mut self) -> Result<BoundaryAction> {
        self.store
            .set_status(SessionStatus::Running, SessionStatus::Paused)?;
        self.try_save_checkpoint();
        self.emit(EventKind::Paused);
        info!("Session paused, awaiting resume");

        loop {
            tokio::time::sleep(INTERRUPT_POLL_INTERVAL).await;
            while let Some(signal) = self.interrupts.poll() {
                match signal {
                    ControlSignal::Resume => {
                        self.store
                            .set_status(SessionStatus::Paused, SessionStatus::Running)?;
                        self.try_save_checkpoint();
                        self.emit(EventKind::Resumed);
                        info!("Session resumed");
                        return Ok(BoundaryAction::Continue);
                    }
                    ControlSignal::Quit => return Ok(BoundaryAction::Quit),
                    other => self.deferred.push_back(other),
                }
            }
        }
    }

    /// Hold the session in `AwaitingInput` until the user rules on the
    /// proposed plan. Signals that are not a plan decision are deferred to
    /// the next phase boundary.
    async fn await_plan_decision(&mut self) -> Result<PlanDecision> {
        let steps = self
            .store
            .snapshot()
            .latest_plan()
            .map(|p| p.steps.clone())
            .unwrap_or_default();
        self.store
            .set_status(SessionStatus::Running, SessionStatus::AwaitingInput)?;
        self.try_save_checkpoint();
        self.emit(EventKind::PlanProposed { steps });
        info!("Plan proposed, awaiting approval");

        loop {
            tokio::time::sleep(INTERRUPT_POLL_INTERVAL).await;
            while let Some(signal) = self.interrupts.poll() {
                match signal {
                    ControlSignal::ApprovePlan => {
                        self.store.approve_latest_plan()?;
                        self.store
                            .set_status(SessionStatus::AwaitingInput, SessionStatus::Running)?;
                        info!("Plan approved");
                        return Ok(PlanDecision::Approved);
                    }
                    ControlSignal::RejectPlan(feedback) => {
                        self.store.reject_latest_plan()?;
                        self.store.set_feedback(feedback.clone());
                        self.emit(EventKind::FeedbackInjected { text: feedback });
                        self.store
                            .set_status(SessionStatus::AwaitingInput, SessionStatus::Running)?;
                        info!("Plan rejected, replanning");
                        return Ok(PlanDecision::Rejected);
                    }
                    ControlSignal::Quit => return Ok(PlanDecision::Quit),
                    other => self.deferred.push_back(other),
                }
            }
        }
    }

    fn interrupted(&mut self, cause: CancelCause) -> PhaseOutcome {
        match cause {
            // State was not advanced; the same phase runs again with the
            // feedback present in every rebuilt context.
            CancelCause::Feedback(_) => PhaseOutcome::Rerun,
            CancelCause::Quit => PhaseOutcome::Quit,
        }
    }

    // ---- bookkeeping ------------------------------------------------------

    /// Phase transition plus its durable checkpoint. The next phase never
    /// starts on a failed write; the caller aborts on `Persistence`.
    fn transition(&mut self, from: Phase, to: Phase, reason: &str) -> Result<()> {
        self.store.set_phase(from, to, reason)?;
        self.save_checkpoint()
    }

    fn save_checkpoint(&mut self) -> Result<()> {
        let id = self.checkpoints.save(&self.store.snapshot())?;
        self.last_checkpoint = Some(id);
        Ok(())
    }

    /// Best-effort checkpoint for stop points that must still hand back a
    /// report (abort, quit, pause, cancellation). `last_checkpoint` keeps
    /// pointing at the last durable write when this fails.
    fn try_save_checkpoint(&mut self) {
        if let Err(e) = self.save_checkpoint() {
            warn!(error = %e, "Checkpoint write failed");
        }
    }

    fn record_member_cost(&mut self, member: MemberId, calls: &[crate::agent::UsageEvent]) {
        for call in calls {
            let record = self.store.record_cost(member, &call.model, call.usage);
            let total = self.store.snapshot().session.total_cost;
            self.emit(EventKind::CostIncurred {
                member,
                cost: record.cost,
                session_total: total,
            });
        }
    }

    fn needs_clarification(&self) -> bool {
        if self.skip_clarification {
            return false;
        }
        let clarification = &self.config.clarification;
        match clarification.mode {
            ClarificationMode::Always => true,
            ClarificationMode::Never => false,
            ClarificationMode::Auto => {
                let words = self
                    .store
                    .snapshot()
                    .session
                    .request
                    .split_whitespace()
                    .count();
                words < clarification.min_request_words
            }
        }
    }

    fn group_policy(&self) -> ExecutionPolicy {
        match self.config.engine.execution_policy {
            ExecutionPolicyKind::WaitAll => ExecutionPolicy::WaitAll,
            ExecutionPolicyKind::FirstN => ExecutionPolicy::FirstN(self.config.engine.first_n),
        }
    }

    fn abort(&mut self, reason: String) -> Result<RunReport> {
        warn!(%reason, "Aborting session");
        let status = self.store.snapshot().session.status;
        if status == SessionStatus::Running {
            self.store
                .set_status(SessionStatus::Running, SessionStatus::Aborted)?;
        }
        self.try_save_checkpoint();
        self.emit(EventKind::SessionAborted {
            reason,
            checkpoint_id: self.last_checkpoint.clone().unwrap_or_default(),
        });
        Ok(self.report(false))
    }

    fn quit_report(&mut self) -> Result<RunReport> {
        self.try_save_checkpoint();
        debug!("Quit requested, checkpointed and stopping");
        Ok(self.report(true))
    }

    fn report(&self, quit_requested: bool) -> RunReport {
        let snapshot = self.store.snapshot();
        let best = snapshot.best_evaluation();
        RunReport {
            session_id: snapshot.session.id.clone(),
            status: snapshot.session.status,
            iterations: snapshot.session.iteration,
            best_candidate_id: best.map(|e| e.candidate_id.clone()),
            best_score: best.map(|e| e.final_score()),
            total_cost: snapshot.session.total_cost,
            cost_breakdown: snapshot.ledger.breakdown(),
            checkpoint_id: self.last_checkpoint.clone(),
            quit_requested,
        }
    }

    fn emit(&self, kind: EventKind) {
        self.events
            .emit(EngineEvent::new(self.store.session_id(), kind));
    }
}

fn first_success(results: &[MemberResult]) -> Option<String> {
    results.iter().find_map(|r| match &r.outcome {
        MemberOutcome::Success(output) => Some(output.content.clone()),
        _ => None,
    })
}

/// Extract ordered step descriptions from planner output. Accepts numbered
/// lists, bullets, or plain lines.
fn parse_plan_steps(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim_start_matches(['-', '*'])
                .trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `key=value` score tokens from evaluator output. Missing component
/// scores default to the midpoint; a missing overall is the component mean.
fn parse_scores(content: &str) -> Scores {
    let grab = |key: &str| -> Option<f64> {
        let prefix = format!("{}=", key);
        content
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .find_map(|token| token.strip_prefix(prefix.as_str()))
            .and_then(|v| v.parse().ok())
    };

    let quality = grab("quality").unwrap_or(5.0);
    let clarity = grab("clarity").unwrap_or(5.0);
    let specificity = grab("specificity").unwrap_or(5.0);
    let overall = grab("overall").unwrap_or((quality + clarity + specificity) / 3.0);
    Scores::clamped(quality, clarity, specificity, overall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_steps_formats() {
        let numbered = "1. Research the space\n2. Generate ideas\n3. Evaluate";
        assert_eq!(
            parse_plan_steps(numbered),
            vec!["Research the space", "Generate ideas", "Evaluate"]
        );

        let bullets = "- first\n* second\n\n  third";
        assert_eq!(parse_plan_steps(bullets), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_parse_scores_full() {
        let scores = parse_scores("quality=8.5 clarity=7.0 specificity=9.0 overall=8.2");
        assert_eq!(scores.quality, 8.5);
        assert_eq!(scores.overall, 8.2);
    }

    #[test]
    fn test_parse_scores_missing_overall_is_mean() {
        let scores = parse_scores("quality=6.0, clarity=9.0, specificity=6.0");
        assert!((scores.overall - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_scores_garbage_is_midpoint() {
        let scores = parse_scores("the candidate seemed fine");
        assert_eq!(scores.overall, 5.0);
    }
}
