//! End-to-end workflow scenarios driven through the public engine API with
//! a scripted provider backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use symposium::agent::{ProviderResult, ScriptedProvider};
use symposium::checkpoint::CheckpointManager;
use symposium::config::{ClarificationMode, RetryConfig, SymposiumConfig};
use symposium::context::FilteredContext;
use symposium::cost::Usage;
use symposium::error::ProviderError;
use symposium::orchestrator::{Engine, EventKind};
use symposium::session::{ExecutionMode, PlanApproval};
use symposium::{ControlSignal, Role, SessionStatus, TextProvider};

fn test_config() -> SymposiumConfig {
    let mut config = SymposiumConfig::default();
    config.engine.mode = ExecutionMode::Autonomous;
    config.engine.researcher_count = 3;
    config.engine.brainstormer_count = 3;
    config.engine.max_iterations = 10;
    config.engine.quality_threshold = 9.0;
    config.engine.refine_top_k = 2;
    config.agent.timeout_secs = 5;
    config.retry = RetryConfig {
        max_attempts: 1,
        timeout_delay_ms: 1,
        rate_limit_delay_ms: 1,
        network_delay_ms: 1,
        max_backoff_ms: 1,
    };
    config.clarification.mode = ClarificationMode::Never;
    config
}

fn checkpoints(dir: &TempDir) -> CheckpointManager {
    CheckpointManager::new(dir.path().join("checkpoints.db"), 10).unwrap()
}

fn score_reply(overall: f64) -> String {
    format!(
        "quality={:.1} clarity={:.1} specificity={:.1} overall={:.1}",
        overall, overall, overall, overall
    )
}

#[tokio::test]
async fn quality_gate_terminates_at_iteration_three() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    // Iteration 1 scores 5.0, iteration 2 scores 8.0, iteration 3 contains
    // a 9.2 which clears the 9.0 threshold.
    for _ in 0..3 {
        provider.push_reply(Role::Evaluator, &score_reply(5.0), Usage::default());
    }
    for _ in 0..3 {
        provider.push_reply(Role::Evaluator, &score_reply(8.0), Usage::default());
    }
    provider.push_reply(Role::Evaluator, &score_reply(9.2), Usage::default());
    provider.push_reply(Role::Evaluator, &score_reply(8.0), Usage::default());
    provider.push_reply(Role::Evaluator, &score_reply(8.0), Usage::default());

    let mut engine = Engine::new(
        "generate prompts",
        test_config(),
        provider.clone(),
        checkpoints(&dir),
    );
    let report = engine.run().await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.best_score, Some(9.2));

    let snapshot = engine.store().snapshot();
    assert_eq!(snapshot.session.phase, symposium::Phase::Done);
    // Refinement rounds created lineage from the first generation.
    assert!(snapshot.candidates.iter().any(|c| c.parent_id.is_some()));
}

#[tokio::test]
async fn single_member_failure_degrades_but_advances() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    // One researcher call fails permanently; the other two synthesize.
    provider.push(
        Role::Researcher,
        Err(ProviderError::Permanent("simulated member failure".into())),
    );

    let mut config = test_config();
    config.engine.quality_threshold = 1.0;

    let mut engine = Engine::new("low bar request", config, provider, checkpoints(&dir));
    let mut events = engine.subscribe();
    let report = engine.run().await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.iterations, 1);

    let snapshot = engine.store().snapshot();
    assert_eq!(snapshot.findings.len(), 2);

    let mut saw_degraded = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event.kind, EventKind::PhaseDegraded { .. }) {
            saw_degraded = true;
        }
    }
    assert!(saw_degraded);
}

#[tokio::test]
async fn all_researchers_failing_twice_aborts_with_loadable_checkpoint() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    // Three members, two phase-level attempts, transient errors whose
    // retries are exhausted (max_attempts = 1).
    for _ in 0..6 {
        provider.push(
            Role::Researcher,
            Err(ProviderError::Network("simulated outage".into())),
        );
    }

    let manager = checkpoints(&dir);
    let mut engine = Engine::new("doomed request", test_config(), provider, manager.clone());
    let mut events = engine.subscribe();
    let report = engine.run().await.unwrap();

    assert_eq!(report.status, SessionStatus::Aborted);
    assert!(!report.is_success());

    let checkpoint_id = report.checkpoint_id.expect("abort must leave a checkpoint");
    let restored = manager.load(&checkpoint_id).unwrap();
    assert_eq!(restored.session.status, SessionStatus::Aborted);

    let mut retried = false;
    let mut aborted = false;
    while let Ok(event) = events.try_recv() {
        match event.kind {
            EventKind::PhaseRetrying { ref role, .. } if role == "researcher" => retried = true,
            EventKind::SessionAborted { .. } => aborted = true,
            _ => {}
        }
    }
    assert!(retried);
    assert!(aborted);
}

#[tokio::test]
async fn aborted_session_resumes_from_reported_checkpoint() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    for _ in 0..6 {
        provider.push(
            Role::Researcher,
            Err(ProviderError::Network("simulated outage".into())),
        );
    }

    let mut config = test_config();
    config.engine.quality_threshold = 1.0;

    let manager = checkpoints(&dir);
    let mut engine = Engine::new(
        "recoverable request",
        config.clone(),
        provider.clone(),
        manager.clone(),
    );
    let session_id = engine.store().session_id();
    let report = engine.run().await.unwrap();
    assert_eq!(report.status, SessionStatus::Aborted);
    let checkpoint_id = report.checkpoint_id.expect("abort must leave a checkpoint");

    // The checkpoint the abort points at is a usable resume point: the
    // session re-enters the failed phase and runs to completion once the
    // provider recovers.
    let snapshot = manager.load(&checkpoint_id).unwrap();
    assert_eq!(snapshot.session.status, SessionStatus::Aborted);
    let mut resumed = Engine::resume(snapshot, config, provider, manager).unwrap();
    let report = resumed.run().await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.session_id, session_id);
    assert!(!resumed.store().snapshot().findings.is_empty());
}

#[tokio::test]
async fn failed_checkpoint_write_aborts_instead_of_advancing() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());

    let mut config = test_config();
    config.engine.quality_threshold = 1.0;

    let manager = checkpoints(&dir);
    let mut engine = Engine::new("doomed persistence", config, provider, manager);
    let mut events = engine.subscribe();

    // Break the store underneath the running engine; the first transition's
    // checkpoint write fails and the session must abort instead of running
    // the next phase.
    let sabotage = rusqlite::Connection::open(dir.path().join("checkpoints.db")).unwrap();
    sabotage.execute("DROP TABLE checkpoints", []).unwrap();

    let report = engine.run().await.unwrap();

    assert_eq!(report.status, SessionStatus::Aborted);
    assert_eq!(report.checkpoint_id, None);

    let mut aborted = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event.kind, EventKind::SessionAborted { .. }) {
            aborted = true;
        }
    }
    assert!(aborted);
}

#[tokio::test]
async fn planner_failure_aborts_session() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    for _ in 0..2 {
        provider.push(
            Role::Planner,
            Err(ProviderError::Permanent("planner down".into())),
        );
    }

    let mut engine = Engine::new("anything", test_config(), provider, checkpoints(&dir));
    let report = engine.run().await.unwrap();

    assert_eq!(report.status, SessionStatus::Aborted);
    assert!(report.checkpoint_id.is_some());
}

#[tokio::test]
async fn iteration_budget_exhaustion_reports_best_effort() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());

    let mut config = test_config();
    config.engine.max_iterations = 2;
    // Synthesized evaluator replies score 7.0, below the 9.0 gate.

    let mut engine = Engine::new("unreachable bar", config, provider, checkpoints(&dir));
    let report = engine.run().await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.best_score, Some(7.0));
}

#[tokio::test]
async fn clarifying_phase_runs_for_short_requests() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_reply(
        Role::Expert,
        "target audience is enterprise developers",
        Usage::default(),
    );

    let mut config = test_config();
    config.engine.quality_threshold = 1.0;
    config.clarification.mode = ClarificationMode::Auto;
    config.clarification.min_request_words = 8;

    let mut engine = Engine::new("short request", config, provider, checkpoints(&dir));
    let report = engine.run().await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    let snapshot = engine.store().snapshot();
    assert_eq!(
        snapshot.clarification.as_deref(),
        Some("target audience is enterprise developers")
    );
}

/// Scripted provider that records every context it receives and can slow
/// one role down enough for interrupts to land mid-flight.
struct RecordingProvider {
    inner: ScriptedProvider,
    seen: Mutex<Vec<(Role, FilteredContext)>>,
    slow_role: Role,
    delay: Duration,
}

impl RecordingProvider {
    fn new(slow_role: Role, delay: Duration) -> Self {
        Self {
            inner: ScriptedProvider::new(),
            seen: Mutex::new(Vec::new()),
            slow_role,
            delay,
        }
    }
}

#[async_trait]
impl TextProvider for RecordingProvider {
    async fn invoke(
        &self,
        role: Role,
        context: &FilteredContext,
        config: &symposium::config::AgentConfig,
    ) -> ProviderResult {
        self.seen.lock().push((role, context.clone()));
        if role == self.slow_role && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.invoke(role, context, config).await
    }
}

#[tokio::test]
async fn stop_with_feedback_discards_round_and_injects_feedback() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(RecordingProvider::new(
        Role::Brainstormer,
        Duration::from_millis(300),
    ));

    let mut config = test_config();
    config.engine.quality_threshold = 1.0;

    let manager = checkpoints(&dir);
    let mut engine = Engine::new(
        "prompts for a product launch",
        config,
        provider.clone(),
        manager,
    );
    let interrupts = engine.interrupts();
    let mut events = engine.subscribe();

    let handle = tokio::spawn(async move {
        let report = engine.run().await.unwrap();
        (report, engine)
    });

    // Wait until the first brainstormer call is in flight, then interrupt.
    loop {
        if provider
            .seen
            .lock()
            .iter()
            .any(|(role, _)| *role == Role::Brainstormer)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    interrupts.post(ControlSignal::StopWithFeedback(
        "focus on sustainable materials".into(),
    ));

    let (report, engine) = handle.await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);

    // Only the post-feedback generation round was persisted.
    let snapshot = engine.store().snapshot();
    assert_eq!(snapshot.candidates.len(), 3);

    // The rerun's brainstormer contexts carried the feedback.
    let seen = provider.seen.lock();
    let brainstormer_contexts: Vec<_> = seen
        .iter()
        .filter(|(role, _)| *role == Role::Brainstormer)
        .collect();
    assert!(brainstormer_contexts.len() >= 6);
    assert!(
        brainstormer_contexts
            .iter()
            .any(|(_, ctx)| ctx.feedback.as_deref() == Some("focus on sustainable materials"))
    );

    let mut cancelled = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event.kind, EventKind::GroupCancelled { .. }) {
            cancelled = true;
        }
    }
    assert!(cancelled);
}

#[tokio::test]
async fn pause_and_resume_round_trip() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());

    let mut config = test_config();
    config.engine.quality_threshold = 1.0;

    let mut engine = Engine::new("pausable request", config, provider, checkpoints(&dir));
    let interrupts = engine.interrupts();
    let mut events = engine.subscribe();

    interrupts.post(ControlSignal::Pause);
    let handle = tokio::spawn(async move { engine.run().await.unwrap() });

    // Wait for the pause to take effect, then resume.
    loop {
        match events.recv().await {
            Ok(event) if matches!(event.kind, EventKind::Paused) => break,
            Ok(_) => {}
            Err(e) => panic!("event stream closed early: {}", e),
        }
    }
    interrupts.post(ControlSignal::Resume);

    let report = handle.await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
}

#[tokio::test]
async fn quit_checkpoints_without_completing_and_resumes() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());

    let mut config = test_config();
    config.engine.quality_threshold = 1.0;

    let manager = checkpoints(&dir);
    let mut engine = Engine::new(
        "resumable request",
        config.clone(),
        provider.clone(),
        manager.clone(),
    );
    let session_id = engine.store().session_id();

    engine.interrupts().post(ControlSignal::Quit);
    let report = engine.run().await.unwrap();
    assert!(report.quit_requested);
    assert_ne!(report.status, SessionStatus::Completed);

    // Resume from the latest checkpoint and run to completion.
    let snapshot = manager.load_latest(&session_id).unwrap();
    let mut resumed = Engine::resume(snapshot, config, provider, manager).unwrap();
    let report = resumed.run().await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.session_id, session_id);
}

#[tokio::test]
async fn adjust_max_iterations_caps_the_loop() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());

    let config = test_config(); // threshold 9.0, synthesized scores 7.0

    let mut engine = Engine::new("capped request", config, provider, checkpoints(&dir));
    engine.interrupts().post(ControlSignal::AdjustMaxIterations(1));

    let report = engine.run().await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.iterations, 1);
}

#[tokio::test]
async fn interactive_plan_requires_approval() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());

    let mut config = test_config();
    config.engine.mode = ExecutionMode::Interactive;
    config.engine.quality_threshold = 1.0;

    let mut engine = Engine::new("interactive request", config, provider, checkpoints(&dir));
    let interrupts = engine.interrupts();
    let mut events = engine.subscribe();
    let store = engine.store().clone();

    let handle = tokio::spawn(async move { engine.run().await.unwrap() });

    // The engine holds in AwaitingInput until the user rules on the plan.
    loop {
        match events.recv().await {
            Ok(event) if matches!(event.kind, EventKind::PlanProposed { .. }) => break,
            Ok(_) => {}
            Err(e) => panic!("event stream closed early: {}", e),
        }
    }
    assert_eq!(store.snapshot().session.status, SessionStatus::AwaitingInput);
    interrupts.post(ControlSignal::ApprovePlan);

    let report = handle.await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.plans.len(), 1);
    assert_eq!(snapshot.plans[0].approval, PlanApproval::Approved);
}

#[tokio::test]
async fn rejected_plan_triggers_replanning_with_feedback() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(RecordingProvider::new(Role::Planner, Duration::ZERO));

    let mut config = test_config();
    config.engine.mode = ExecutionMode::Interactive;
    config.engine.quality_threshold = 1.0;

    let mut engine = Engine::new(
        "replannable request",
        config,
        provider.clone(),
        checkpoints(&dir),
    );
    let interrupts = engine.interrupts();
    let mut events = engine.subscribe();
    let store = engine.store().clone();

    let handle = tokio::spawn(async move { engine.run().await.unwrap() });

    let mut proposals = 0;
    loop {
        match events.recv().await {
            Ok(event) if matches!(event.kind, EventKind::PlanProposed { .. }) => {
                proposals += 1;
                if proposals == 1 {
                    interrupts.post(ControlSignal::RejectPlan(
                        "add a competitor analysis step".into(),
                    ));
                } else {
                    interrupts.post(ControlSignal::ApprovePlan);
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => panic!("event stream closed early: {}", e),
        }
    }

    let report = handle.await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.plans.len(), 2);
    assert_eq!(snapshot.plans[0].approval, PlanApproval::Rejected);
    assert_eq!(snapshot.plans[1].approval, PlanApproval::Approved);

    // The replanning context carried the rejection feedback.
    let seen = provider.seen.lock();
    let planner_contexts: Vec<_> = seen
        .iter()
        .filter(|(role, _)| *role == Role::Planner)
        .collect();
    assert_eq!(planner_contexts.len(), 2);
    assert_eq!(
        planner_contexts[1].1.feedback.as_deref(),
        Some("add a competitor analysis step")
    );
}

#[tokio::test]
async fn score_override_decides_the_gate() {
    let dir = TempDir::new().unwrap();
    // Slow evaluators leave a window to post the override mid-phase; it is
    // applied at the Evaluating boundary, once the evaluations exist.
    let provider = Arc::new(RecordingProvider::new(
        Role::Evaluator,
        Duration::from_millis(300),
    ));

    // Synthesized evaluator scores are 7.0, below the 9.0 gate; only the
    // human override clears it.
    let config = test_config();

    let mut engine = Engine::new("overridable request", config, provider.clone(), checkpoints(&dir));
    let interrupts = engine.interrupts();
    let store = engine.store().clone();

    let handle = tokio::spawn(async move { engine.run().await.unwrap() });

    loop {
        if provider
            .seen
            .lock()
            .iter()
            .any(|(role, _)| *role == Role::Evaluator)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let candidate_id = store.snapshot().candidates[0].id.clone();
    interrupts.post(ControlSignal::OverrideScore {
        candidate_id: candidate_id.clone(),
        score: 9.6,
    });

    let report = handle.await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.best_score, Some(9.6));
    assert_eq!(report.best_candidate_id, Some(candidate_id));
}

#[tokio::test]
async fn provider_timeout_is_a_failure_not_a_crash() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(RecordingProvider::new(Role::Brainstormer, Duration::from_secs(3)));

    let mut config = test_config();
    config.engine.quality_threshold = 1.0;
    config.engine.brainstormer_count = 1;
    config.agent.timeout_secs = 1;

    let manager = checkpoints(&dir);
    let mut engine = Engine::new("slow generation", config, provider, manager.clone());
    let report = engine.run().await.unwrap();

    // The only brainstormer timing out twice exhausts the phase retry.
    assert_eq!(report.status, SessionStatus::Aborted);
    let checkpoint_id = report.checkpoint_id.unwrap();
    assert!(manager.load(&checkpoint_id).is_ok());
}
