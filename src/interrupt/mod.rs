//! Human-interrupt control surface.
//!
//! Producers (the CLI, tests) only ever *request*; the orchestrator applies
//! signals at defined safe points — phase boundaries, and cooperative
//! cancellation checks inside in-flight invokers. The channel never mutates
//! session state itself, which keeps the single-writer invariant intact.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::session::ExecutionMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// Advance without waiting for further optional input.
    Skip,
    /// Halt before the next phase; session stays resumable.
    Pause,
    Resume,
    /// Cancel the in-flight task group, inject feedback, continue.
    StopWithFeedback(String),
    /// Accept the proposed plan (interactive sessions).
    ApprovePlan,
    /// Send the plan back with feedback; the planner reruns.
    RejectPlan(String),
    /// Pin a human score onto a candidate's newest evaluation.
    OverrideScore { candidate_id: String, score: f64 },
    ChangeMode(ExecutionMode),
    AdjustMaxIterations(u32),
    /// Checkpoint and terminate the process loop without completing.
    Quit,
}

/// Queued control-signal source polled by the orchestrator.
#[derive(Clone, Default)]
pub struct InterruptChannel {
    queue: Arc<Mutex<VecDeque<ControlSignal>>>,
}

impl InterruptChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, signal: ControlSignal) {
        self.queue.lock().push_back(signal);
    }

    pub fn poll(&self) -> Option<ControlSignal> {
        self.queue.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Cooperative cancellation flag shared by every member of a task group.
///
/// Invokers check it at natural suspension points (before each provider
/// call) and stop making further external calls once set; partial output of
/// a cancelled member is discarded, never merged.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
