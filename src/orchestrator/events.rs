use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent::MemberId;
use crate::state::Phase;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PhaseStarted {
        phase: Phase,
        iteration: u32,
    },
    PhaseRetrying {
        phase: Phase,
        role: String,
    },
    PhaseDegraded {
        phase: Phase,
        failed_members: Vec<String>,
    },
    MemberFinished {
        member: MemberId,
        success: bool,
    },
    CostIncurred {
        member: MemberId,
        cost: f64,
        session_total: f64,
    },
    GroupCancelled {
        phase: Phase,
    },
    FeedbackInjected {
        text: String,
    },
    PlanProposed {
        steps: Vec<String>,
    },
    Paused,
    Resumed,
    SessionCompleted {
        best_score: Option<f64>,
        checkpoint_id: String,
    },
    SessionAborted {
        reason: String,
        checkpoint_id: String,
    },
}

/// One entry in the engine's observable stream, consumed by the display
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub session_id: String,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            at: Utc::now(),
        }
    }
}

/// Broadcast fan-out for engine events. Emitting with no subscribers is
/// fine; events are observability, never control flow.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
