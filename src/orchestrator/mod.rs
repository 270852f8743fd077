//! Workflow orchestration.
//!
//! `Engine` drives the phase state machine; `EngineEvent` is the
//! observable stream the display layer consumes.

mod engine;
mod events;

pub use engine::{Engine, RunReport};
pub use events::{EngineEvent, EventBus, EventKind};
