//! Workflow state machine types.

mod machine;

pub use machine::{Phase, PhaseTransition, SessionStatus};
