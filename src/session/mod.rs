//! Session aggregate and its single-writer store.
//!
//! Core domain types for one brainstorming session:
//! - `Session`: scalar fields owned by the orchestrator
//! - `Plan` / `Finding` / `Candidate` / `Evaluation`: append-only history
//! - `SessionStore`: the authoritative in-memory record
//! - `SessionSnapshot`: immutable view used by readers and checkpoints

mod store;
mod types;

pub use store::{SessionSnapshot, SessionStore};
pub use types::{
    Candidate, Evaluation, ExecutionMode, Finding, Plan, PlanApproval, Scores, Session,
};
