pub mod agent;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod interrupt;
pub mod orchestrator;
pub mod session;
pub mod state;

pub use agent::{MemberId, Role, ScriptedProvider, TextProvider};
pub use checkpoint::CheckpointManager;
pub use config::SymposiumConfig;
pub use context::{ContextFilter, FilteredContext};
pub use error::{ProviderError, Result, SymposiumError};
pub use interrupt::{ControlSignal, InterruptChannel};
pub use orchestrator::{Engine, EngineEvent, RunReport};
pub use session::{ExecutionMode, Session, SessionSnapshot, SessionStore};
pub use state::{Phase, SessionStatus};
