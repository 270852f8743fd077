//! Configuration types and loading.
//!
//! All settings live in one `#[serde(default)]` TOML document so a partial
//! config file is always valid. `validate()` collects every problem instead
//! of stopping at the first.

mod settings;

pub use settings::{
    AgentConfig, CheckpointConfig, ClarificationConfig, ClarificationMode, EngineConfig,
    ExecutionPolicyKind, PricingConfig, RetryConfig, SymposiumConfig,
};
