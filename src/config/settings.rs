use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::cost::ModelRates;
use crate::error::{Result, SymposiumError};
use crate::session::ExecutionMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SymposiumConfig {
    pub engine: EngineConfig,
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub checkpoint: CheckpointConfig,
    pub clarification: ClarificationConfig,
    pub pricing: PricingConfig,
}

impl SymposiumConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| SymposiumError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.engine.max_iterations == 0 {
            errors.push("engine.max_iterations must be greater than 0");
        }
        if !(0.0..=10.0).contains(&self.engine.quality_threshold) {
            errors.push("engine.quality_threshold must be between 0.0 and 10.0");
        }
        if self.engine.researcher_count == 0 {
            errors.push("engine.researcher_count must be greater than 0");
        }
        if self.engine.brainstormer_count == 0 {
            errors.push("engine.brainstormer_count must be greater than 0");
        }
        if self.engine.refine_top_k == 0 {
            errors.push("engine.refine_top_k must be greater than 0");
        }
        if self.engine.first_n == 0 {
            errors.push("engine.first_n must be greater than 0");
        }

        if self.agent.timeout_secs == 0 {
            errors.push("agent.timeout_secs must be greater than 0");
        }
        if self.agent.model.is_empty() {
            errors.push("agent.model must not be empty");
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be greater than 0");
        }

        if self.checkpoint.retain_per_session == 0 {
            errors.push("checkpoint.retain_per_session must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SymposiumError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicyKind {
    #[default]
    WaitAll,
    FirstN,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub mode: ExecutionMode,
    pub researcher_count: usize,
    pub brainstormer_count: usize,
    pub execution_policy: ExecutionPolicyKind,
    /// Member count satisfying a `first_n` group. Ignored under `wait_all`.
    pub first_n: usize,
    /// How many top-scored candidates are refined per iteration loop.
    pub refine_top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 8.0,
            max_iterations: 10,
            mode: ExecutionMode::Interactive,
            researcher_count: 3,
            brainstormer_count: 3,
            execution_policy: ExecutionPolicyKind::WaitAll,
            first_n: 1,
            refine_top_k: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "default-model".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per provider call, including the first.
    pub max_attempts: u32,
    pub timeout_delay_ms: u64,
    pub rate_limit_delay_ms: u64,
    pub network_delay_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_delay_ms: 1_000,
            rate_limit_delay_ms: 2_000,
            network_delay_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub retain_per_session: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            retain_per_session: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationMode {
    Always,
    #[default]
    Auto,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarificationConfig {
    pub mode: ClarificationMode,
    /// Under `auto`, requests shorter than this many words trigger the
    /// clarifying phase.
    pub min_request_words: usize,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self {
            mode: ClarificationMode::Auto,
            min_request_words: 8,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Dollar rates per 1 000 units, keyed by provider/model label.
    pub models: BTreeMap<String, ModelRates>,
}
