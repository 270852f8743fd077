use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::roles::Role;
use crate::config::AgentConfig;
use crate::context::FilteredContext;
use crate::cost::Usage;
use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub content: String,
    pub usage: Usage,
}

pub type ProviderResult = std::result::Result<ProviderReply, ProviderError>;

/// The external text-generation capability, one call per agent invocation.
/// Prompt construction and model selection live behind this seam.
#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn invoke(
        &self,
        role: Role,
        context: &FilteredContext,
        config: &AgentConfig,
    ) -> ProviderResult;
}

#[async_trait]
impl<P: TextProvider> TextProvider for Arc<P> {
    async fn invoke(
        &self,
        role: Role,
        context: &FilteredContext,
        config: &AgentConfig,
    ) -> ProviderResult {
        (**self).invoke(role, context, config).await
    }
}

/// Deterministic in-process provider.
///
/// With no scripted outcomes it synthesizes a plausible reply per role from
/// the filtered context, which makes the whole workflow runnable offline
/// (the CLI's default backend). Tests push scripted outcomes per role to
/// exercise failure and retry paths; scripted outcomes are consumed in FIFO
/// order before falling back to synthesis.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<Role, VecDeque<ProviderResult>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, role: Role, outcome: ProviderResult) {
        self.scripts.lock().entry(role).or_default().push_back(outcome);
    }

    pub fn push_reply(&self, role: Role, content: &str, usage: Usage) {
        self.push(
            role,
            Ok(ProviderReply {
                content: content.into(),
                usage,
            }),
        );
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn synthesize(role: Role, context: &FilteredContext) -> ProviderReply {
        let content = match role {
            Role::Planner => format!(
                "1. Research the problem space for: {}\n2. Generate candidate solutions\n3. Evaluate and refine",
                context.request
            ),
            Role::Expert => format!("Clarified requirements for: {}", context.request),
            Role::Researcher => format!("Findings on: {}", context.request),
            Role::Brainstormer => format!("Candidate solution for: {}", context.request),
            Role::Evaluator => "quality=7.0 clarity=7.0 specificity=7.0 overall=7.0".to_string(),
        };
        ProviderReply {
            usage: Usage {
                input_units: context.request.len() as u64,
                output_units: content.len() as u64,
            },
            content,
        }
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    async fn invoke(
        &self,
        role: Role,
        context: &FilteredContext,
        _config: &AgentConfig,
    ) -> ProviderResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripts.lock().get_mut(&role).and_then(|q| q.pop_front());
        match scripted {
            Some(outcome) => outcome,
            None => Ok(Self::synthesize(role, context)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig::default()
    }

    #[tokio::test]
    async fn test_scripted_outcomes_consumed_in_order() {
        let provider = ScriptedProvider::new();
        provider.push(
            Role::Researcher,
            Err(ProviderError::Network("reset".into())),
        );
        provider.push_reply(Role::Researcher, "second call works", Usage::default());

        let ctx = FilteredContext::default();
        assert!(
            provider
                .invoke(Role::Researcher, &ctx, &config())
                .await
                .is_err()
        );
        let reply = provider
            .invoke(Role::Researcher, &ctx, &config())
            .await
            .unwrap();
        assert_eq!(reply.content, "second call works");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_synthesis_fallback_per_role() {
        let provider = ScriptedProvider::new();
        let ctx = FilteredContext {
            request: "name a product".into(),
            ..Default::default()
        };
        let reply = provider
            .invoke(Role::Brainstormer, &ctx, &config())
            .await
            .unwrap();
        assert!(reply.content.contains("name a product"));
        assert!(reply.usage.output_units > 0);
    }
}
