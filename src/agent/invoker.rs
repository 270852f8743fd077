use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::provider::TextProvider;
use super::roles::MemberId;
use crate::config::{AgentConfig, RetryConfig};
use crate::context::FilteredContext;
use crate::cost::Usage;
use crate::error::ProviderError;
use crate::interrupt::CancelToken;

/// Provider usage from one successful call, attributed for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberOutput {
    pub content: String,
    pub calls: Vec<UsageEvent>,
}

/// Terminal result of one member invocation. Cancellation is distinct from
/// failure: it never counts against a role and never advances the phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberOutcome {
    Success(MemberOutput),
    Failure(String),
    Cancelled,
}

impl MemberOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberResult {
    pub member: MemberId,
    pub outcome: MemberOutcome,
}

/// Wraps one logical agent member: cooperative cancellation before each
/// provider call, a bounded wait per call (timeout is a failure, not a
/// crash), and exponential backoff on transient provider errors.
pub struct AgentInvoker {
    member: MemberId,
    provider: Arc<dyn TextProvider>,
    agent: AgentConfig,
    retry: RetryConfig,
}

impl AgentInvoker {
    pub fn new(
        member: MemberId,
        provider: Arc<dyn TextProvider>,
        agent: AgentConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            member,
            provider,
            agent,
            retry,
        }
    }

    pub fn member(&self) -> MemberId {
        self.member
    }

    pub async fn invoke(&self, context: &FilteredContext, cancel: &CancelToken) -> MemberResult {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            if cancel.is_cancelled() {
                debug!(member = %self.member, "Cancelled before provider call");
                return self.result(MemberOutcome::Cancelled);
            }

            let call = self
                .provider
                .invoke(self.member.role, context, &self.agent);
            let outcome =
                tokio::time::timeout(Duration::from_secs(self.agent.timeout_secs), call).await;

            let error = match outcome {
                Ok(Ok(reply)) => {
                    debug!(member = %self.member, attempt, "Provider call succeeded");
                    return self.result(MemberOutcome::Success(MemberOutput {
                        content: reply.content,
                        calls: vec![UsageEvent {
                            model: self.agent.model.clone(),
                            usage: reply.usage,
                        }],
                    }));
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout {
                    duration_secs: self.agent.timeout_secs,
                },
            };

            last_error = error.to_string();

            if !error.is_transient() {
                warn!(member = %self.member, error = %error, "Permanent provider error");
                return self.result(MemberOutcome::Failure(last_error));
            }

            if attempt < self.retry.max_attempts {
                let delay = self.backoff_delay(&error, attempt);
                warn!(
                    member = %self.member,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient provider error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(member = %self.member, error = %last_error, "Retries exhausted");
        self.result(MemberOutcome::Failure(format!(
            "retries exhausted: {}",
            last_error
        )))
    }

    fn backoff_delay(&self, error: &ProviderError, attempt: u32) -> Duration {
        let base = error.suggested_delay(&self.retry);
        let scaled = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        scaled.min(Duration::from_millis(self.retry.max_backoff_ms))
    }

    fn result(&self, outcome: MemberOutcome) -> MemberResult {
        MemberResult {
            member: self.member,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::provider::ScriptedProvider;
    use crate::agent::roles::Role;

    fn invoker(provider: Arc<ScriptedProvider>) -> AgentInvoker {
        let retry = RetryConfig {
            max_attempts: 3,
            timeout_delay_ms: 1,
            rate_limit_delay_ms: 1,
            network_delay_ms: 1,
            max_backoff_ms: 5,
        };
        AgentInvoker::new(
            MemberId::new(Role::Researcher, 0),
            provider,
            AgentConfig::default(),
            retry,
        )
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(
            Role::Researcher,
            Err(ProviderError::Network("reset".into())),
        );
        provider.push(
            Role::Researcher,
            Err(ProviderError::RateLimited {
                retry_after_secs: None,
            }),
        );
        provider.push_reply(Role::Researcher, "third time lucky", Usage::default());

        let result = invoker(provider.clone())
            .invoke(&FilteredContext::default(), &CancelToken::new())
            .await;

        match result.outcome {
            MemberOutcome::Success(output) => assert_eq!(output.content, "third time lucky"),
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push(
            Role::Researcher,
            Err(ProviderError::Permanent("bad request".into())),
        );

        let result = invoker(provider.clone())
            .invoke(&FilteredContext::default(), &CancelToken::new())
            .await;

        assert!(matches!(result.outcome, MemberOutcome::Failure(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_failure() {
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..3 {
            provider.push(
                Role::Researcher,
                Err(ProviderError::Network("flaky".into())),
            );
        }

        let result = invoker(provider.clone())
            .invoke(&FilteredContext::default(), &CancelToken::new())
            .await;

        match result.outcome {
            MemberOutcome::Failure(reason) => assert!(reason.contains("retries exhausted")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_any_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = invoker(provider.clone())
            .invoke(&FilteredContext::default(), &cancel)
            .await;

        assert_eq!(result.outcome, MemberOutcome::Cancelled);
        assert_eq!(provider.call_count(), 0);
    }
}
