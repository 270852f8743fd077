use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::invoker::{AgentInvoker, MemberOutcome, MemberResult};
use crate::context::FilteredContext;
use crate::interrupt::CancelToken;

/// Completion policy for a task group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// Every member must finish (or fail) before the group completes. A
    /// failing member never cancels its siblings.
    WaitAll,
    /// The group is satisfied once `n` members succeed; the rest are
    /// cooperatively cancelled.
    FirstN(usize),
}

/// Runs a set of independent member invocations concurrently.
///
/// Results are returned sorted by (role, member index) regardless of
/// completion order, so downstream state integration is deterministic and
/// replays reproduce.
pub struct ParallelTaskGroup {
    members: Vec<(AgentInvoker, FilteredContext)>,
    policy: ExecutionPolicy,
    cancel: CancelToken,
}

impl ParallelTaskGroup {
    pub fn new(policy: ExecutionPolicy, cancel: CancelToken) -> Self {
        Self {
            members: Vec::new(),
            policy,
            cancel,
        }
    }

    pub fn add_member(&mut self, invoker: AgentInvoker, context: FilteredContext) {
        self.members.push((invoker, context));
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub async fn run(self) -> Vec<MemberResult> {
        let member_count = self.members.len();
        info!(members = member_count, policy = ?self.policy, "Running task group");

        // Worker pool sized to the group; members are independent so every
        // permit is available up front.
        let semaphore = Arc::new(Semaphore::new(member_count.max(1)));
        let successes = Arc::new(AtomicUsize::new(0));

        let futures = self.members.into_iter().map(|(invoker, context)| {
            let semaphore = Arc::clone(&semaphore);
            let successes = Arc::clone(&successes);
            let cancel = self.cancel.clone();
            let policy = self.policy;
            async move {
                // Semaphore closure only happens on drop, acquire cannot fail here.
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let result = invoker.invoke(&context, &cancel).await;

                if result.outcome.is_success() {
                    let done = successes.fetch_add(1, Ordering::SeqCst) + 1;
                    if let ExecutionPolicy::FirstN(n) = policy {
                        if done >= n {
                            debug!(done, "first_n satisfied, cancelling remaining members");
                            cancel.cancel();
                        }
                    }
                }
                result
            }
        });

        let mut results = join_all(futures).await;
        results.sort_by_key(|r| r.member);

        let failed = results
            .iter()
            .filter(|r| matches!(r.outcome, MemberOutcome::Failure(_)))
            .count();
        let cancelled = results.iter().filter(|r| r.outcome.is_cancelled()).count();
        info!(
            members = member_count,
            failed, cancelled, "Task group finished"
        );

        results
    }
}
