//! Agent invocation layer.
//!
//! One `AgentInvoker` per concurrently-executing member; members run inside
//! a `ParallelTaskGroup` under an execution policy. The text-generation
//! backend sits behind the `TextProvider` seam.

mod group;
mod invoker;
mod provider;
mod roles;

pub use group::{ExecutionPolicy, ParallelTaskGroup};
pub use invoker::{AgentInvoker, MemberOutcome, MemberOutput, MemberResult, UsageEvent};
pub use provider::{ProviderReply, ProviderResult, ScriptedProvider, TextProvider};
pub use roles::{MemberId, Role};
