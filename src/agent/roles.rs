use std::fmt;

use serde::{Deserialize, Serialize};

/// Functional agent category. Ordering is meaningful: group results are
/// integrated into session state sorted by role, then member index, so
/// replays are reproducible regardless of completion order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Planner,
    Expert,
    Researcher,
    Brainstormer,
    Evaluator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Expert => "expert",
            Self::Researcher => "researcher",
            Self::Brainstormer => "brainstormer",
            Self::Evaluator => "evaluator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One concurrently-executing instance of a role within a task group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId {
    pub role: Role,
    pub index: usize,
}

impl MemberId {
    pub fn new(role: Role, index: usize) -> Self {
        Self { role, index }
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_display() {
        assert_eq!(MemberId::new(Role::Researcher, 0).to_string(), "researcher-0");
        assert_eq!(MemberId::new(Role::Brainstormer, 2).to_string(), "brainstormer-2");
    }

    #[test]
    fn test_deterministic_ordering() {
        let mut ids = vec![
            MemberId::new(Role::Brainstormer, 1),
            MemberId::new(Role::Researcher, 2),
            MemberId::new(Role::Brainstormer, 0),
            MemberId::new(Role::Researcher, 0),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                MemberId::new(Role::Researcher, 0),
                MemberId::new(Role::Researcher, 2),
                MemberId::new(Role::Brainstormer, 0),
                MemberId::new(Role::Brainstormer, 1),
            ]
        );
    }
}
