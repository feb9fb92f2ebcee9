//! Queue entries: one in-flight or pending atomic task (§3).

use crate::hash::HashIndex;
use crate::model::hook::HookSpec;
use crate::model::task_spec::TaskSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type QueueId = String;

/// PENDING, COMPLETE, or ERROR — transitions are monotone; COMPLETE and
/// ERROR are terminal (§3 invariants).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Complete,
    Error,
}

impl QueueStatus {
    /// Whether a transition from `self` to `next` is legal under the
    /// monotone-terminal-state invariant: only PENDING may move, and only
    /// to one of the two terminal states.
    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Complete) | (QueueStatus::Pending, QueueStatus::Error)
        )
    }
}

/// One in-flight or pending atomic task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: QueueId,
    pub hash_index: HashIndex,
    /// Canonical identifying key tuple, stored alongside the spec so
    /// duplicate lookups don't need to recompute it.
    pub hash_keys: Value,
    pub spec: TaskSpec,
    /// Name of the registered output parser that will absorb this task's
    /// result (§4.2, §9 REDESIGN FLAGS: an explicit registry key, not a
    /// dynamically imported callable name).
    pub parser: String,
    pub tag: Option<String>,
    pub hooks: Vec<HookSpec>,
    pub status: QueueStatus,
}

/// A fresh task descriptor as emitted by an input parser, before the store
/// has assigned it a `queue_id` and initial PENDING status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub hash_index: HashIndex,
    pub hash_keys: Value,
    pub spec: TaskSpec,
    pub parser: String,
    pub tag: Option<String>,
    pub hooks: Vec<HookSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_transition_to_complete_or_error() {
        assert!(QueueStatus::Pending.can_transition_to(QueueStatus::Complete));
        assert!(QueueStatus::Pending.can_transition_to(QueueStatus::Error));
    }

    #[test]
    fn terminal_states_do_not_transition() {
        assert!(!QueueStatus::Complete.can_transition_to(QueueStatus::Pending));
        assert!(!QueueStatus::Complete.can_transition_to(QueueStatus::Error));
        assert!(!QueueStatus::Error.can_transition_to(QueueStatus::Complete));
        assert!(!QueueStatus::Error.can_transition_to(QueueStatus::Pending));
    }
}
