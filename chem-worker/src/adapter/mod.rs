//! # Backend Adapter Contract (§4.3)
//!
//! One adapter instance wraps one external execution framework. The
//! contract is deliberately small: submit a batch, harvest whatever has
//! finished, report outstanding count, and (test/synchronous use only)
//! block until drained.

pub mod distributed;
pub mod mock;
pub mod workflow_manager;

pub use distributed::DistributedWorkerAdapter;
pub use mock::MockAdapter;
pub use workflow_manager::WorkflowManagerAdapter;

use async_trait::async_trait;
use chem_shared::config::{AdapterConfig, AdapterSelection};
use chem_shared::error::AdapterError;
use chem_shared::model::{HookSpec, QueueEntry, QueueId, ResultPayload};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One harvested task result, as handed back by [`BackendAdapter::acquire_complete`]:
/// the raw payload, the name of the output parser that must absorb it, and
/// any hooks that were attached to the queue entry at submission time.
#[derive(Debug, Clone)]
pub struct Completion {
    pub payload: ResultPayload,
    pub parser: String,
    pub hooks: Vec<HookSpec>,
}

/// The uniform interface over one pluggable external compute backend
/// (§4.3). Object-safe so the nanny can hold a `Arc<dyn BackendAdapter>`
/// without knowing which concrete backend it was constructed against.
#[async_trait]
pub trait BackendAdapter: Send + Sync + std::fmt::Debug {
    /// Hand tasks to the backend. Ordering of completion is not guaranteed.
    async fn submit_tasks(&self, tasks: Vec<QueueEntry>) -> Result<Vec<QueueId>, AdapterError>;

    /// Return **and remove** all currently-finished tasks. Idempotent on
    /// empty (§8 invariant 5: a subsequent call with no new completions
    /// returns the empty map).
    async fn acquire_complete(&self) -> Result<BTreeMap<QueueId, Completion>, AdapterError>;

    /// Number of outstanding (submitted, not yet harvested) tasks.
    async fn task_count(&self) -> usize;

    /// Block until every outstanding task has reached a terminal state
    /// (test/synchronous use only, §4.3, §5 "Timeouts").
    async fn await_results(&self) -> Result<(), AdapterError>;

    /// Enumerate outstanding tasks (diagnostics).
    async fn list_tasks(&self) -> Vec<QueueId>;
}

/// Construct the concrete adapter named by `config.queue_type` (§6.3). An
/// unknown selector is a fatal configuration error raised by
/// [`AdapterSelection::parse`] before construction is attempted.
pub fn build_adapter(
    config: &AdapterConfig,
) -> Result<Arc<dyn BackendAdapter>, AdapterError> {
    let selection = AdapterSelection::parse(&config.queue_type)
        .map_err(|_| AdapterError::UnknownQueueType(config.queue_type.clone()))?;
    Ok(match selection {
        AdapterSelection::Distributed => Arc::new(DistributedWorkerAdapter::new()),
        AdapterSelection::WorkflowManager => {
            Arc::new(WorkflowManagerAdapter::new(config.poll_interval_ms))
        }
        AdapterSelection::Mock => Arc::new(MockAdapter::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_adapter_rejects_unknown_queue_type() {
        let config = AdapterConfig {
            queue_type: "bogus".to_string(),
            poll_interval_ms: 100,
        };
        let err = build_adapter(&config).unwrap_err();
        assert!(matches!(err, AdapterError::UnknownQueueType(_)));
    }

    #[test]
    fn build_adapter_accepts_mock() {
        let config = AdapterConfig {
            queue_type: "mock".to_string(),
            poll_interval_ms: 100,
        };
        assert!(build_adapter(&config).is_ok());
    }
}
