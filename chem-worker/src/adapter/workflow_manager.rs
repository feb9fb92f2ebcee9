//! The workflow-manager backend adapter (§6.3): a pollable external
//! launchpad (the Fireworks family in the original system). Grounded on
//! the teacher's `MessageClient` queue-polling pattern: submission enqueues
//! a message with the launchpad, a poll loop pulls back finished state.

use super::{BackendAdapter, Completion};
use async_trait::async_trait;
use chem_shared::error::AdapterError;
use chem_shared::model::{HookSpec, QueueEntry, QueueId, ResultPayload, TaskSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The external launchpad a workflow-manager adapter polls. Out of scope
/// for the orchestration core (§1) — this trait is the seam a production
/// deployment wires a real launchpad client behind.
#[async_trait]
pub trait LaunchpadClient: Send + Sync + std::fmt::Debug {
    /// Hand a task to the launchpad for eventual execution.
    async fn submit(&self, queue_id: &QueueId, spec: &TaskSpec) -> Result<(), AdapterError>;

    /// Ask the launchpad which of `queue_ids` have finished, and with what
    /// result. IDs absent from the returned map are still running.
    async fn poll(
        &self,
        queue_ids: &[QueueId],
    ) -> Result<BTreeMap<QueueId, ResultPayload>, AdapterError>;
}

/// A launchpad client with nothing behind it: accepts submissions, never
/// reports anything finished. Used as the default until a production
/// deployment wires in a real launchpad.
#[derive(Debug, Default)]
struct NullLaunchpadClient;

#[async_trait]
impl LaunchpadClient for NullLaunchpadClient {
    async fn submit(&self, _queue_id: &QueueId, _spec: &TaskSpec) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn poll(
        &self,
        _queue_ids: &[QueueId],
    ) -> Result<BTreeMap<QueueId, ResultPayload>, AdapterError> {
        Ok(BTreeMap::new())
    }
}

#[derive(Debug, Default)]
struct State {
    outstanding: BTreeMap<QueueId, (String, Vec<HookSpec>)>,
    completed: BTreeMap<QueueId, Completion>,
}

/// Pollable-launchpad-style adapter.
#[derive(Debug)]
pub struct WorkflowManagerAdapter {
    client: Arc<dyn LaunchpadClient>,
    poll_interval: Duration,
    state: Mutex<State>,
}

impl WorkflowManagerAdapter {
    pub fn new(poll_interval_ms: u64) -> Self {
        Self::with_client(Arc::new(NullLaunchpadClient), poll_interval_ms)
    }

    pub fn with_client(client: Arc<dyn LaunchpadClient>, poll_interval_ms: u64) -> Self {
        Self {
            client,
            poll_interval: Duration::from_millis(poll_interval_ms),
            state: Mutex::new(State::default()),
        }
    }

    /// One launchpad poll round: ask about every still-outstanding id and
    /// move any that finished into `completed`.
    async fn poll_once(&self) -> Result<(), AdapterError> {
        let ids: Vec<QueueId> = {
            let state = self.state.lock().await;
            state.outstanding.keys().cloned().collect()
        };
        if ids.is_empty() {
            return Ok(());
        }
        let finished = self.client.poll(&ids).await?;
        if finished.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        for (id, payload) in finished {
            if let Some((parser, hooks)) = state.outstanding.remove(&id) {
                state
                    .completed
                    .insert(id, Completion { payload, parser, hooks });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for WorkflowManagerAdapter {
    async fn submit_tasks(&self, tasks: Vec<QueueEntry>) -> Result<Vec<QueueId>, AdapterError> {
        let mut ids = Vec::with_capacity(tasks.len());
        let mut state = self.state.lock().await;
        for task in tasks {
            self.client.submit(&task.queue_id, &task.spec).await?;
            ids.push(task.queue_id.clone());
            state
                .outstanding
                .insert(task.queue_id, (task.parser, task.hooks));
        }
        Ok(ids)
    }

    async fn acquire_complete(&self) -> Result<BTreeMap<QueueId, Completion>, AdapterError> {
        self.poll_once().await?;
        let mut state = self.state.lock().await;
        Ok(std::mem::take(&mut state.completed))
    }

    async fn task_count(&self) -> usize {
        self.state.lock().await.outstanding.len()
    }

    async fn await_results(&self) -> Result<(), AdapterError> {
        loop {
            self.poll_once().await?;
            if self.state.lock().await.outstanding.is_empty() {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn list_tasks(&self) -> Vec<QueueId> {
        self.state.lock().await.outstanding.keys().cloned().collect()
    }
}
