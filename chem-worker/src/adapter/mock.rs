//! An in-memory, deterministic [`BackendAdapter`] used by the scenario
//! tests in `chem-orchestration` (§8 S1-S6) and the nanny's own unit tests.
//! Plays the role the original system's fireworks/dask test doubles
//! played: no real compute engine, results are handed in directly by the
//! test harness via [`MockAdapter::complete`] / [`MockAdapter::fail`].

use super::{BackendAdapter, Completion};
use async_trait::async_trait;
use chem_shared::error::AdapterError;
use chem_shared::model::{QueueEntry, QueueId, ResultPayload};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    outstanding: BTreeMap<QueueId, QueueEntry>,
    completed: BTreeMap<QueueId, Completion>,
}

/// A [`BackendAdapter`] with no external process behind it at all.
#[derive(Debug, Default)]
pub struct MockAdapter {
    state: Mutex<State>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend finishing `queue_id` successfully with
    /// `payload`. Panics if `queue_id` was never submitted or has already
    /// been completed — that would indicate a broken test, not a real
    /// adapter condition.
    pub async fn complete(&self, queue_id: &QueueId, payload: serde_json::Value) {
        self.finish(queue_id, ResultPayload::success(payload)).await;
    }

    /// Simulate the backend finishing `queue_id` with a task-execution
    /// failure (§7).
    pub async fn fail(&self, queue_id: &QueueId, error: impl Into<String>) {
        self.finish(queue_id, ResultPayload::failure(error)).await;
    }

    async fn finish(&self, queue_id: &QueueId, payload: ResultPayload) {
        let mut state = self.state.lock().await;
        let entry = state
            .outstanding
            .remove(queue_id)
            .unwrap_or_else(|| panic!("queue_id {queue_id} was not outstanding on MockAdapter"));
        state.completed.insert(
            queue_id.clone(),
            Completion {
                payload,
                parser: entry.parser,
                hooks: entry.hooks,
            },
        );
    }
}

#[async_trait]
impl BackendAdapter for MockAdapter {
    async fn submit_tasks(&self, tasks: Vec<QueueEntry>) -> Result<Vec<QueueId>, AdapterError> {
        let mut state = self.state.lock().await;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(task.queue_id.clone());
            state.outstanding.insert(task.queue_id.clone(), task);
        }
        Ok(ids)
    }

    async fn acquire_complete(&self) -> Result<BTreeMap<QueueId, Completion>, AdapterError> {
        let mut state = self.state.lock().await;
        Ok(std::mem::take(&mut state.completed))
    }

    async fn task_count(&self) -> usize {
        self.state.lock().await.outstanding.len()
    }

    async fn await_results(&self) -> Result<(), AdapterError> {
        // Nothing resolves tasks on its own — the test harness drives
        // completion via `complete`/`fail`. This loop only guards against a
        // misused test that forgot to do so, instead of hanging forever.
        for _ in 0..200 {
            if self.state.lock().await.outstanding.is_empty() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    async fn list_tasks(&self) -> Vec<QueueId> {
        self.state.lock().await.outstanding.keys().cloned().collect()
    }
}
