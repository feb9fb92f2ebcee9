//! The distributed-worker backend adapter (§6.3): futures-style — submit
//! returns once a future is scheduled, `acquire_complete` harvests whatever
//! futures have resolved without blocking. Grounded on the teacher's
//! `FallbackPollerConfig`/event-driven-plus-poll-reconciliation pattern
//! (`tasker-worker`'s event-driven processor): completion is primarily
//! driven by task-join readiness, with a bounded poll fallback in
//! `await_results` rather than a bare spin.

use super::{BackendAdapter, Completion};
use async_trait::async_trait;
use chem_shared::error::AdapterError;
use chem_shared::model::{HookSpec, QueueEntry, QueueId, ResultPayload, TaskSpec};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// The external compute engine a distributed-worker adapter dispatches
/// into (§1 "the compute engine that actually executes a task"). Out of
/// scope for the orchestration core itself — this trait is the seam a
/// production deployment wires a real engine behind.
#[async_trait]
pub trait ComputeEngine: Send + Sync + fmt::Debug {
    async fn execute(&self, spec: &TaskSpec) -> ResultPayload;
}

/// Placeholder engine used when no production engine has been wired in;
/// reports every task as a task-execution failure (§7) rather than
/// panicking, so a misconfigured deployment fails loudly but survives.
#[derive(Debug, Default)]
struct UnconfiguredEngine;

#[async_trait]
impl ComputeEngine for UnconfiguredEngine {
    async fn execute(&self, _spec: &TaskSpec) -> ResultPayload {
        ResultPayload::failure("no compute engine configured for DistributedWorkerAdapter")
    }
}

struct InFlight {
    parser: String,
    hooks: Vec<HookSpec>,
    handle: JoinHandle<ResultPayload>,
}

/// Futures-backed adapter for a distributed-worker style backend (the
/// Dask/Parsl family in the original system).
pub struct DistributedWorkerAdapter {
    engine: Arc<dyn ComputeEngine>,
    outstanding: Mutex<BTreeMap<QueueId, InFlight>>,
    completed: Mutex<BTreeMap<QueueId, Completion>>,
}

impl fmt::Debug for DistributedWorkerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedWorkerAdapter").finish_non_exhaustive()
    }
}

impl Default for DistributedWorkerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributedWorkerAdapter {
    pub fn new() -> Self {
        Self::with_engine(Arc::new(UnconfiguredEngine))
    }

    pub fn with_engine(engine: Arc<dyn ComputeEngine>) -> Self {
        Self {
            engine,
            outstanding: Mutex::new(BTreeMap::new()),
            completed: Mutex::new(BTreeMap::new()),
        }
    }

    /// Move any finished handles from `outstanding` into `completed`
    /// without blocking on anything still running.
    async fn drain_ready(&self) {
        let mut outstanding = self.outstanding.lock().await;
        let ready: Vec<QueueId> = outstanding
            .iter()
            .filter(|(_, task)| task.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        let mut completed = self.completed.lock().await;
        for id in ready {
            let task = outstanding.remove(&id).expect("just filtered");
            let payload = match task.handle.await {
                Ok(payload) => payload,
                Err(join_err) => ResultPayload::failure(format!("task panicked: {join_err}")),
            };
            completed.insert(
                id,
                Completion {
                    payload,
                    parser: task.parser,
                    hooks: task.hooks,
                },
            );
        }
    }
}

#[async_trait]
impl BackendAdapter for DistributedWorkerAdapter {
    async fn submit_tasks(&self, tasks: Vec<QueueEntry>) -> Result<Vec<QueueId>, AdapterError> {
        let mut outstanding = self.outstanding.lock().await;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            let engine = self.engine.clone();
            let spec = task.spec.clone();
            let handle = tokio::spawn(async move { engine.execute(&spec).await });
            ids.push(task.queue_id.clone());
            outstanding.insert(
                task.queue_id,
                InFlight {
                    parser: task.parser,
                    hooks: task.hooks,
                    handle,
                },
            );
        }
        Ok(ids)
    }

    async fn acquire_complete(&self) -> Result<BTreeMap<QueueId, Completion>, AdapterError> {
        self.drain_ready().await;
        let mut completed = self.completed.lock().await;
        Ok(std::mem::take(&mut completed))
    }

    async fn task_count(&self) -> usize {
        self.outstanding.lock().await.len()
    }

    async fn await_results(&self) -> Result<(), AdapterError> {
        loop {
            self.drain_ready().await;
            if self.outstanding.lock().await.is_empty() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn list_tasks(&self) -> Vec<QueueId> {
        self.outstanding.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct EchoEngine;

    #[async_trait]
    impl ComputeEngine for EchoEngine {
        async fn execute(&self, spec: &TaskSpec) -> ResultPayload {
            ResultPayload::success(json!({ "program": spec.program() }))
        }
    }

    fn entry(queue_id: &str) -> QueueEntry {
        QueueEntry {
            queue_id: queue_id.to_string(),
            hash_index: "h".to_string(),
            hash_keys: json!({}),
            spec: TaskSpec::ComputeSingle {
                run: json!({}),
                program: "psi4".to_string(),
            },
            parser: "single".to_string(),
            tag: None,
            hooks: Vec::new(),
            status: chem_shared::model::QueueStatus::Pending,
        }
    }

    #[tokio::test]
    async fn await_results_drains_every_submitted_task() {
        let adapter = DistributedWorkerAdapter::with_engine(Arc::new(EchoEngine));
        adapter
            .submit_tasks(vec![entry("q1"), entry("q2")])
            .await
            .unwrap();
        adapter.await_results().await.unwrap();
        assert_eq!(adapter.task_count().await, 0);

        let completed = adapter.acquire_complete().await.unwrap();
        assert_eq!(completed.len(), 2);
        assert!(completed.values().all(|c| c.payload.success));
    }

    #[tokio::test]
    async fn unconfigured_engine_reports_task_execution_failure() {
        let adapter = DistributedWorkerAdapter::new();
        adapter.submit_tasks(vec![entry("q1")]).await.unwrap();
        adapter.await_results().await.unwrap();
        let completed = adapter.acquire_complete().await.unwrap();
        assert!(!completed["q1"].payload.success);
    }
}
