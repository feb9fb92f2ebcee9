//! # Queue Nanny (§4.5)
//!
//! The single owner of the harvest/refill loop and the service-iteration
//! loop. Per §5, `update()` and `update_services()` are not re-entrant —
//! both serialize through the nanny's own state mutex, so concurrent
//! `submit_tasks`/`submit_services` calls from multiple HTTP handlers don't
//! need external locking (the "Open Question" on concurrency in §9 is
//! resolved this way; see `DESIGN.md`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use chem_shared::config::NannyConfig;
use chem_shared::error::OrchestrationError;
use chem_shared::model::{HookAction, QueueId, ServiceId, ServiceRecord, TaskDescriptor};
use chem_shared::resilience::{CircuitBreaker, CircuitBreakerBehavior, CircuitBreakerConfig};
use chem_shared::store::Store;
use chem_worker::{BackendAdapter, Completion};

use crate::orchestration::registry::{ProcedureRegistry, ServiceRegistry};

/// The nanny's own mutable bookkeeping (§5 "Shared resources"): the
/// active-service set and the append-only per-queue-id/service-id error
/// map. Owned solely by the nanny.
#[derive(Debug, Default)]
struct NannyState {
    active_services: BTreeSet<ServiceId>,
    errors: BTreeMap<String, String>,
}

/// The driver loop described in §4.5.
pub struct QueueNanny {
    store: Arc<dyn Store>,
    adapter: Arc<dyn BackendAdapter>,
    procedures: Arc<ProcedureRegistry>,
    services: Arc<ServiceRegistry>,
    config: NannyConfig,
    breaker: CircuitBreaker,
    state: Mutex<NannyState>,
}

impl QueueNanny {
    pub fn new(
        store: Arc<dyn Store>,
        adapter: Arc<dyn BackendAdapter>,
        procedures: Arc<ProcedureRegistry>,
        services: Arc<ServiceRegistry>,
        config: NannyConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            procedures,
            services,
            config,
            breaker: CircuitBreaker::new("backend-adapter", CircuitBreakerConfig::default()),
            state: Mutex::new(NannyState::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn procedures(&self) -> &Arc<ProcedureRegistry> {
        &self.procedures
    }

    /// Snapshot of queue_id/service_id -> failure reason accumulated so far.
    pub async fn errors_snapshot(&self) -> BTreeMap<String, String> {
        self.state.lock().await.errors.clone()
    }

    pub async fn active_service_count(&self) -> usize {
        self.state.lock().await.active_services.len()
    }

    /// §4.5 `submit_tasks`.
    pub async fn submit_tasks(
        &self,
        tasks: Vec<TaskDescriptor>,
    ) -> Result<Vec<QueueId>, OrchestrationError> {
        let submitted_ids = self.store.queue_submit(tasks).await?;
        self.update().await?;
        Ok(submitted_ids)
    }

    /// §4.5 `submit_services`.
    pub async fn submit_services(
        &self,
        services: Vec<ServiceRecord>,
    ) -> Result<Vec<ServiceId>, OrchestrationError> {
        let ids = self.store.add_services(services).await?;
        {
            let mut state = self.state.lock().await;
            state.active_services.extend(ids.iter().cloned());
        }
        self.update_services().await?;
        Ok(ids)
    }

    /// §4.5 `update` — the core harvest/refill step.
    pub async fn update(&self) -> Result<(), OrchestrationError> {
        if !self.breaker.should_allow_async().await {
            warn!(breaker = self.breaker.name(), "circuit open, skipping update() cycle");
            return Ok(());
        }

        let started = Instant::now();
        let harvested = match self.adapter.acquire_complete().await {
            Ok(harvested) => {
                self.breaker.record_success(started.elapsed());
                harvested
            }
            Err(e) => {
                self.breaker.record_failure(started.elapsed());
                return Err(e.into());
            }
        };

        // Step 2-3: group by parser, peel off unsuccessful completions into
        // the errors map without handing them to an output parser.
        let mut grouped: BTreeMap<String, BTreeMap<QueueId, Completion>> = BTreeMap::new();
        for (queue_id, completion) in harvested {
            if !completion.payload.success {
                let reason = completion
                    .payload
                    .error
                    .clone()
                    .unwrap_or_else(|| "task execution failed with no error detail".to_string());
                error!(queue_id = %queue_id, reason = %reason, "task execution failed");
                {
                    let mut state = self.state.lock().await;
                    state.errors.insert(queue_id.clone(), reason.clone());
                }
                if let Err(e) = self.store.queue_mark_error(&queue_id, reason).await {
                    error!(queue_id = %queue_id, error = %e, "failed to record queue error");
                }
                continue;
            }
            grouped
                .entry(completion.parser.clone())
                .or_default()
                .insert(queue_id, completion);
        }

        // Step 4-5: dispatch each parser group, accumulate hooks, fire them.
        let mut hook_actions: Vec<HookAction> = Vec::new();
        for (parser_name, completions) in grouped {
            let queue_ids: Vec<QueueId> = completions.keys().cloned().collect();
            let parser = match self.procedures.get_output_parser(&parser_name) {
                Ok(parser) => parser,
                Err(e) => {
                    error!(parser = %parser_name, error = %e, "no output parser registered");
                    self.record_batch_error(&queue_ids, &e.to_string()).await;
                    continue;
                }
            };

            match parser.absorb_output(self.store.as_ref(), completions).await {
                Ok(outcome) => {
                    for (queue_id, locator) in outcome.completed {
                        if let Err(e) = self.store.queue_mark_complete(&queue_id, locator).await {
                            error!(queue_id = %queue_id, error = %e, "failed to mark queue entry complete");
                            self.record_batch_error(&[queue_id], &e.to_string()).await;
                        }
                    }
                    for (queue_id, reason) in outcome.errors {
                        error!(queue_id = %queue_id, reason = %reason, "output absorption failed for row");
                        self.record_batch_error(&[queue_id.clone()], &reason).await;
                        if let Err(e) = self.store.queue_mark_error(&queue_id, reason).await {
                            error!(queue_id = %queue_id, error = %e, "failed to record queue error");
                        }
                    }
                    hook_actions.extend(outcome.hook_actions);
                }
                Err(e) => {
                    // §7: the nanny catches any exception raised during
                    // completion processing and continues with the next
                    // batch rather than aborting the whole update() call.
                    error!(parser = %parser_name, error = %e, "output parser failed for batch");
                    self.record_batch_error(&queue_ids, &e.to_string()).await;
                }
            }
        }

        if !hook_actions.is_empty() {
            self.store.handle_hooks(hook_actions).await?;
        }

        // Step 6-8: refill up to the concurrency cap.
        let outstanding = self.adapter.task_count().await;
        let open_slots = self.config.max_tasks.saturating_sub(outstanding);
        if open_slots == 0 {
            return Ok(());
        }
        let next_batch = self.store.queue_get_next(open_slots).await?;
        if next_batch.is_empty() {
            return Ok(());
        }
        debug!(count = next_batch.len(), "submitting next batch to adapter");
        let started = Instant::now();
        match self.adapter.submit_tasks(next_batch).await {
            Ok(_) => self.breaker.record_success(started.elapsed()),
            Err(e) => {
                self.breaker.record_failure(started.elapsed());
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn record_batch_error(&self, queue_ids: &[QueueId], reason: &str) {
        let mut state = self.state.lock().await;
        for queue_id in queue_ids {
            state.errors.insert(queue_id.clone(), reason.to_string());
        }
    }

    /// §4.5 `update_services`.
    pub async fn update_services(&self) -> Result<(), OrchestrationError> {
        let ids: Vec<ServiceId> = {
            let state = self.state.lock().await;
            state.active_services.iter().cloned().collect()
        };
        if ids.is_empty() {
            return Ok(());
        }

        let records = self.store.get_services(&ids).await?;
        let mut finished_ids = Vec::new();
        let mut missing_ids: BTreeSet<ServiceId> = ids.iter().cloned().collect();

        for (id, record) in records {
            missing_ids.remove(&id);
            let kind = match self.services.get(&record.kind) {
                Ok(kind) => kind,
                Err(e) => {
                    error!(service_id = %id, kind = %record.kind, error = %e, "unknown service kind");
                    self.record_batch_error(&[format!("service:{id}")], &e.to_string())
                        .await;
                    continue;
                }
            };
            let mut machine = match kind.build(record.state.clone()) {
                Ok(machine) => machine,
                Err(e) => {
                    error!(service_id = %id, error = %e, "failed to reconstruct service machine");
                    self.record_batch_error(&[format!("service:{id}")], &e.to_string())
                        .await;
                    continue;
                }
            };

            match machine.iterate(self.store.as_ref(), self).await {
                Ok(finished) => {
                    if let Err(e) = self
                        .store
                        .update_services(vec![(id.clone(), machine.get_json())])
                        .await
                    {
                        error!(service_id = %id, error = %e, "failed to persist service state");
                    }
                    if finished {
                        if let Err(e) = self.store.remove_service(&id).await {
                            error!(service_id = %id, error = %e, "failed to remove finished service");
                        }
                        info!(service_id = %id, kind = %record.kind, "service finished");
                        finished_ids.push(id);
                    }
                }
                Err(e) => {
                    error!(service_id = %id, error = %e, "service iteration failed");
                    self.record_batch_error(&[format!("service:{id}")], &e.to_string())
                        .await;
                }
            }
        }

        let mut state = self.state.lock().await;
        for id in finished_ids {
            state.active_services.remove(&id);
        }
        for id in missing_ids {
            // The record vanished from the store without going through this
            // nanny (e.g. removed out of band) — stop tracking it either way.
            state.active_services.remove(&id);
        }
        Ok(())
    }

    /// §4.5 `await_results` — block until the adapter drains, then harvest
    /// once (test/synchronous use only, §5).
    pub async fn await_results(&self) -> Result<(), OrchestrationError> {
        self.adapter.await_results().await?;
        self.update().await
    }

    /// §4.5 `await_services` — loop at most `max_iter` times (falling back
    /// to the configured default), terminating early once the
    /// active-service set is empty.
    pub async fn await_services(&self, max_iter: Option<usize>) -> Result<(), OrchestrationError> {
        let max_iter = max_iter.unwrap_or(self.config.max_service_await_iterations);
        for _ in 0..max_iter {
            if self.active_service_count().await == 0 {
                break;
            }
            self.update_services().await?;
            self.await_results().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chem_shared::model::{HookSpec, MoleculeRef, QueueStatus, TaskSpec};
    use chem_shared::store::memory::InMemoryStore;
    use chem_worker::MockAdapter;
    use serde_json::{json, Value};

    fn make_nanny() -> (Arc<QueueNanny>, Arc<InMemoryStore>, Arc<MockAdapter>) {
        let store = Arc::new(InMemoryStore::default());
        let adapter = Arc::new(MockAdapter::default());
        let procedures = Arc::new(crate::orchestration::procedures::builtin_registry());
        let services = Arc::new(crate::orchestration::services::builtin_registry());
        let nanny = Arc::new(QueueNanny::new(
            store.clone() as Arc<dyn Store>,
            adapter.clone() as Arc<dyn BackendAdapter>,
            procedures,
            services,
            NannyConfig::default(),
        ));
        (nanny, store, adapter)
    }

    async fn submit_single(
        nanny: &QueueNanny,
        molecule_id: &str,
        method: &str,
    ) -> QueueId {
        let query = json!({
            "driver": "energy", "method": method, "basis": "sto-3g",
            "options": "default", "program": "psi4", "molecule_id": molecule_id,
        });
        let (hash_keys, hash_index) = chem_shared::hash::single_run_hash(&query);
        let task = TaskDescriptor {
            hash_index,
            hash_keys,
            spec: TaskSpec::ComputeSingle {
                run: json!({"molecule_id": molecule_id}),
                program: "psi4".to_string(),
            },
            parser: "single".to_string(),
            tag: None,
            hooks: Vec::new(),
        };
        nanny.submit_tasks(vec![task]).await.unwrap().remove(0)
    }

    /// §8 S1: a fresh single-point submission is harvested into a results
    /// row once the adapter reports success, and the queue entry locates it.
    #[tokio::test]
    async fn s1_single_fresh_harvest_lands_result_and_completes_queue_entry() {
        let (nanny, store, adapter) = make_nanny();
        let scheduler = crate::orchestration::scheduler::QueueScheduler::new(nanny.clone());
        let molecule_id = store
            .add_molecules(&BTreeMap::from([("m".to_string(), json!({"symbols": ["H", "H"]}))]))
            .await
            .unwrap()["m"]
            .clone();

        let meta = json!({
            "driver": "energy", "method": "hf", "basis": "sto-3g",
            "options": "default", "program": "psi4", "procedure": "single",
        });
        let response = scheduler
            .submit("single", meta, json!([molecule_id]))
            .await
            .unwrap();
        assert_eq!(response.meta.n_inserted, 1);
        assert!(response.meta.duplicates.is_empty());

        let queue_id = response.data.as_array().unwrap()[0].as_str().unwrap().to_string();
        adapter
            .complete(
                &queue_id,
                json!({
                    "molecule_id": molecule_id, "driver": "energy", "method": "hf",
                    "basis": "sto-3g", "options": "default", "program": "psi4",
                    "result": {"energy": -1.0},
                }),
            )
            .await;
        nanny.update().await.unwrap();

        assert_eq!(store.queue_status(&queue_id).await, Some(QueueStatus::Complete));
        let results = store
            .get_results(&json!({"molecule_id": molecule_id}), &vec![])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    /// §8 S2: resubmitting the identical run yields no fresh tasks and
    /// reports the molecule id as a duplicate.
    #[tokio::test]
    async fn s2_single_duplicate_yields_no_new_tasks() {
        let (nanny, store, adapter) = make_nanny();
        let scheduler = crate::orchestration::scheduler::QueueScheduler::new(nanny.clone());
        let molecule_id = store
            .add_molecules(&BTreeMap::from([("m".to_string(), json!({"symbols": ["H", "H"]}))]))
            .await
            .unwrap()["m"]
            .clone();
        let meta = json!({
            "driver": "energy", "method": "hf", "basis": "sto-3g",
            "options": "default", "program": "psi4", "procedure": "single",
        });

        let first = scheduler
            .submit("single", meta.clone(), json!([molecule_id]))
            .await
            .unwrap();
        let queue_id = first.data.as_array().unwrap()[0].as_str().unwrap().to_string();
        adapter
            .complete(
                &queue_id,
                json!({
                    "molecule_id": molecule_id, "driver": "energy", "method": "hf",
                    "basis": "sto-3g", "options": "default", "program": "psi4",
                    "result": {"energy": -1.0},
                }),
            )
            .await;
        nanny.update().await.unwrap();

        let second = scheduler
            .submit("single", meta, json!([molecule_id.clone()]))
            .await
            .unwrap();
        assert_eq!(second.meta.n_inserted, 0);
        assert_eq!(second.meta.duplicates, vec![Value::String(molecule_id)]);
    }

    /// §8 S4: a reported task-execution failure lands in the nanny's errors
    /// map, writes no result, and does not abort the rest of `update()`.
    #[tokio::test]
    async fn s4_task_failure_is_recorded_and_writes_no_result() {
        let (nanny, store, adapter) = make_nanny();
        let molecule_id = store
            .add_molecules(&BTreeMap::from([("m".to_string(), json!({"symbols": ["H"]}))]))
            .await
            .unwrap()["m"]
            .clone();
        let queue_id = submit_single(&nanny, &molecule_id, "hf").await;

        adapter.fail(&queue_id, "boom").await;
        nanny.update().await.unwrap();

        let errors = nanny.errors_snapshot().await;
        assert_eq!(errors.get(&queue_id).map(String::as_str), Some("boom"));
        assert_eq!(store.queue_status(&queue_id).await, Some(QueueStatus::Error));
        let results = store.get_results(&json!({}), &vec![]).await.unwrap();
        assert!(results.is_empty());
    }

    /// §8 S5: a two-step service submits one task, is ticked, the task
    /// completes, the next tick submits the second task, then finishes —
    /// the active-service set empties and the record is gone from the store.
    #[tokio::test]
    async fn s5_two_step_service_runs_to_completion() {
        let (nanny, store, adapter) = make_nanny();
        let services = Arc::new(crate::orchestration::services::builtin_registry());
        let scheduler =
            crate::orchestration::scheduler::ServiceScheduler::new(nanny.clone(), services);

        let molecule_id = store
            .add_molecules(&BTreeMap::from([("m".to_string(), json!({"symbols": ["O"]}))]))
            .await
            .unwrap()["m"]
            .clone();
        let meta = json!({
            "kind": "two_step",
            "driver": "energy", "basis": "sto-3g", "options": "default", "program": "psi4",
        });
        let response = scheduler
            .submit(meta, vec![MoleculeRef::Id(molecule_id)])
            .await
            .unwrap();
        assert_eq!(response.meta.n_inserted, 1);
        assert_eq!(nanny.active_service_count().await, 1);

        // Drive the shared MockAdapter directly, completing whichever task
        // is outstanding each tick with a payload that echoes the task's
        // own identifying fields (so the service's own `get_results` lookup
        // for that step matches), then let the nanny harvest and re-tick.
        for _ in 0..10 {
            if nanny.active_service_count().await == 0 {
                break;
            }
            for queue_id in adapter.list_tasks().await {
                let entry = store.queue_entry(&queue_id).await.unwrap();
                let TaskSpec::ComputeSingle { run, program } = entry.spec else {
                    panic!("two_step only emits ComputeSingle tasks");
                };
                // The real compute engine echoes back every identifying
                // field alongside the payload; `run` already carries all of
                // them except `program`, which lives alongside `run` in the
                // task spec rather than inside it.
                let mut payload = run.clone();
                payload["program"] = json!(program);
                payload["result"] = json!({"energy": -1.0});
                adapter.complete(&queue_id, payload).await;
            }
            nanny.update().await.unwrap();
            nanny.update_services().await.unwrap();
        }

        assert_eq!(nanny.active_service_count().await, 0);
        let service_ids: Vec<ServiceId> =
            response.data.as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
        let remaining = store.get_services(&service_ids).await.unwrap();
        assert!(remaining.is_empty());
    }

    /// §8 invariant 4: no hook action reaches `store.handle_hooks` before
    /// the corresponding record locator is known — verified by checking the
    /// hook is absent before harvest and present, bound to the right
    /// locator, only after `update()` processes the completion.
    #[tokio::test]
    async fn hook_fires_only_after_result_locator_is_known() {
        let (nanny, store, adapter) = make_nanny();
        let molecule_id = store
            .add_molecules(&BTreeMap::from([("m".to_string(), json!({"symbols": ["H"]}))]))
            .await
            .unwrap()["m"]
            .clone();

        let query = json!({
            "driver": "energy", "method": "hf", "basis": "sto-3g",
            "options": "default", "program": "psi4", "molecule_id": molecule_id,
        });
        let (hash_keys, hash_index) = chem_shared::hash::single_run_hash(&query);
        let task = TaskDescriptor {
            hash_index,
            hash_keys,
            spec: TaskSpec::ComputeSingle {
                run: json!({"molecule_id": molecule_id}),
                program: "psi4".to_string(),
            },
            parser: "single".to_string(),
            tag: None,
            hooks: vec![HookSpec { action: json!({"notify": "done"}) }],
        };
        let queue_id = nanny.submit_tasks(vec![task]).await.unwrap().remove(0);

        assert!(store.handled_hooks().await.is_empty());

        adapter
            .complete(
                &queue_id,
                json!({
                    "molecule_id": molecule_id, "driver": "energy", "method": "hf",
                    "basis": "sto-3g", "options": "default", "program": "psi4",
                    "result": {"energy": -1.0},
                }),
            )
            .await;
        nanny.update().await.unwrap();

        let handled = store.handled_hooks().await;
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].hook.action, json!({"notify": "done"}));
        assert!(matches!(
            handled[0].locator.table,
            chem_shared::model::TableName::Results
        ));
    }
}
