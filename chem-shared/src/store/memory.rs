//! An in-memory [`Store`] implementation.
//!
//! Exists purely as a test double: it backs the scenario tests in
//! `chem-orchestration` and lets the nanny and scheduler be exercised
//! without a real document database (§1 Out of scope).

use super::{BulkInsertOutcome, Projection, Query, Store};
use crate::error::StoreError;
use crate::hash::hash_value;
use crate::model::{
    HookAction, Locator, Molecule, MoleculeId, MoleculeRef, OptionSet, ProcedureId,
    ProcedureRecord, QueueEntry, QueueId, QueueStatus, ResultId, ResultRecord, ServiceId,
    ServiceRecord, TaskDescriptor,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    molecules: BTreeMap<MoleculeId, Molecule>,
    options: BTreeMap<(String, String), OptionSet>,
    results: BTreeMap<ResultId, ResultRecord>,
    procedures: BTreeMap<ProcedureId, ProcedureRecord>,
    queue: BTreeMap<QueueId, QueueEntry>,
    claimed: std::collections::BTreeSet<QueueId>,
    services: BTreeMap<ServiceId, ServiceRecord>,
    hooks_handled: Vec<HookAction>,
}

/// An in-memory, single-process [`Store`]. Identifiers are monotonically
/// increasing counters per table, namespaced so they read like the
/// fixtures used throughout the scenario tests (`mol-1`, `res-1`, ...).
#[derive(Debug)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    molecule_seq: AtomicU64,
    result_seq: AtomicU64,
    procedure_seq: AtomicU64,
    queue_seq: AtomicU64,
    service_seq: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            molecule_seq: AtomicU64::new(0),
            result_seq: AtomicU64::new(0),
            procedure_seq: AtomicU64::new(0),
            queue_seq: AtomicU64::new(0),
            service_seq: AtomicU64::new(0),
        }
    }

    /// Snapshot of every hook action this store has ever received via
    /// `handle_hooks`, in arrival order. Test-only introspection — no
    /// `Store` trait method exposes this since the concrete action
    /// semantics are opaque to the core (§4.7).
    pub async fn handled_hooks(&self) -> Vec<HookAction> {
        self.tables.lock().await.hooks_handled.clone()
    }

    /// Snapshot of one queue entry's current status, for test assertions.
    pub async fn queue_status(&self, queue_id: &QueueId) -> Option<QueueStatus> {
        self.tables.lock().await.queue.get(queue_id).map(|e| e.status)
    }

    /// Snapshot of one queue entry, for tests that need to inspect its
    /// spec (e.g. to fabricate a matching completion payload).
    pub async fn queue_entry(&self, queue_id: &QueueId) -> Option<QueueEntry> {
        self.tables.lock().await.queue.get(queue_id).cloned()
    }

    fn next_id(counter: &AtomicU64, prefix: &str) -> String {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn mixed_molecule_get(
        &self,
        refs: &BTreeMap<usize, MoleculeRef>,
    ) -> Result<BTreeMap<usize, Molecule>, StoreError> {
        let tables = self.tables.lock().await;
        let mut out = BTreeMap::new();
        for (idx, r) in refs {
            match r {
                MoleculeRef::Id(id) => {
                    let mol = tables
                        .molecules
                        .get(id)
                        .cloned()
                        .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                    out.insert(*idx, mol);
                }
                MoleculeRef::Inline(geometry) => {
                    let content_hash = hash_value(geometry);
                    let existing = tables
                        .molecules
                        .values()
                        .find(|m| m.content_hash == content_hash)
                        .cloned();
                    match existing {
                        Some(mol) => {
                            out.insert(*idx, mol);
                        }
                        None => {
                            return Err(StoreError::NotFound(
                                "inline molecule not yet added".to_string(),
                            ));
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    async fn add_molecules(
        &self,
        molecules: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, MoleculeId>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut out = BTreeMap::new();
        for (key, geometry) in molecules {
            let content_hash = hash_value(geometry);
            let existing = tables
                .molecules
                .values()
                .find(|m| m.content_hash == content_hash)
                .map(|m| m.id.clone());
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = Self::next_id(&self.molecule_seq, "mol");
                    tables.molecules.insert(
                        id.clone(),
                        Molecule {
                            id: id.clone(),
                            content_hash,
                            geometry: geometry.clone(),
                        },
                    );
                    id
                }
            };
            out.insert(key.clone(), id);
        }
        Ok(out)
    }

    async fn get_options(&self, keys: &[(String, String)]) -> Result<Vec<OptionSet>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| tables.options.get(k).cloned())
            .collect())
    }

    async fn get_results(
        &self,
        query: &Query,
        projection: &Projection,
    ) -> Result<Vec<ResultRecord>, StoreError> {
        let tables = self.tables.lock().await;
        let matches: Vec<ResultRecord> = tables
            .results
            .values()
            .filter(|r| matches_query(&serde_json::to_value(r).unwrap(), query))
            .cloned()
            .collect();
        project_results(matches, projection)
    }

    async fn add_results(
        &self,
        results: Vec<ResultRecord>,
    ) -> Result<BulkInsertOutcome<ResultId>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut outcome = BulkInsertOutcome::default();
        for mut record in results {
            let duplicate = tables
                .results
                .values()
                .find(|r| r.hash_index == record.hash_index)
                .cloned();
            if let Some(existing) = duplicate {
                outcome.errors.push(serde_json::json!({
                    "table": "results",
                    "hash_index": record.hash_index,
                    "existing_id": existing.id,
                }));
                continue;
            }
            let id = Self::next_id(&self.result_seq, "res");
            record.id = Some(id.clone());
            tables.results.insert(id.clone(), record.clone());
            outcome.inserted.push((id, record.hash_index));
        }
        Ok(outcome)
    }

    async fn get_procedures(
        &self,
        query: &Query,
        projection: &Projection,
    ) -> Result<Vec<ProcedureRecord>, StoreError> {
        let tables = self.tables.lock().await;
        let matches: Vec<ProcedureRecord> = tables
            .procedures
            .values()
            .filter(|p| matches_query(&serde_json::to_value(p).unwrap(), query))
            .cloned()
            .collect();
        project_procedures(matches, projection)
    }

    async fn add_procedures(
        &self,
        procedures: Vec<ProcedureRecord>,
    ) -> Result<BulkInsertOutcome<ProcedureId>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut outcome = BulkInsertOutcome::default();
        for mut record in procedures {
            let duplicate = tables
                .procedures
                .values()
                .find(|p| p.hash_index == record.hash_index)
                .cloned();
            if let Some(existing) = duplicate {
                outcome.errors.push(serde_json::json!({
                    "table": "procedures",
                    "hash_index": record.hash_index,
                    "existing_id": existing.id,
                }));
                continue;
            }
            let id = Self::next_id(&self.procedure_seq, "proc");
            record.id = Some(id.clone());
            tables.procedures.insert(id.clone(), record.clone());
            outcome.inserted.push((id, record.hash_index));
        }
        Ok(outcome)
    }

    async fn queue_submit(&self, tasks: Vec<TaskDescriptor>) -> Result<Vec<QueueId>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Some(existing) = tables
                .queue
                .values()
                .find(|q| q.hash_index == task.hash_index)
            {
                ids.push(existing.queue_id.clone());
                continue;
            }
            let queue_id = Self::next_id(&self.queue_seq, "q");
            tables.queue.insert(
                queue_id.clone(),
                QueueEntry {
                    queue_id: queue_id.clone(),
                    hash_index: task.hash_index,
                    hash_keys: task.hash_keys,
                    spec: task.spec,
                    parser: task.parser,
                    tag: task.tag,
                    hooks: task.hooks,
                    status: QueueStatus::Pending,
                },
            );
            ids.push(queue_id);
        }
        Ok(ids)
    }

    async fn queue_get_next(&self, n: usize) -> Result<Vec<QueueEntry>, StoreError> {
        let mut tables = self.tables.lock().await;
        let candidates: Vec<QueueId> = tables
            .queue
            .values()
            .filter(|q| q.status == QueueStatus::Pending && !tables.claimed.contains(&q.queue_id))
            .take(n)
            .map(|q| q.queue_id.clone())
            .collect();
        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates {
            tables.claimed.insert(id.clone());
            out.push(tables.queue.get(&id).cloned().expect("just checked"));
        }
        Ok(out)
    }

    async fn queue_mark_complete(
        &self,
        queue_id: &QueueId,
        locator: Locator,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let entry = tables
            .queue
            .get_mut(queue_id)
            .ok_or_else(|| StoreError::NotFound(queue_id.clone()))?;
        if !entry.status.can_transition_to(QueueStatus::Complete) {
            return Err(StoreError::Backend(format!(
                "queue entry {queue_id} is not pending"
            )));
        }
        entry.status = QueueStatus::Complete;
        let _ = locator;
        Ok(())
    }

    async fn queue_mark_error(&self, queue_id: &QueueId, reason: String) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let entry = tables
            .queue
            .get_mut(queue_id)
            .ok_or_else(|| StoreError::NotFound(queue_id.clone()))?;
        if !entry.status.can_transition_to(QueueStatus::Error) {
            return Err(StoreError::Backend(format!(
                "queue entry {queue_id} is not pending"
            )));
        }
        entry.status = QueueStatus::Error;
        let _ = reason;
        Ok(())
    }

    async fn add_services(
        &self,
        services: Vec<ServiceRecord>,
    ) -> Result<Vec<ServiceId>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut ids = Vec::with_capacity(services.len());
        for mut record in services {
            let id = Self::next_id(&self.service_seq, "svc");
            record.id = Some(id.clone());
            tables.services.insert(id.clone(), record);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_services(
        &self,
        ids: &[ServiceId],
    ) -> Result<Vec<(ServiceId, ServiceRecord)>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.services.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    async fn update_services(&self, updates: Vec<(ServiceId, Value)>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        for (id, state) in updates {
            let record = tables
                .services
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            record.state = state;
        }
        Ok(())
    }

    async fn remove_service(&self, id: &ServiceId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.services.remove(id);
        Ok(())
    }

    async fn handle_hooks(&self, actions: Vec<HookAction>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.hooks_handled.extend(actions);
        Ok(())
    }
}

/// `true` iff every field named in `query` matches the corresponding field
/// of `record` (scalar equality, or membership when the query field is an
/// array).
fn matches_query(record: &Value, query: &Query) -> bool {
    let Some(filters) = query.as_object() else {
        return true;
    };
    filters.iter().all(|(field, expected)| {
        let actual = record.get(field).unwrap_or(&Value::Null);
        match expected {
            Value::Array(candidates) => candidates.contains(actual),
            other => other == actual,
        }
    })
}

const RESULT_FIELDS: &[&str] = &[
    "id", "molecule_id", "method", "basis", "options", "program", "driver", "payload",
    "hash_index",
];

const PROCEDURE_FIELDS: &[&str] = &[
    "id",
    "kind",
    "program",
    "keywords",
    "initial_molecule",
    "final_molecule",
    "trajectory",
    "hash_index",
];

/// Rejects a projection naming a field the row doesn't have — the one
/// check an in-memory test double can meaningfully make on behalf of a
/// real document store, which would otherwise silently return an empty
/// field for a caller's typo.
fn check_projection_fields(projection: &Projection, known: &[&str]) -> Result<(), StoreError> {
    for field in projection {
        if !known.contains(&field.as_str()) {
            return Err(StoreError::Backend(format!(
                "unknown projection field `{field}`"
            )));
        }
    }
    Ok(())
}

/// `ResultRecord`/`ProcedureRecord` are fixed-shape typed rows, not
/// documents — there is no subset of a `ResultRecord` with `program`
/// omitted, so this in-memory store always returns full rows regardless
/// of `projection` (a real document-oriented backend, the actual target
/// of this trait per §6.1, narrows the wire payload instead). Callers
/// that pass a projection are expected to only read the named fields
/// (see `single.rs`'s dedup query, which projects to `molecule_id` and
/// reads nothing else); this function validates that expectation's field
/// names are real rather than silently accepting a typo.
fn project_results(
    records: Vec<ResultRecord>,
    projection: &Projection,
) -> Result<Vec<ResultRecord>, StoreError> {
    check_projection_fields(projection, RESULT_FIELDS)?;
    Ok(records)
}

fn project_procedures(
    records: Vec<ProcedureRecord>,
    projection: &Projection,
) -> Result<Vec<ProcedureRecord>, StoreError> {
    check_projection_fields(projection, PROCEDURE_FIELDS)?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskSpec;
    use serde_json::json;

    fn descriptor(hash_index: &str) -> TaskDescriptor {
        TaskDescriptor {
            hash_index: hash_index.to_string(),
            hash_keys: json!({}),
            spec: TaskSpec::ComputeSingle {
                run: json!({}),
                program: "psi4".to_string(),
            },
            parser: "single".to_string(),
            tag: None,
            hooks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn add_molecules_dedupes_by_content_hash() {
        let store = InMemoryStore::new();
        let mut batch = BTreeMap::new();
        batch.insert("a".to_string(), json!({"symbols": ["H", "H"]}));
        batch.insert("b".to_string(), json!({"symbols": ["H", "H"]}));
        let ids = store.add_molecules(&batch).await.unwrap();
        assert_eq!(ids["a"], ids["b"]);
    }

    #[tokio::test]
    async fn queue_submit_dedupes_by_hash_index() {
        let store = InMemoryStore::new();
        let ids = store
            .queue_submit(vec![descriptor("h1"), descriptor("h1")])
            .await
            .unwrap();
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn queue_get_next_does_not_hand_out_the_same_entry_twice() {
        let store = InMemoryStore::new();
        store
            .queue_submit(vec![descriptor("h1"), descriptor("h2")])
            .await
            .unwrap();
        let first = store.queue_get_next(10).await.unwrap();
        assert_eq!(first.len(), 2);
        let second = store.queue_get_next(10).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn queue_mark_complete_then_error_is_rejected() {
        let store = InMemoryStore::new();
        let ids = store.queue_submit(vec![descriptor("h1")]).await.unwrap();
        store
            .queue_mark_complete(&ids[0], Locator::results("res-1"))
            .await
            .unwrap();
        let err = store
            .queue_mark_error(&ids[0], "late failure".to_string())
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn add_results_reports_duplicate_hash_index_as_error_not_panic() {
        let store = InMemoryStore::new();
        let record = ResultRecord {
            id: None,
            molecule_id: "mol-1".to_string(),
            method: "HF".to_string(),
            basis: "sto-3g".to_string(),
            options: "default".to_string(),
            program: "psi4".to_string(),
            driver: "energy".to_string(),
            payload: json!({}),
            hash_index: "dup".to_string(),
        };
        let first = store.add_results(vec![record.clone()]).await.unwrap();
        assert_eq!(first.inserted.len(), 1);
        let second = store.add_results(vec![record]).await.unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(second.errors.len(), 1);
    }

    #[tokio::test]
    async fn service_lifecycle_add_update_remove() {
        let store = InMemoryStore::new();
        let ids = store
            .add_services(vec![ServiceRecord {
                id: None,
                kind: "torsion_drive".to_string(),
                state: json!({"step": 0}),
                hooks: Vec::new(),
            }])
            .await
            .unwrap();
        store
            .update_services(vec![(ids[0].clone(), json!({"step": 1}))])
            .await
            .unwrap();
        let fetched = store.get_services(&ids).await.unwrap();
        assert_eq!(fetched[0].1.state, json!({"step": 1}));
        store.remove_service(&ids[0]).await.unwrap();
        let gone = store.get_services(&ids).await.unwrap();
        assert!(gone.is_empty());
    }

    #[tokio::test]
    async fn get_results_with_known_projection_field_returns_full_rows() {
        let store = InMemoryStore::new();
        let record = ResultRecord {
            id: None,
            molecule_id: "mol-1".to_string(),
            method: "HF".to_string(),
            basis: "sto-3g".to_string(),
            options: "default".to_string(),
            program: "psi4".to_string(),
            driver: "energy".to_string(),
            payload: json!({}),
            hash_index: "h1".to_string(),
        };
        store.add_results(vec![record]).await.unwrap();

        let projected = store
            .get_results(&json!({}), &vec!["molecule_id".to_string()])
            .await
            .unwrap();
        assert_eq!(projected.len(), 1);
        // No narrower row type exists for `ResultRecord`; every field is
        // still populated even though the caller only asked for one.
        assert_eq!(projected[0].molecule_id, "mol-1");
        assert_eq!(projected[0].program, "psi4");
    }

    #[tokio::test]
    async fn get_results_with_unknown_projection_field_is_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .get_results(&json!({}), &vec!["not_a_real_field".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn get_procedures_with_unknown_projection_field_is_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .get_procedures(&json!({}), &vec!["not_a_real_field".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
