//! "single" — one atomic computation per input molecule (§4.2.a).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use chem_shared::error::OrchestrationError;
use chem_shared::hash::single_run_hash;
use chem_shared::model::{HookAction, Locator, MoleculeRef, QueueId, ResultRecord, TaskDescriptor, TaskSpec};
use chem_shared::store::Store;
use chem_worker::Completion;

use crate::orchestration::registry::{InputParseOutcome, InputParser, OutputAbsorbOutcome, OutputParser};

#[derive(Debug, Deserialize)]
struct SingleMeta {
    driver: String,
    method: String,
    basis: String,
    options: String,
    program: String,
}

fn parse_data_refs(data: &Value) -> Result<Vec<MoleculeRef>, OrchestrationError> {
    let items = data
        .as_array()
        .ok_or_else(|| OrchestrationError::Internal("single procedure data must be an array".to_string()))?;
    items
        .iter()
        .map(|v| serde_json::from_value(v.clone()).map_err(OrchestrationError::from))
        .collect()
}

pub struct SingleInputParser;

#[async_trait]
impl InputParser for SingleInputParser {
    async fn parse_input(
        &self,
        store: &dyn Store,
        meta: Value,
        data: Value,
    ) -> Result<InputParseOutcome, OrchestrationError> {
        let meta: SingleMeta = serde_json::from_value(meta)?;
        let refs = parse_data_refs(&data)?;

        let mut resolved: BTreeMap<usize, chem_shared::model::Molecule> = BTreeMap::new();
        let mut errors = Vec::new();
        for (idx, reference) in refs.iter().enumerate() {
            let mut single = BTreeMap::new();
            single.insert(idx, reference.clone());
            match store.mixed_molecule_get(&single).await {
                Ok(mut resolved_one) => {
                    if let Some(molecule) = resolved_one.remove(&idx) {
                        resolved.insert(idx, molecule);
                    }
                }
                Err(e) => errors.push(json!({
                    "index": idx,
                    "reference": reference.label(),
                    "reason": e.to_string(),
                })),
            }
        }

        if resolved.is_empty() {
            return Ok(InputParseOutcome {
                full_tasks: Vec::new(),
                duplicates: Vec::new(),
                errors,
            });
        }

        let molecule_ids: Vec<Value> = resolved.values().map(|m| Value::String(m.id.clone())).collect();
        let query = json!({
            "driver": meta.driver,
            "method": meta.method,
            "basis": meta.basis,
            "options": meta.options,
            "program": meta.program,
            "molecule_id": molecule_ids,
        });
        let existing = store.get_results(&query, &vec!["molecule_id".to_string()]).await?;
        let completed: std::collections::BTreeSet<String> =
            existing.into_iter().map(|r| r.molecule_id).collect();

        let mut full_tasks = Vec::new();
        let mut duplicates = Vec::new();
        for molecule in resolved.values() {
            if completed.contains(&molecule.id) {
                duplicates.push(Value::String(molecule.id.clone()));
                continue;
            }
            let query = json!({
                "driver": meta.driver,
                "method": meta.method,
                "basis": meta.basis,
                "options": meta.options,
                "program": meta.program,
                "molecule_id": molecule.id,
            });
            let (hash_keys, hash_index) = single_run_hash(&query);
            let run = json!({
                "molecule_id": molecule.id,
                "molecule": molecule.geometry,
                "driver": meta.driver,
                "method": meta.method,
                "basis": meta.basis,
                "options": meta.options,
            });
            full_tasks.push(TaskDescriptor {
                hash_index,
                hash_keys,
                spec: TaskSpec::ComputeSingle {
                    run,
                    program: meta.program.clone(),
                },
                parser: "single".to_string(),
                tag: None,
                hooks: Vec::new(),
            });
        }

        Ok(InputParseOutcome {
            full_tasks,
            duplicates,
            errors,
        })
    }
}

pub struct SingleOutputParser;

#[async_trait]
impl OutputParser for SingleOutputParser {
    async fn absorb_output(
        &self,
        store: &dyn Store,
        completions: BTreeMap<QueueId, Completion>,
    ) -> Result<OutputAbsorbOutcome, OrchestrationError> {
        let mut rows = Vec::with_capacity(completions.len());
        let mut malformed = Vec::new();
        let mut by_index: Vec<QueueId> = Vec::with_capacity(completions.len());

        for (queue_id, completion) in &completions {
            match result_record_for_step(&completion.payload.data) {
                Ok(record) => {
                    by_index.push(queue_id.clone());
                    rows.push(record);
                }
                Err(reason) => malformed.push((queue_id.clone(), reason)),
            }
        }

        let outcome = store.add_results(rows).await?;
        if !outcome.errors.is_empty() {
            return Err(OrchestrationError::DuplicateConflict {
                table: "results".to_string(),
                queue_id: by_index.first().cloned().unwrap_or_default(),
            });
        }

        let mut completed = Vec::with_capacity(outcome.inserted.len());
        let mut hook_actions = Vec::new();
        for ((result_id, _hash_index), queue_id) in outcome.inserted.into_iter().zip(by_index) {
            let locator = Locator::results(result_id);
            if let Some(completion) = completions.get(&queue_id) {
                for hook in &completion.hooks {
                    hook_actions.push(HookAction {
                        hook: hook.clone(),
                        locator: locator.clone(),
                    });
                }
            }
            completed.push((queue_id, locator));
        }

        Ok(OutputAbsorbOutcome {
            completed,
            hook_actions,
            errors: malformed,
        })
    }
}

/// Parse one computed single-point payload into a storable result record.
/// Shared with the optimization parser's trajectory-step handling, which
/// carries one of these per completed optimization step.
pub(crate) fn result_record_for_step(data: &Value) -> Result<ResultRecord, String> {
    let field = |name: &str| -> Result<String, String> {
        data.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("result payload missing string field `{name}`"))
    };
    let molecule_id = field("molecule_id")?;
    let method = field("method").unwrap_or_default();
    let basis = field("basis").unwrap_or_default();
    let options = field("options").unwrap_or_default();
    let program = field("program").unwrap_or_default();
    let driver = field("driver").unwrap_or_default();

    let (_, hash_index) = chem_shared::hash::single_run_hash(&json!({
        "driver": driver,
        "method": method,
        "basis": basis,
        "options": options,
        "program": program,
        "molecule_id": molecule_id,
    }));

    Ok(ResultRecord {
        id: None,
        molecule_id,
        method,
        basis,
        options,
        program,
        driver,
        payload: data.get("result").cloned().unwrap_or_else(|| data.clone()),
        hash_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chem_shared::store::memory::InMemoryStore;

    fn meta() -> Value {
        json!({
            "driver": "energy", "method": "hf", "basis": "sto-3g",
            "options": "default", "program": "psi4",
        })
    }

    /// §8 invariant 2: resubmitting the identical `{driver, method, basis,
    /// options, program, molecule_id}` tuple yields `full_tasks = []` and
    /// `duplicates` containing the molecule id.
    #[tokio::test]
    async fn dedup_against_an_existing_result_row() {
        let store = InMemoryStore::default();
        let molecule_id = store
            .add_molecules(&BTreeMap::from([("m".to_string(), json!({"symbols": ["H", "H"]}))]))
            .await
            .unwrap()["m"]
            .clone();

        let parser = SingleInputParser;
        let first = parser
            .parse_input(&store, meta(), json!([molecule_id.clone()]))
            .await
            .unwrap();
        assert_eq!(first.full_tasks.len(), 1);
        assert!(first.duplicates.is_empty());

        store
            .add_results(vec![result_record_for_step(&json!({
                "molecule_id": molecule_id, "driver": "energy", "method": "hf",
                "basis": "sto-3g", "options": "default", "program": "psi4",
            }))
            .unwrap()])
            .await
            .unwrap();

        let second = parser
            .parse_input(&store, meta(), json!([molecule_id.clone()]))
            .await
            .unwrap();
        assert!(second.full_tasks.is_empty());
        assert_eq!(second.duplicates, vec![Value::String(molecule_id)]);
    }

    /// Unresolvable molecule refs are reported as errors, not a hard
    /// failure of the whole request (§7 "Input resolution errors").
    #[tokio::test]
    async fn unresolvable_molecule_ref_is_a_non_fatal_error() {
        let store = InMemoryStore::default();
        let parser = SingleInputParser;
        let outcome = parser
            .parse_input(&store, meta(), json!(["does-not-exist"]))
            .await
            .unwrap();
        assert!(outcome.full_tasks.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }
}
