//! "optimization" — one multi-step workflow per input molecule (§4.2.b).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use chem_shared::error::OrchestrationError;
use chem_shared::hash::hash_procedure_keys;
use chem_shared::model::{
    HookAction, Locator, MoleculeRef, ProcedureRecord, QueueId, TaskDescriptor, TaskSpec,
};
use chem_shared::store::Store;
use chem_worker::Completion;

use crate::orchestration::registry::{InputParseOutcome, InputParser, OutputAbsorbOutcome, OutputParser};

#[derive(Debug, Deserialize)]
struct QcMeta {
    driver: String,
    method: String,
    basis: String,
    options: String,
    program: String,
}

#[derive(Debug, Deserialize)]
struct OptimizationMeta {
    /// The optimizer/procedure program (e.g. `"geometric"`), distinct from
    /// `qc_meta.program` (the underlying QC engine it drives).
    program: String,
    #[serde(default)]
    options: Option<String>,
    #[serde(default)]
    keywords: Option<Value>,
    qc_meta: QcMeta,
    #[serde(default)]
    duplicate_id: Option<String>,
}

fn parse_data_refs(data: &Value) -> Result<Vec<MoleculeRef>, OrchestrationError> {
    let items = data.as_array().ok_or_else(|| {
        OrchestrationError::Internal("optimization procedure data must be an array".to_string())
    })?;
    items
        .iter()
        .map(|v| serde_json::from_value(v.clone()).map_err(OrchestrationError::from))
        .collect()
}

pub struct OptimizationInputParser;

#[async_trait]
impl InputParser for OptimizationInputParser {
    async fn parse_input(
        &self,
        store: &dyn Store,
        meta: Value,
        data: Value,
    ) -> Result<InputParseOutcome, OrchestrationError> {
        let meta: OptimizationMeta = serde_json::from_value(meta.clone())?;
        let duplicate_id = meta
            .duplicate_id
            .clone()
            .unwrap_or_else(|| "hash_index".to_string());
        if duplicate_id != "hash_index" && duplicate_id != "id" {
            return Err(OrchestrationError::UnknownEnumValue {
                field: "duplicate_id".to_string(),
                value: duplicate_id,
            });
        }
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

        let mut keywords: Map<String, Value> = match &meta.options {
            Some(name) => {
                let sets = store
                    .get_options(&[(meta.program.clone(), name.clone())])
                    .await?;
                sets.first()
                    .map(chem_shared::model::OptionSet::keywords_without_identity)
                    .unwrap_or_default()
            }
            None => meta
                .keywords
                .as_ref()
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        };
        keywords.insert("program".to_string(), Value::String(meta.qc_meta.program.clone()));
        let keywords = Value::Object(keywords);

        // Per-input hash_index, keyed by `single_key` (the index in the
        // runs map) so two geometries sharing `keywords` stay distinct.
        let mut candidates: BTreeMap<usize, String> = BTreeMap::new();
        for idx in resolved.keys() {
            let hash_index = hash_procedure_keys(&json!({
                "type": "optimization",
                "program": meta.program,
                "keywords": keywords,
                "single_key": idx,
            }));
            candidates.insert(*idx, hash_index);
        }

        let candidate_hashes: Vec<Value> =
            candidates.values().map(|h| Value::String(h.clone())).collect();
        let existing = store
            .get_procedures(&json!({ "hash_index": candidate_hashes }), &vec![])
            .await?;
        let existing_by_hash: BTreeMap<String, chem_shared::model::ProcedureId> = existing
            .into_iter()
            .filter_map(|p| p.id.map(|id| (p.hash_index, id)))
            .collect();

        let mut full_tasks = Vec::new();
        let mut duplicates = Vec::new();
        for (idx, molecule) in &resolved {
            let hash_index = candidates.get(idx).expect("computed above").clone();
            if let Some(existing_id) = existing_by_hash.get(&hash_index) {
                duplicates.push(if duplicate_id == "id" {
                    Value::String(existing_id.clone())
                } else {
                    Value::String(hash_index.clone())
                });
                continue;
            }

            let packet = json!({
                "initial_molecule": molecule.geometry,
                "input_specification": { "keywords": keywords },
                "qcfractal_tags": meta_raw(&meta, *idx),
                "single_key": idx,
            });
            full_tasks.push(TaskDescriptor {
                hash_index,
                hash_keys: json!({
                    "type": "optimization",
                    "program": meta.program,
                    "keywords": keywords,
                    "single_key": idx,
                }),
                spec: TaskSpec::ComputeProcedure {
                    packet,
                    program: meta.program.clone(),
                },
                parser: "optimization".to_string(),
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

fn meta_raw(meta: &OptimizationMeta, single_key: usize) -> Value {
    json!({
        "procedure": "optimization",
        "program": meta.program,
        "qc_meta": {
            "driver": meta.qc_meta.driver,
            "method": meta.qc_meta.method,
            "basis": meta.qc_meta.basis,
            "options": meta.qc_meta.options,
            "program": meta.qc_meta.program,
        },
        "single_key": single_key,
    })
}

pub struct OptimizationOutputParser;

#[async_trait]
impl OutputParser for OptimizationOutputParser {
    async fn absorb_output(
        &self,
        store: &dyn Store,
        completions: BTreeMap<QueueId, Completion>,
    ) -> Result<OutputAbsorbOutcome, OrchestrationError> {
        let mut completed = Vec::new();
        let mut hook_actions = Vec::new();
        let mut errors = Vec::new();

        for (queue_id, completion) in &completions {
            match absorb_one(store, &completion.payload.data).await {
                Ok(locator) => {
                    for hook in &completion.hooks {
                        hook_actions.push(HookAction {
                            hook: hook.clone(),
                            locator: locator.clone(),
                        });
                    }
                    completed.push((queue_id.clone(), locator));
                }
                Err(AbsorbError::Duplicate) => {
                    return Err(OrchestrationError::DuplicateConflict {
                        table: "procedures".to_string(),
                        queue_id: queue_id.clone(),
                    });
                }
                Err(AbsorbError::Malformed(reason)) => errors.push((queue_id.clone(), reason)),
            }
        }

        Ok(OutputAbsorbOutcome {
            completed,
            hook_actions,
            errors,
        })
    }
}

enum AbsorbError {
    Malformed(String),
    Duplicate,
}

/// Hoists `qcfractal_tags`' own keys onto the top level of the payload,
/// then drops the tag — mirroring the original's
/// `result.update(result["qcfractal_tags"]); del result["qcfractal_tags"]`
/// (§4.2 Supplemental, `procedures.py:279-281`). `ProcedureRecord` has no
/// field to carry the tag payload itself once its keys have been hoisted.
fn hoist_qcfractal_tags(data: &Value) -> Result<Value, AbsorbError> {
    let mut merged = data
        .as_object()
        .cloned()
        .ok_or_else(|| AbsorbError::Malformed("procedure payload is not a JSON object".to_string()))?;
    if let Some(tags) = merged.remove("qcfractal_tags") {
        let tags: Map<String, Value> = tags
            .as_object()
            .cloned()
            .ok_or_else(|| AbsorbError::Malformed("qcfractal_tags is not a JSON object".to_string()))?;
        for (key, value) in tags {
            merged.insert(key, value);
        }
    }
    Ok(Value::Object(merged))
}

async fn absorb_one(store: &dyn Store, data: &Value) -> Result<Locator, AbsorbError> {
    let data = &hoist_qcfractal_tags(data)?;
    let string_field = |name: &str| -> Result<String, AbsorbError> {
        data.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AbsorbError::Malformed(format!("procedure payload missing string field `{name}`")))
    };
    let program = string_field("program")?;
    let keywords = data
        .get("keywords")
        .cloned()
        .ok_or_else(|| AbsorbError::Malformed("procedure payload missing `keywords`".to_string()))?;
    let single_key = data
        .get("single_key")
        .ok_or_else(|| AbsorbError::Malformed("procedure payload missing `single_key`".to_string()))?
        .clone();

    let initial_molecule_geom = data
        .get("initial_molecule")
        .cloned()
        .ok_or_else(|| AbsorbError::Malformed("procedure payload missing `initial_molecule`".to_string()))?;
    let final_molecule_geom = data
        .get("final_molecule")
        .cloned()
        .ok_or_else(|| AbsorbError::Malformed("procedure payload missing `final_molecule`".to_string()))?;

    let mut molecules = BTreeMap::new();
    molecules.insert("initial".to_string(), initial_molecule_geom);
    molecules.insert("final".to_string(), final_molecule_geom);
    let molecule_ids = store
        .add_molecules(&molecules)
        .await
        .map_err(|e| AbsorbError::Malformed(e.to_string()))?;

    let trajectory_steps = data
        .get("trajectory")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut trajectory_records = Vec::with_capacity(trajectory_steps.len());
    for step in &trajectory_steps {
        trajectory_records
            .push(super::single::result_record_for_step(step).map_err(AbsorbError::Malformed)?);
    }
    let trajectory_outcome = store
        .add_results(trajectory_records)
        .await
        .map_err(|e| AbsorbError::Malformed(e.to_string()))?;
    if !trajectory_outcome.errors.is_empty() {
        return Err(AbsorbError::Duplicate);
    }
    let trajectory_ids: Vec<String> = trajectory_outcome
        .inserted
        .into_iter()
        .map(|(id, _)| id)
        .collect();

    let hash_index = hash_procedure_keys(&json!({
        "type": "optimization",
        "program": program,
        "keywords": keywords,
        "single_key": single_key,
    }));

    let record = ProcedureRecord {
        id: None,
        kind: "optimization".to_string(),
        program,
        keywords,
        initial_molecule: molecule_ids["initial"].clone(),
        final_molecule: molecule_ids["final"].clone(),
        trajectory: trajectory_ids,
        hash_index,
    };

    let outcome = store
        .add_procedures(vec![record])
        .await
        .map_err(|e| AbsorbError::Malformed(e.to_string()))?;
    if !outcome.errors.is_empty() {
        return Err(AbsorbError::Duplicate);
    }
    let (procedure_id, _) = outcome
        .inserted
        .into_iter()
        .next()
        .ok_or_else(|| AbsorbError::Malformed("store reported neither insert nor duplicate".to_string()))?;

    Ok(Locator::procedures(procedure_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chem_shared::store::memory::InMemoryStore;
    use serde_json::json;

    fn meta(program: &str) -> Value {
        json!({
            "program": program,
            "keywords": {"maxiter": 100},
            "qc_meta": {
                "driver": "gradient", "method": "hf", "basis": "sto-3g",
                "options": "default", "program": "psi4",
            },
        })
    }

    /// §8 invariant: unknown `duplicate_id` values fail fast (§7 "Unknown
    /// enum value").
    #[tokio::test]
    async fn unknown_duplicate_id_is_a_fatal_config_error() {
        let store = InMemoryStore::default();
        let mut m = meta("geometric");
        m["duplicate_id"] = json!("bogus");
        let parser = OptimizationInputParser;
        let err = parser
            .parse_input(&store, m, json!([{"symbols": ["H", "H"]}]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownEnumValue { .. }));
    }

    /// §8 S3: two optimization submissions over the same molecule with
    /// identical `{program, keywords, single_key}` collapse to one task the
    /// first time; nothing new is emitted once a matching procedure exists.
    #[tokio::test]
    async fn s3_one_of_two_inputs_already_has_a_matching_procedure() {
        let store = InMemoryStore::default();
        let ids = store
            .add_molecules(&BTreeMap::from([
                ("a".to_string(), json!({"symbols": ["H", "H"]})),
                ("b".to_string(), json!({"symbols": ["O"]})),
            ]))
            .await
            .unwrap();

        let parser = OptimizationInputParser;
        let m = meta("geometric");
        let data = json!([ids["a"].clone()]);
        let first = parser.parse_input(&store, m.clone(), data).await.unwrap();
        assert_eq!(first.full_tasks.len(), 1);
        assert!(first.duplicates.is_empty());

        // Simulate that task landing: insert the corresponding procedure
        // record directly under the same hash_index the parser computed.
        let task = &first.full_tasks[0];
        store
            .add_procedures(vec![ProcedureRecord {
                id: None,
                kind: "optimization".to_string(),
                program: "geometric".to_string(),
                keywords: json!({"maxiter": 100, "program": "psi4"}),
                initial_molecule: ids["a"].clone(),
                final_molecule: ids["a"].clone(),
                trajectory: Vec::new(),
                hash_index: task.hash_index.clone(),
            }])
            .await
            .unwrap();

        // Resubmit both inputs: "a" is now a duplicate, "b" is fresh.
        let data = json!([ids["a"].clone(), ids["b"].clone()]);
        let second = parser.parse_input(&store, m, data).await.unwrap();
        assert_eq!(second.full_tasks.len(), 1);
        assert_eq!(second.duplicates.len(), 1);
        assert_eq!(second.duplicates[0], Value::String(task.hash_index.clone()));
    }

    /// `duplicate_id="id"` reports the existing procedure's id instead of
    /// its hash_index.
    #[tokio::test]
    async fn duplicate_id_mode_reports_existing_procedure_id() {
        let store = InMemoryStore::default();
        let ids = store
            .add_molecules(&BTreeMap::from([("a".to_string(), json!({"symbols": ["H", "H"]}))]))
            .await
            .unwrap();
        let parser = OptimizationInputParser;
        let m = meta("geometric");
        let first = parser
            .parse_input(&store, m.clone(), json!([ids["a"].clone()]))
            .await
            .unwrap();
        let task = &first.full_tasks[0];
        let inserted = store
            .add_procedures(vec![ProcedureRecord {
                id: None,
                kind: "optimization".to_string(),
                program: "geometric".to_string(),
                keywords: json!({"maxiter": 100, "program": "psi4"}),
                initial_molecule: ids["a"].clone(),
                final_molecule: ids["a"].clone(),
                trajectory: Vec::new(),
                hash_index: task.hash_index.clone(),
            }])
            .await
            .unwrap();
        let existing_id = inserted.inserted[0].0.clone();

        let mut m_by_id = meta("geometric");
        m_by_id["duplicate_id"] = json!("id");
        let second = parser
            .parse_input(&store, m_by_id, json!([ids["a"].clone()]))
            .await
            .unwrap();
        assert_eq!(second.duplicates, vec![Value::String(existing_id)]);
    }

    /// §4.2 Supplemental: `qcfractal_tags`' own keys hoist onto the top
    /// level of the payload before the record is built (here the hoisted
    /// `program` key, since the worker's completion payload carries no
    /// top-level `program` field of its own), and the tag itself does not
    /// survive onto the stored `ProcedureRecord`.
    #[tokio::test]
    async fn absorb_one_hoists_qcfractal_tags_then_drops_it() {
        let store = InMemoryStore::default();
        let data = json!({
            "initial_molecule": {"symbols": ["H", "H"]},
            "final_molecule": {"symbols": ["H", "H"], "geometry": [0.0, 0.0, 0.0, 0.0, 0.0, 1.4]},
            "keywords": {"maxiter": 100, "program": "psi4"},
            "single_key": 0,
            "trajectory": [],
            "qcfractal_tags": {
                "procedure": "optimization",
                "program": "geometric",
                "qc_meta": {
                    "driver": "gradient", "method": "hf", "basis": "sto-3g",
                    "options": "default", "program": "psi4",
                },
                "single_key": 0,
            },
        });

        let locator = absorb_one(&store, &data).await.unwrap();
        assert!(matches!(locator.table, chem_shared::model::TableName::Procedures));

        let stored = store.get_procedures(&json!({}), &vec![]).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].program, "geometric");
    }

    /// A payload missing `qcfractal_tags` entirely still absorbs fine (the
    /// hoist step is a no-op when there is nothing to hoist) as long as a
    /// top-level `program` is present.
    #[tokio::test]
    async fn absorb_one_without_qcfractal_tags_uses_top_level_program() {
        let store = InMemoryStore::default();
        let data = json!({
            "program": "geometric",
            "initial_molecule": {"symbols": ["H", "H"]},
            "final_molecule": {"symbols": ["H", "H"]},
            "keywords": {"maxiter": 100},
            "single_key": 0,
            "trajectory": [],
        });

        absorb_one(&store, &data).await.unwrap();
        let stored = store.get_procedures(&json!({}), &vec![]).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].program, "geometric");
    }
}
