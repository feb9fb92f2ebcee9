//! `two_step` — the minimal two-task workflow used by the literal S5
//! testable scenario (§8): submit one task, wait for it, submit a second,
//! wait for it, finish.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chem_shared::error::OrchestrationError;
use chem_shared::hash::single_run_hash;
use chem_shared::model::{Molecule, TaskDescriptor, TaskSpec};
use chem_shared::store::Store;

use crate::orchestration::nanny::QueueNanny;
use crate::orchestration::registry::{ServiceKind, ServiceMachine};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TwoStepMeta {
    driver: String,
    basis: String,
    options: String,
    program: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TwoStepState {
    molecule_id: String,
    /// Snapshotted alongside the id so `build()` can reconstruct a full
    /// `Molecule` without going back to the store (§4.4 initialization is
    /// synchronous; the store is opaque about geometry content anyway).
    geometry: Value,
    driver: String,
    basis: String,
    options: String,
    program: String,
    /// 0 = nothing submitted yet, 1 = first task outstanding, 2 = second
    /// task outstanding, 3 = finished (never persisted — `iterate` returns
    /// `true` the same tick step 2's completion is observed).
    step: u8,
}

fn step_method(step: u8) -> String {
    format!("two_step_{step}")
}

fn step_query(state: &TwoStepState, step: u8) -> Value {
    json!({
        "driver": state.driver,
        "method": step_method(step),
        "basis": state.basis,
        "options": state.options,
        "program": state.program,
        "molecule_id": state.molecule_id,
    })
}

fn step_task(state: &TwoStepState, molecule: &Molecule, step: u8) -> TaskDescriptor {
    let query = step_query(state, step);
    let (hash_keys, hash_index) = single_run_hash(&query);
    TaskDescriptor {
        hash_index,
        hash_keys,
        spec: TaskSpec::ComputeSingle {
            run: json!({
                "molecule_id": state.molecule_id,
                "molecule": molecule.geometry,
                "driver": state.driver,
                "method": step_method(step),
                "basis": state.basis,
                "options": state.options,
            }),
            program: state.program.clone(),
        },
        parser: "single".to_string(),
        tag: None,
        hooks: Vec::new(),
    }
}

async fn step_is_done(store: &dyn Store, state: &TwoStepState, step: u8) -> Result<bool, OrchestrationError> {
    let query = step_query(state, step);
    let found = store
        .get_results(&query, &vec!["molecule_id".to_string()])
        .await?;
    Ok(!found.is_empty())
}

struct TwoStepMachine {
    state: TwoStepState,
    molecule: Molecule,
}

#[async_trait]
impl ServiceMachine for TwoStepMachine {
    fn get_json(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }

    async fn iterate(&mut self, store: &dyn Store, nanny: &QueueNanny) -> Result<bool, OrchestrationError> {
        match self.state.step {
            0 => {
                let task = step_task(&self.state, &self.molecule, 1);
                nanny.submit_tasks(vec![task]).await?;
                self.state.step = 1;
                Ok(false)
            }
            1 => {
                if step_is_done(store, &self.state, 1).await? {
                    let task = step_task(&self.state, &self.molecule, 2);
                    nanny.submit_tasks(vec![task]).await?;
                    self.state.step = 2;
                }
                Ok(false)
            }
            2 => Ok(step_is_done(store, &self.state, 2).await?),
            _ => Ok(true),
        }
    }
}

pub struct TwoStepKind;

#[async_trait]
impl ServiceKind for TwoStepKind {
    async fn initialize(
        &self,
        meta: Value,
        molecule: Molecule,
    ) -> Result<Box<dyn ServiceMachine>, OrchestrationError> {
        let meta: TwoStepMeta = serde_json::from_value(meta)?;
        let state = TwoStepState {
            molecule_id: molecule.id.clone(),
            geometry: molecule.geometry.clone(),
            driver: meta.driver,
            basis: meta.basis,
            options: meta.options,
            program: meta.program,
            step: 0,
        };
        Ok(Box::new(TwoStepMachine { state, molecule }))
    }

    fn build(&self, state: Value) -> Result<Box<dyn ServiceMachine>, OrchestrationError> {
        let state: TwoStepState = serde_json::from_value(state)?;
        let molecule = Molecule {
            id: state.molecule_id.clone(),
            content_hash: String::new(),
            geometry: state.geometry.clone(),
        };
        Ok(Box::new(TwoStepMachine { state, molecule }))
    }
}
