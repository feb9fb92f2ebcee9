//! `torsion_drive` — iterative multi-angle scan (§4.4): each `iterate()`
//! submits the next un-submitted grid-angle task and inspects the store for
//! the previous batch's landed result, advancing a `GridState` until every
//! angle is computed.

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
struct TorsionDriveMeta {
    driver: String,
    basis: String,
    options: String,
    program: String,
    /// Grid angles to scan, in degrees.
    angles: Vec<i64>,
}

/// Persisted progress through the angle grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridState {
    molecule_id: String,
    geometry: Value,
    driver: String,
    basis: String,
    options: String,
    program: String,
    angles: Vec<i64>,
    /// Index into `angles` of the grid point currently in flight (or next
    /// to submit, if `awaiting` is false).
    index: usize,
    /// Whether the task for `angles[index]` has been submitted and is
    /// still being waited on.
    awaiting: bool,
}

fn angle_method(angle: i64) -> String {
    format!("torsion_drive_angle_{angle}")
}

fn angle_query(state: &GridState, angle: i64) -> Value {
    json!({
        "driver": state.driver,
        "method": angle_method(angle),
        "basis": state.basis,
        "options": state.options,
        "program": state.program,
        "molecule_id": state.molecule_id,
    })
}

fn angle_task(state: &GridState, molecule: &Molecule, angle: i64) -> TaskDescriptor {
    let query = angle_query(state, angle);
    let (hash_keys, hash_index) = single_run_hash(&query);
    TaskDescriptor {
        hash_index,
        hash_keys,
        spec: TaskSpec::ComputeSingle {
            run: json!({
                "molecule_id": state.molecule_id,
                "molecule": molecule.geometry,
                "driver": state.driver,
                "method": angle_method(angle),
                "basis": state.basis,
                "options": state.options,
                "angle": angle,
            }),
            program: state.program.clone(),
        },
        parser: "single".to_string(),
        tag: None,
        hooks: Vec::new(),
    }
}

async fn angle_is_done(store: &dyn Store, state: &GridState, angle: i64) -> Result<bool, OrchestrationError> {
    let query = angle_query(state, angle);
    let found = store
        .get_results(&query, &vec!["molecule_id".to_string()])
        .await?;
    Ok(!found.is_empty())
}

struct TorsionDriveMachine {
    state: GridState,
    molecule: Molecule,
}

#[async_trait]
impl ServiceMachine for TorsionDriveMachine {
    fn get_json(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }

    async fn iterate(&mut self, store: &dyn Store, nanny: &QueueNanny) -> Result<bool, OrchestrationError> {
        if self.state.index >= self.state.angles.len() {
            return Ok(true);
        }
        let angle = self.state.angles[self.state.index];

        if !self.state.awaiting {
            let task = angle_task(&self.state, &self.molecule, angle);
            nanny.submit_tasks(vec![task]).await?;
            self.state.awaiting = true;
            return Ok(false);
        }

        if angle_is_done(store, &self.state, angle).await? {
            self.state.index += 1;
            self.state.awaiting = false;
            return Ok(self.state.index >= self.state.angles.len());
        }

        Ok(false)
    }
}

pub struct TorsionDriveKind;

#[async_trait]
impl ServiceKind for TorsionDriveKind {
    async fn initialize(
        &self,
        meta: Value,
        molecule: Molecule,
    ) -> Result<Box<dyn ServiceMachine>, OrchestrationError> {
        let meta: TorsionDriveMeta = serde_json::from_value(meta)?;
        if meta.angles.is_empty() {
            return Err(OrchestrationError::Internal(
                "torsion_drive requires a non-empty angle grid".to_string(),
            ));
        }
        let state = GridState {
            molecule_id: molecule.id.clone(),
            geometry: molecule.geometry.clone(),
            driver: meta.driver,
            basis: meta.basis,
            options: meta.options,
            program: meta.program,
            angles: meta.angles,
            index: 0,
            awaiting: false,
        };
        Ok(Box::new(TorsionDriveMachine { state, molecule }))
    }

    fn build(&self, state: Value) -> Result<Box<dyn ServiceMachine>, OrchestrationError> {
        let state: GridState = serde_json::from_value(state)?;
        let molecule = Molecule {
            id: state.molecule_id.clone(),
            content_hash: String::new(),
            geometry: state.geometry.clone(),
        };
        Ok(Box::new(TorsionDriveMachine { state, molecule }))
    }
}
