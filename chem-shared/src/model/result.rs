//! Atomic single-point computation outcomes (§3).

use crate::hash::HashIndex;
use crate::model::molecule::MoleculeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ResultId = String;

/// One atomic single-point computation outcome.
///
/// `hash_index` is a pure function of `{driver, method, basis, options,
/// program, molecule_id}` — the store enforces its uniqueness on insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ResultId>,
    pub molecule_id: MoleculeId,
    pub method: String,
    pub basis: String,
    pub options: String,
    pub program: String,
    pub driver: String,
    pub payload: Value,
    pub hash_index: HashIndex,
}
