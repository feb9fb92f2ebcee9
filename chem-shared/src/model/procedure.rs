//! Multi-step computation outcomes (§3), e.g. geometry optimizations.

use crate::hash::HashIndex;
use crate::model::molecule::MoleculeId;
use crate::model::result::ResultId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ProcedureId = String;

/// One multi-step computation outcome.
///
/// `hash_index` is computed over `{type, program, keywords, single_key}`
/// (§4.2.b step 4) — `single_key` preserves per-input identity when two
/// distinct geometries happen to share the same keywords.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ProcedureId>,
    pub kind: String,
    pub program: String,
    pub keywords: Value,
    pub initial_molecule: MoleculeId,
    pub final_molecule: MoleculeId,
    pub trajectory: Vec<ResultId>,
    pub hash_index: HashIndex,
}
