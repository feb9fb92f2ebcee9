//! Molecule input geometry records (§3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque, store-assigned identifier.
pub type MoleculeId = String;

/// An input geometry record.
///
/// `geometry` is kept as an opaque JSON blob — the orchestration core never
/// interprets atomic coordinates, it only needs the record to round-trip
/// through the store and be addressable by its canonical content hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Molecule {
    pub id: MoleculeId,
    pub content_hash: String,
    pub geometry: Value,
}

/// A molecule reference as it appears in an input request: either a
/// previously-stored id, or an inline specification to be added.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MoleculeRef {
    Id(MoleculeId),
    Inline(Value),
}

impl MoleculeRef {
    /// A stable label for error messages and logging, independent of
    /// whether the reference resolved.
    pub fn label(&self) -> String {
        match self {
            MoleculeRef::Id(id) => id.clone(),
            MoleculeRef::Inline(_) => "<inline molecule>".to_string(),
        }
    }
}
