//! Named keyword bags bound to a program (§3).

use serde::{Deserialize, Serialize};
use serde_json::Map;

/// A named bag of keyword parameters bound to a program name.
///
/// `(program, name)` is unique — the store is responsible for enforcing
/// that, this type only carries the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionSet {
    pub program: String,
    pub name: String,
    pub keywords: Map<String, serde_json::Value>,
}

impl OptionSet {
    /// Keywords with the `program`/`name` identity fields stripped, ready
    /// to be merged into a run specification (§4.2.b step 2).
    pub fn keywords_without_identity(&self) -> Map<String, serde_json::Value> {
        let mut kw = self.keywords.clone();
        kw.remove("program");
        kw.remove("name");
        kw
    }
}
