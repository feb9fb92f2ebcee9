//! Locators: small pointers at a concrete store row without exposing the
//! store's row shape (§3, §9 REDESIGN FLAGS).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The tables a locator may point into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Results,
    Procedures,
}

/// A small record `{table, index, data}` that points at a concrete store
/// row without exposing the store's row shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Locator {
    pub table: TableName,
    pub index: String,
    pub data: Value,
}

impl Locator {
    pub fn results(id: impl Into<Value>) -> Self {
        Self {
            table: TableName::Results,
            index: "id".to_string(),
            data: id.into(),
        }
    }

    pub fn procedures(id: impl Into<Value>) -> Self {
        Self {
            table: TableName::Procedures,
            index: "id".to_string(),
            data: id.into(),
        }
    }
}
