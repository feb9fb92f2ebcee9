//! Durable service records (§3, §4.4).

use crate::model::hook::HookSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ServiceId = String;

/// Durable state of a running multi-step workflow.
///
/// A service record exists iff the workflow has not reached a terminal
/// state; the store drops the row when `iterate()` reports `finished`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ServiceId>,
    pub kind: String,
    pub state: Value,
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
}
