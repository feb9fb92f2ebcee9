//! The payload a backend adapter hands back for one completed task (§4.3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{success: bool, error?: string, ...}` — the adapter must not retry
/// failed tasks silently; failure is reported to the nanny as `success:
/// false` with a human-readable `error`. On success, the remaining fields
/// are the procedure-parser-specific run output (opaque to the adapter and
/// the nanny, interpreted only by the matching output parser).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Value,
}

impl ResultPayload {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: Value::Null,
        }
    }
}
