//! Task specifications dispatched to a backend adapter.
//!
//! §9 REDESIGN FLAGS: the original `spec.function` string
//! (`"qcengine.compute"` / `"qcengine.compute_procedure"`) names an RPC
//! target, not an in-process callable. Here it becomes a tagged enum the
//! adapter matches on instead of dispatching a string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a queued task asks the backend to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum TaskSpec {
    /// `qcengine.compute` — a single atomic run.
    ComputeSingle { run: Value, program: String },
    /// `qcengine.compute_procedure` — a multi-step procedure packet.
    ComputeProcedure { packet: Value, program: String },
}

impl TaskSpec {
    pub fn program(&self) -> &str {
        match self {
            TaskSpec::ComputeSingle { program, .. } => program,
            TaskSpec::ComputeProcedure { program, .. } => program,
        }
    }
}
