//! Built-in procedure kinds (§4.2): `"single"` and `"optimization"`.

pub mod optimization;
pub mod single;

use crate::orchestration::registry::ProcedureRegistry;
use std::sync::Arc;

/// Build the registry of built-in procedure kinds. A production deployment
/// may register additional kinds before calling this, or extend the
/// returned registry's underlying builder directly.
pub fn builtin_registry() -> ProcedureRegistry {
    ProcedureRegistry::builder()
        .register(
            "single",
            Arc::new(single::SingleInputParser),
            Arc::new(single::SingleOutputParser),
        )
        .register(
            "optimization",
            Arc::new(optimization::OptimizationInputParser),
            Arc::new(optimization::OptimizationOutputParser),
        )
        .build()
}
