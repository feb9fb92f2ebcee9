//! Built-in service kinds (§4.4): `TwoStepService` and `TorsionDriveService`.

pub mod torsion_drive;
pub mod two_step;

use crate::orchestration::registry::ServiceRegistry;
use std::sync::Arc;

/// Build the registry of built-in service kinds.
pub fn builtin_registry() -> ServiceRegistry {
    ServiceRegistry::builder()
        .register("two_step", Arc::new(two_step::TwoStepKind))
        .register("torsion_drive", Arc::new(torsion_drive::TorsionDriveKind))
        .build()
}
