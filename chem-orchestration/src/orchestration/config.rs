//! Re-exports the layered configuration types from `chem_shared::config` so
//! callers that only depend on `chem_orchestration` don't need a direct
//! dependency on `chem_shared` just to read configuration.

pub use chem_shared::config::{AdapterConfig, AdapterSelection, ChemConfig, NannyConfig, QueuesConfig};
