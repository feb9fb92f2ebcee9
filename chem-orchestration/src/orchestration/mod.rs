//! # Orchestration Core
//!
//! Wires together the store, the backend adapter, the procedure/service
//! registries, the queue nanny, and the two scheduler entry points into one
//! running [`Engine`].

pub mod config;
pub mod nanny;
pub mod procedures;
pub mod registry;
pub mod scheduler;
pub mod services;

use std::sync::Arc;

use chem_shared::config::ChemConfig;
use chem_shared::error::OrchestrationError;
use chem_shared::store::memory::InMemoryStore;
use chem_shared::store::Store;
use chem_worker::build_adapter;

use nanny::QueueNanny;
use registry::{ProcedureRegistry, ServiceRegistry};
use scheduler::{QueueScheduler, ServiceScheduler};

/// A fully wired orchestration engine: the nanny plus the two scheduler
/// entry points, holding shared `Arc` handles to the registries and store.
pub struct Engine {
    pub nanny: Arc<QueueNanny>,
    pub queue_scheduler: QueueScheduler,
    pub service_scheduler: ServiceScheduler,
}

impl Engine {
    /// Assemble an engine from a store and a backend adapter that have
    /// already been constructed (e.g. a real document store swapped in by
    /// a caller that doesn't want the in-memory default).
    pub fn new(
        store: Arc<dyn Store>,
        adapter: Arc<dyn chem_worker::BackendAdapter>,
        config: ChemConfig,
    ) -> Self {
        let procedures = Arc::new(procedures::builtin_registry());
        let services = Arc::new(services::builtin_registry());
        let nanny = Arc::new(QueueNanny::new(
            store,
            adapter,
            procedures,
            services.clone(),
            config.nanny,
        ));
        let queue_scheduler = QueueScheduler::new(nanny.clone());
        let service_scheduler = ServiceScheduler::new(nanny.clone(), services);
        Self {
            nanny,
            queue_scheduler,
            service_scheduler,
        }
    }

    /// Build an engine from layered configuration alone: an in-memory store
    /// and whichever backend adapter `config.adapter.queue_type` selects
    /// (§6.3). Fails if the selector is unknown (§7).
    pub fn bootstrap(config: ChemConfig) -> Result<Self, OrchestrationError> {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::default());
        let adapter = build_adapter(&config.adapter)?;
        Ok(Self::new(store, adapter, config))
    }
}
