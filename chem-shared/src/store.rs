//! # Store Contract (§6.1)
//!
//! The operation set the core requires from a persistent, document-oriented
//! backend. This crate only fixes the *interface*; concrete storage is an
//! external collaborator (§1 Out of scope). An in-memory reference
//! implementation lives in [`crate::store::memory`] for tests and for
//! exercising the core without a real database.

use crate::error::StoreError;
use crate::model::{
    HookAction, Locator, Molecule, MoleculeId, MoleculeRef, OptionSet, ProcedureId,
    ProcedureRecord, QueueEntry, QueueId, ResultId, ResultRecord, ServiceId, ServiceRecord,
    TaskDescriptor,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Result of a bulk-insert that may report duplicates without failing the
/// whole batch: `inserted` carries the keys that landed, `errors` carries
/// one entry per row the store refused to accept as new.
#[derive(Debug, Clone, Default)]
pub struct BulkInsertOutcome<K> {
    pub inserted: Vec<(K, String)>,
    pub errors: Vec<Value>,
}

/// A free-form query over a table's fields, e.g. `{"driver": "energy",
/// "molecule_id": ["mol_1", "mol_2"]}`. Kept as JSON per §9 — the store
/// implementation, not this crate, owns query planning.
pub type Query = Value;

/// Field names the caller intends to read from a query result; an empty
/// projection means the caller reads full rows. A document-oriented
/// backend may use a non-empty projection to narrow what it sends back
/// over the wire. `ResultRecord`/`ProcedureRecord` are fixed-shape typed
/// rows rather than documents, so [`crate::store::memory::InMemoryStore`]
/// cannot return a narrower row for a non-empty projection — it validates
/// the named fields are real instead, surfacing a caller's typo as a
/// `StoreError` rather than silently ignoring it.
pub type Projection = Vec<String>;

/// The store contract the orchestration core depends on (§6.1).
///
/// Implementations must satisfy the dedup invariants of §3: `add_results`
/// / `add_procedures` enforce `hash_index` uniqueness and surface
/// duplicates in the outcome rather than silently overwriting.
#[async_trait]
pub trait Store: Send + Sync {
    // -- molecules ---------------------------------------------------
    async fn mixed_molecule_get(
        &self,
        refs: &BTreeMap<usize, MoleculeRef>,
    ) -> Result<BTreeMap<usize, Molecule>, StoreError>;

    async fn add_molecules(
        &self,
        molecules: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, MoleculeId>, StoreError>;

    // -- options ------------------------------------------------------
    async fn get_options(&self, keys: &[(String, String)]) -> Result<Vec<OptionSet>, StoreError>;

    // -- results --------------------------------------------------------
    async fn get_results(
        &self,
        query: &Query,
        projection: &Projection,
    ) -> Result<Vec<ResultRecord>, StoreError>;

    async fn add_results(
        &self,
        results: Vec<ResultRecord>,
    ) -> Result<BulkInsertOutcome<ResultId>, StoreError>;

    // -- procedures -----------------------------------------------------
    async fn get_procedures(
        &self,
        query: &Query,
        projection: &Projection,
    ) -> Result<Vec<ProcedureRecord>, StoreError>;

    async fn add_procedures(
        &self,
        procedures: Vec<ProcedureRecord>,
    ) -> Result<BulkInsertOutcome<ProcedureId>, StoreError>;

    // -- queue ------------------------------------------------------------
    /// Submit tasks into the queue table. Duplicate hash_index tasks are
    /// silently deduplicated at the store layer (§4.5 step 1).
    async fn queue_submit(&self, tasks: Vec<TaskDescriptor>) -> Result<Vec<QueueId>, StoreError>;

    /// Atomically claim up to `n` PENDING-unsubmitted rows, transitioning
    /// them to PENDING-submitted, and return them for dispatch.
    async fn queue_get_next(&self, n: usize) -> Result<Vec<QueueEntry>, StoreError>;

    /// Mark a queue entry COMPLETE, recording where its durable record
    /// landed.
    async fn queue_mark_complete(
        &self,
        queue_id: &QueueId,
        locator: Locator,
    ) -> Result<(), StoreError>;

    /// Mark a queue entry ERROR, recording the failure reason.
    async fn queue_mark_error(&self, queue_id: &QueueId, reason: String) -> Result<(), StoreError>;

    // -- services -----------------------------------------------------
    async fn add_services(
        &self,
        services: Vec<ServiceRecord>,
    ) -> Result<Vec<ServiceId>, StoreError>;

    async fn get_services(
        &self,
        ids: &[ServiceId],
    ) -> Result<Vec<(ServiceId, ServiceRecord)>, StoreError>;

    async fn update_services(
        &self,
        updates: Vec<(ServiceId, Value)>,
    ) -> Result<(), StoreError>;

    /// Remove a service record — the only way to mark a workflow complete
    /// (§3 invariants: "a service record exists iff the workflow has not
    /// reached a terminal state").
    async fn remove_service(&self, id: &ServiceId) -> Result<(), StoreError>;

    // -- hooks ------------------------------------------------------------
    async fn handle_hooks(&self, actions: Vec<HookAction>) -> Result<(), StoreError>;
}

pub mod memory;
