//! # Parser and Service Registries (§4.2, §4.4, §9 REDESIGN FLAGS)
//!
//! The original system's procedure/service lookups are process-wide global
//! mutable dictionaries populated by import side effects. Per §9, both
//! become explicit registry values built with a builder and threaded into
//! the nanny at construction time; registration is a builder step, not an
//! import side effect.

use crate::orchestration::nanny::QueueNanny;
use async_trait::async_trait;
use chem_shared::error::OrchestrationError;
use chem_shared::model::{HookAction, Locator, Molecule, QueueId, TaskDescriptor};
use chem_worker::Completion;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// What an input parser hands back (§4.2.a/.b step "Returns").
#[derive(Debug, Default)]
pub struct InputParseOutcome {
    /// Fresh task descriptors to enqueue.
    pub full_tasks: Vec<TaskDescriptor>,
    /// Inputs that were already satisfied by prior work (molecule ids for
    /// "single", hash_index/id strings for "optimization" depending on
    /// `duplicate_id`).
    pub duplicates: Vec<Value>,
    /// Inputs that failed to resolve at all (§7 input resolution errors).
    pub errors: Vec<Value>,
}

/// What an output parser hands back (§4.2.a/.b output "Returns").
#[derive(Debug, Default)]
pub struct OutputAbsorbOutcome {
    /// `(queue_id, locator)` pairs the nanny writes back onto the queue
    /// table to mark those entries COMPLETE.
    pub completed: Vec<(QueueId, Locator)>,
    /// Hook actions ready to hand to `store.handle_hooks` — already bound
    /// to the locator of the record that just landed (§4.7).
    pub hook_actions: Vec<HookAction>,
    /// Per-row absorption failures (malformed payload, missing identity
    /// fields) that should not abort the rest of the batch — the nanny
    /// records each against its queue_id and marks the entry ERROR.
    pub errors: Vec<(QueueId, String)>,
}

/// Per procedure kind, the pair of functions described in §4.2: input
/// expansion (request -> task descriptors + duplicates) and output
/// absorption (completed payloads -> durable records + hooks).
#[async_trait]
pub trait InputParser: Send + Sync {
    async fn parse_input(
        &self,
        store: &dyn chem_shared::store::Store,
        meta: Value,
        data: Value,
    ) -> Result<InputParseOutcome, OrchestrationError>;
}

#[async_trait]
pub trait OutputParser: Send + Sync {
    async fn absorb_output(
        &self,
        store: &dyn chem_shared::store::Store,
        completions: BTreeMap<QueueId, Completion>,
    ) -> Result<OutputAbsorbOutcome, OrchestrationError>;
}

struct ProcedureEntry {
    input: Arc<dyn InputParser>,
    output: Arc<dyn OutputParser>,
}

/// A process-wide mapping from procedure name to `(input_parser,
/// output_parser)`, built once at construction time and looked up
/// read-only thereafter (§4.2).
#[derive(Default)]
pub struct ProcedureRegistry {
    parsers: HashMap<String, ProcedureEntry>,
}

impl ProcedureRegistry {
    pub fn builder() -> ProcedureRegistryBuilder {
        ProcedureRegistryBuilder::default()
    }

    pub fn get_input_parser(&self, name: &str) -> Result<Arc<dyn InputParser>, OrchestrationError> {
        self.parsers
            .get(name)
            .map(|e| e.input.clone())
            .ok_or_else(|| OrchestrationError::UnknownProcedure(name.to_string()))
    }

    pub fn get_output_parser(&self, name: &str) -> Result<Arc<dyn OutputParser>, OrchestrationError> {
        self.parsers
            .get(name)
            .map(|e| e.output.clone())
            .ok_or_else(|| OrchestrationError::UnknownProcedure(name.to_string()))
    }
}

#[derive(Default)]
pub struct ProcedureRegistryBuilder {
    parsers: HashMap<String, ProcedureEntry>,
}

impl ProcedureRegistryBuilder {
    pub fn register(
        mut self,
        name: impl Into<String>,
        input: Arc<dyn InputParser>,
        output: Arc<dyn OutputParser>,
    ) -> Self {
        self.parsers.insert(name.into(), ProcedureEntry { input, output });
        self
    }

    pub fn build(self) -> ProcedureRegistry {
        ProcedureRegistry {
            parsers: self.parsers,
        }
    }
}

/// A durable, multi-step workflow state machine (§4.4). One instance lives
/// in memory per in-progress service record, reconstructed from its JSON
/// state blob on each `update_services()` tick.
#[async_trait]
pub trait ServiceMachine: Send + Sync {
    /// Serialize current state for persistence (§4.4 `get_json`).
    fn get_json(&self) -> Value;

    /// Advance one step: may submit new tasks through `nanny`, may read
    /// freshly-landed results from `store`, may mutate internal state.
    /// Returns whether the workflow has reached a terminal state.
    async fn iterate(
        &mut self,
        store: &dyn chem_shared::store::Store,
        nanny: &QueueNanny,
    ) -> Result<bool, OrchestrationError>;
}

/// Per service kind: how to build a fresh machine from an initial request,
/// and how to rebuild one from persisted state (§4.4 "Initialization").
#[async_trait]
pub trait ServiceKind: Send + Sync {
    /// Construct a brand-new machine for one input molecule.
    async fn initialize(
        &self,
        meta: Value,
        molecule: Molecule,
    ) -> Result<Box<dyn ServiceMachine>, OrchestrationError>;

    /// Reconstruct a machine from its persisted `get_json()` state.
    fn build(&self, state: Value) -> Result<Box<dyn ServiceMachine>, OrchestrationError>;
}

/// Registry of service kinds, built once and threaded into the nanny.
#[derive(Default)]
pub struct ServiceRegistry {
    kinds: HashMap<String, Arc<dyn ServiceKind>>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn ServiceKind>, OrchestrationError> {
        self.kinds
            .get(kind)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownServiceKind(kind.to_string()))
    }
}

#[derive(Default)]
pub struct ServiceRegistryBuilder {
    kinds: HashMap<String, Arc<dyn ServiceKind>>,
}

impl ServiceRegistryBuilder {
    pub fn register(mut self, name: impl Into<String>, kind: Arc<dyn ServiceKind>) -> Self {
        self.kinds.insert(name.into(), kind);
        self
    }

    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry { kinds: self.kinds }
    }
}
