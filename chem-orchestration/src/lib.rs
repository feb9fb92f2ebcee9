//! # chem-orchestration
//!
//! The task-and-service orchestration engine: procedure parsers, service
//! state machines, the queue nanny, and the two scheduler entry points that
//! together turn a `{meta, data}` request into durable results and
//! procedures (§1-§4).
//!
//! Everything else (domain types, the store contract, hashing, wire
//! shapes, configuration) lives in [`chem_shared`]; pluggable execution
//! backends live in [`chem_worker`].

pub mod orchestration;

pub use orchestration::{
    nanny::QueueNanny,
    registry::{
        InputParseOutcome, InputParser, OutputAbsorbOutcome, OutputParser, ProcedureRegistry,
        ServiceKind, ServiceMachine, ServiceRegistry,
    },
    scheduler::{QueueScheduler, ServiceScheduler},
    Engine,
};
