//! # Domain Model
//!
//! Tagged Rust types replacing the dynamic JSON dicts of the original
//! design (§9 REDESIGN FLAGS). The wire layer (`crate::wire`) remains
//! JSON; these types are what the core actually operates on in memory.

pub mod hook;
pub mod locator;
pub mod molecule;
pub mod options;
pub mod procedure;
pub mod queue;
pub mod result;
pub mod result_payload;
pub mod service;
pub mod task_spec;

pub use hook::{HookAction, HookSpec};
pub use locator::{Locator, TableName};
pub use molecule::{Molecule, MoleculeId, MoleculeRef};
pub use options::OptionSet;
pub use procedure::{ProcedureId, ProcedureRecord};
pub use queue::{QueueEntry, QueueId, QueueStatus, TaskDescriptor};
pub use result::{ResultId, ResultRecord};
pub use result_payload::ResultPayload;
pub use service::{ServiceId, ServiceRecord};
pub use task_spec::TaskSpec;
