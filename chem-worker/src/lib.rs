//! # chem-worker
//!
//! Backend adapters bridging the orchestration core to pluggable external
//! compute backends (§4.3, §6.3). The core only ever talks to the
//! [`BackendAdapter`] trait object; concrete backends (a distributed-worker
//! framework, a workflow-manager launchpad, or the in-memory `MockAdapter`
//! used by tests) live behind it.

pub mod adapter;

pub use adapter::{
    build_adapter, BackendAdapter, Completion, DistributedWorkerAdapter, MockAdapter,
    WorkflowManagerAdapter,
};
