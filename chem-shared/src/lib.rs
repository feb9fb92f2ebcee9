//! # chem-shared
//!
//! Domain types, the store contract, content-addressed hashing, wire
//! shapes, layered configuration, structured logging, and resilience
//! primitives shared by every crate in the chem orchestration workspace.
//!
//! This crate carries no orchestration *behavior* — that lives in
//! `chem-orchestration` — it only fixes the vocabulary the rest of the
//! workspace agrees on.

pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod model;
pub mod resilience;
pub mod store;
pub mod wire;

pub use error::{OrchestrationError, OrchestrationResult};
