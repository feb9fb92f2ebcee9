//! Hooks: deferred side effects fired once a queue entry's result lands in
//! durable storage (§4.7).

use crate::model::locator::Locator;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A declarative follow-up action attached to a queue entry. The concrete
/// action semantics are owned by the store (§4.7, §9 Open Questions) — the
/// core only propagates the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSpec {
    pub action: Value,
}

/// A hook bound to the locator of the record that just materialized.
/// Produced by an output parser and handed to the store as a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookAction {
    pub hook: HookSpec,
    pub locator: Locator,
}
