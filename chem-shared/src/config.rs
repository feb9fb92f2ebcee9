//! # Layered Configuration
//!
//! A configuration struct loaded via the `config` crate from an optional
//! TOML file plus environment overrides, mirroring the teacher's layered
//! `TaskerConfig` / `CommonConfig` split: a queue-naming block, a nanny
//! tuning block, and a backend-adapter selector block.

use crate::error::OrchestrationError;
use serde::{Deserialize, Serialize};

/// Queue-naming configuration. Distinct request/response queue names let one
/// store back several logically separate orchestration deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// Namespace prefix applied to queue names (diagnostics/logging only —
    /// the in-memory/document store keyed by this crate does not itself
    /// partition by namespace).
    pub namespace: String,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            namespace: "chem".to_string(),
        }
    }
}

/// Tuning knobs for the queue nanny (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NannyConfig {
    /// The adapter concurrency cap (§4.5 `max_tasks`).
    pub max_tasks: usize,
    /// How often a background poller should call `update()` /
    /// `update_services()` when running the nanny unattended (e.g. from the
    /// `serve` CLI subcommand). Request-triggered calls to `submit_tasks`
    /// still call `update()` inline regardless of this interval.
    pub poll_interval_ms: u64,
    /// Cap on `await_services`'s iteration count (§4.5).
    pub max_service_await_iterations: usize,
}

impl Default for NannyConfig {
    fn default() -> Self {
        Self {
            max_tasks: 1000,
            poll_interval_ms: 500,
            max_service_await_iterations: 10,
        }
    }
}

/// Which concrete [`chem_worker`]-crate adapter to construct (§6.3).
///
/// Unknown selectors are a fatal configuration error (§7) — see
/// [`AdapterSelection::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterSelection {
    /// The distributed-worker (futures-style) backend.
    Distributed,
    /// The workflow-manager (pollable launchpad) backend.
    WorkflowManager,
    /// The in-memory, deterministic backend used by tests.
    Mock,
}

impl AdapterSelection {
    pub fn parse(queue_type: &str) -> Result<Self, OrchestrationError> {
        match queue_type {
            "distributed" | "dask" | "parsl" => Ok(AdapterSelection::Distributed),
            "workflow_manager" | "fireworks" => Ok(AdapterSelection::WorkflowManager),
            "mock" => Ok(AdapterSelection::Mock),
            other => Err(OrchestrationError::UnknownEnumValue {
                field: "queue_type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Per-adapter tuning, keyed loosely enough to serve either concrete
/// adapter kind without the config layer needing to know which one a given
/// deployment picked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub queue_type: String,
    /// Poll interval for the workflow-manager adapter's launchpad check.
    pub poll_interval_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            queue_type: "mock".to_string(),
            poll_interval_ms: 250,
        }
    }
}

/// Top-level, layered configuration for the orchestration service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChemConfig {
    pub queues: QueuesConfig,
    pub nanny: NannyConfig,
    pub adapter: AdapterConfig,
}

impl ChemConfig {
    /// Load configuration from (in ascending precedence order):
    /// 1. built-in defaults,
    /// 2. an optional TOML file at `path` (if it exists),
    /// 3. environment variables prefixed `CHEM_`, double-underscore
    ///    separated (e.g. `CHEM_NANNY__MAX_TASKS=500`).
    pub fn load(path: Option<&str>) -> Result<Self, OrchestrationError> {
        let defaults =
            config::Config::try_from(&ChemConfig::default()).map_err(|e| {
                OrchestrationError::Config(format!("failed to seed config defaults: {e}"))
            })?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("CHEM")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| OrchestrationError::Config(format!("failed to build config: {e}")))?;

        raw.try_deserialize()
            .map_err(|e| OrchestrationError::Config(format!("failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_nanny_defaults() {
        let config = ChemConfig::default();
        assert_eq!(config.nanny.max_tasks, 1000);
        assert_eq!(config.nanny.max_service_await_iterations, 10);
    }

    #[test]
    fn adapter_selection_parses_known_aliases() {
        assert_eq!(
            AdapterSelection::parse("dask").unwrap(),
            AdapterSelection::Distributed
        );
        assert_eq!(
            AdapterSelection::parse("fireworks").unwrap(),
            AdapterSelection::WorkflowManager
        );
        assert_eq!(AdapterSelection::parse("mock").unwrap(), AdapterSelection::Mock);
    }

    #[test]
    fn adapter_selection_rejects_unknown_queue_type() {
        let err = AdapterSelection::parse("bogus").unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownEnumValue { .. }));
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let config = ChemConfig::load(Some("/nonexistent/path/chem.toml")).unwrap();
        assert_eq!(config.nanny.max_tasks, 1000);
        assert_eq!(config.queues.namespace, "chem");
    }
}
