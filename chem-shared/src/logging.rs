//! # Structured Logging
//!
//! Initializes `tracing` with an env-filter subscriber, optionally emitting
//! JSON instead of the default human-readable format. Mirrors the teacher's
//! `logging::init_tracing()` entry point invoked once from each binary's
//! `main()` before anything else runs.

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter directive when `RUST_LOG` is unset: info-level for this
/// workspace's crates, warn-level for everything else.
const DEFAULT_FILTER: &str = "warn,chem_shared=info,chem_worker=info,chem_orchestration=info";

/// Initialize the global `tracing` subscriber.
///
/// Reads `RUST_LOG` if set, otherwise falls back to [`DEFAULT_FILTER`]. Set
/// `CHEM_LOG_FORMAT=json` to switch to structured JSON output (suitable for
/// log aggregation in a server deployment); any other value, or an unset
/// variable, keeps the human-readable format.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("CHEM_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    if json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
