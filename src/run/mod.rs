//! Run-owned configuration, manifest, and history schema.
//!
//! A run directory is the unit of ownership: every artifact a stage produces
//! lives beneath it, and `manifest.json` records which stages completed and
//! against which input fingerprints.
/// Current schema version for `config.json`.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `manifest.json`.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `history.jsonl`.
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

mod config;
mod history;
mod manifest;
mod paths;
mod types;

pub use config::{
    default_dispatch, default_thresholds, default_tools, load_config, validate_config,
    write_config, DEFAULT_SOLVER_COMMAND, MAX_CONCURRENCY,
};
pub use history::{append_history, read_history};
pub use manifest::{load_manifest, write_manifest, Fingerprint};
pub use paths::{ensure_run_root, RunPaths};
pub use types::*;
