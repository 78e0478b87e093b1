//! Configuration loading, validation, and env substitution.
//!
//! Config files: `parley.toml`, `parley.yaml`, or `parley.json`
//! Searched in `./` then `~/.config/parley/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, config_dir, discover_and_load, find_config_file,
        load_config, set_config_dir,
    },
    schema::{
        AgentConfig, ChatConfig, DropPolicy, MessageQueueMode, MetricsConfig, ParleyConfig,
        QueueConfig, RunsConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
