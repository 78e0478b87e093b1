use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    schema::{DropPolicy, MessageQueueMode, ParleyConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parley.toml", "parley.yaml", "parley.yml", "parley.json"];

static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Override the user-global config directory (e.g. from `--config-dir`).
pub fn set_config_dir(dir: PathBuf) {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.write() {
        *guard = Some(dir);
    }
}

/// Remove a directory override installed by [`set_config_dir`].
pub fn clear_config_dir() {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.write() {
        *guard = None;
    }
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ParleyConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parley.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/parley/parley.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ParleyConfig::default()` if no config file is found.
pub fn discover_and_load() -> ParleyConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    ParleyConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/parley/`), or the
/// override set via [`set_config_dir`].
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(guard) = CONFIG_DIR_OVERRIDE.read()
        && let Some(dir) = guard.as_ref()
    {
        return Some(dir.clone());
    }
    directories::ProjectDirs::from("", "", "parley").map(|d| d.config_dir().to_path_buf())
}

/// Apply `PARLEY_QUEUE_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut ParleyConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut ParleyConfig, lookup: impl Fn(&str) -> Option<String>) {
    let queue = &mut config.chat.queue;

    if let Some(raw) = lookup("PARLEY_QUEUE_MODE") {
        match raw.parse::<MessageQueueMode>() {
            Ok(mode) => queue.mode = mode,
            Err(e) => warn!(error = %e, "ignoring PARLEY_QUEUE_MODE"),
        }
    }
    if let Some(raw) = lookup("PARLEY_QUEUE_DEBOUNCE_MS") {
        match raw.trim().parse::<u64>() {
            Ok(ms) => queue.debounce_ms = ms,
            Err(e) => warn!(error = %e, "ignoring PARLEY_QUEUE_DEBOUNCE_MS"),
        }
    }
    if let Some(raw) = lookup("PARLEY_QUEUE_CAP") {
        match raw.trim().parse::<usize>() {
            Ok(cap) if cap >= 1 => queue.cap = cap,
            Ok(_) => warn!("ignoring PARLEY_QUEUE_CAP: must be at least 1"),
            Err(e) => warn!(error = %e, "ignoring PARLEY_QUEUE_CAP"),
        }
    }
    if let Some(raw) = lookup("PARLEY_QUEUE_DROP") {
        match raw.parse::<DropPolicy>() {
            Ok(drop) => queue.drop = drop,
            Err(e) => warn!(error = %e, "ignoring PARLEY_QUEUE_DROP"),
        }
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ParleyConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("parley.toml");
        std::fs::write(&toml_path, "[chat.queue]\nmode = \"interrupt\"\ncap = 3\n").unwrap();
        let cfg = load_config(&toml_path).unwrap();
        assert_eq!(cfg.chat.queue.mode, MessageQueueMode::Interrupt);
        assert_eq!(cfg.chat.queue.cap, 3);

        let yaml_path = dir.path().join("parley.yaml");
        std::fs::write(&yaml_path, "chat:\n  queue:\n    drop: new\n").unwrap();
        let cfg = load_config(&yaml_path).unwrap();
        assert_eq!(cfg.chat.queue.drop, DropPolicy::New);

        let json_path = dir.path().join("parley.json");
        std::fs::write(&json_path, r#"{"agent": {"id": "ops"}}"#).unwrap();
        let cfg = load_config(&json_path).unwrap();
        assert_eq!(cfg.agent.id, "ops");
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.ini");
        std::fs::write(&path, "").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn env_overrides_apply_and_skip_invalid() {
        let mut cfg = ParleyConfig::default();
        apply_env_overrides_with(&mut cfg, |name| match name {
            "PARLEY_QUEUE_MODE" => Some("steer-backlog".into()),
            "PARLEY_QUEUE_DEBOUNCE_MS" => Some("250".into()),
            "PARLEY_QUEUE_CAP" => Some("0".into()),
            "PARLEY_QUEUE_DROP" => Some("bogus".into()),
            _ => None,
        });
        assert_eq!(cfg.chat.queue.mode, MessageQueueMode::SteerBacklog);
        assert_eq!(cfg.chat.queue.debounce_ms, 250);
        assert_eq!(cfg.chat.queue.cap, 20);
        assert_eq!(cfg.chat.queue.drop, DropPolicy::Summarize);
    }
}
