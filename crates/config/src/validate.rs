//! Configuration validation engine.
//!
//! Validates TOML configuration files against the known schema, detects
//! unknown/misspelled fields, and reports queue settings that can't work.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::schema::{MessageQueueMode, ParleyConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "queue", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "chat.queue.cap"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn error(category: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            path: path.into(),
            message: message.into(),
        }
    }

    fn warning(category: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(category, path, message)
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    fn single(diagnostic: Diagnostic, config_path: Option<PathBuf>) -> Self {
        Self {
            diagnostics: vec![diagnostic],
            config_path,
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// A map with dynamic keys whose values have a known shape.
    Map(Box<KnownKeys>),
    /// Scalar value, recursion stops here.
    Leaf,
}

/// Build the full schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    Struct(HashMap::from([
        ("agent", Struct(HashMap::from([("id", Leaf)]))),
        (
            "chat",
            Struct(HashMap::from([
                (
                    "queue",
                    Struct(HashMap::from([
                        ("mode", Leaf),
                        ("debounce_ms", Leaf),
                        ("max_wait_ms", Leaf),
                        ("cap", Leaf),
                        ("drop", Leaf),
                        ("by_channel", Map(Box::new(Leaf))),
                    ])),
                ),
                (
                    "runs",
                    Struct(HashMap::from([
                        ("wait_timeout_ms", Leaf),
                        ("prune_idle_sessions", Leaf),
                    ])),
                ),
            ])),
        ),
        (
            "metrics",
            Struct(HashMap::from([
                ("enabled", Leaf),
                ("labels", Map(Box::new(Leaf))),
            ])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Find the best match for `needle` among `candidates` using Levenshtein
/// distance. Returns `Some(best)` if the distance is <= `max_distance`.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one when
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(config_path) = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file)
    else {
        return ValidationResult::single(
            Diagnostic {
                severity: Severity::Info,
                ..Diagnostic::error("file-ref", "", "no config file found; using defaults")
            },
            None,
        );
    };

    let content = match std::fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) => {
            return ValidationResult::single(
                Diagnostic::error("file-ref", "", format!("failed to read config file: {e}")),
                Some(config_path),
            );
        },
    };

    let ext = config_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml");
    let mut result = if ext == "toml" {
        validate_toml_str(&content)
    } else {
        // YAML/JSON: schema walking is TOML-only, but the load path still runs.
        match crate::loader::load_config(&config_path) {
            Ok(config) => {
                let mut diagnostics = Vec::new();
                check_queue_settings(&config, &mut diagnostics);
                ValidationResult {
                    diagnostics,
                    config_path: None,
                }
            },
            Err(e) => ValidationResult::single(Diagnostic::error("syntax", "", format!("{e:#}")), None),
        }
    };
    result.config_path = Some(config_path);
    result
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            return ValidationResult::single(
                Diagnostic::error("syntax", "", format!("TOML syntax error: {e}")),
                None,
            );
        },
    };

    let mut diagnostics = Vec::new();
    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    match toml::from_str::<ParleyConfig>(toml_str) {
        Ok(config) => check_queue_settings(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::error("type-error", "", format!("type error: {e}"))),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let toml::Value::Table(table) = value else {
        return;
    };
    match schema {
        KnownKeys::Struct(fields) => {
            let known: Vec<&str> = fields.keys().copied().collect();
            for (key, child) in table {
                let path = join_path(prefix, key);
                match fields.get(key.as_str()) {
                    Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
                    None => {
                        let message = match suggest(key, &known, 3) {
                            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                            None => "unknown field".to_string(),
                        };
                        diagnostics.push(Diagnostic::error("unknown-field", path, message));
                    },
                }
            }
        },
        KnownKeys::Map(value_schema) => {
            for (key, child) in table {
                check_unknown_fields(child, value_schema, &join_path(prefix, key), diagnostics);
            }
        },
        KnownKeys::Leaf => {},
    }
}

fn check_queue_settings(config: &ParleyConfig, diagnostics: &mut Vec<Diagnostic>) {
    let queue = &config.chat.queue;

    if queue.cap == 0 {
        diagnostics.push(Diagnostic::error("queue", "chat.queue.cap", "cap must be at least 1"));
    }

    let collect_paths = std::iter::once(("chat.queue.mode".to_string(), queue.mode))
        .chain(
            queue
                .by_channel
                .iter()
                .map(|(channel, mode)| (format!("chat.queue.by_channel.{channel}"), *mode)),
        )
        .filter(|(_, mode)| *mode == MessageQueueMode::Collect)
        .map(|(path, _)| path);
    if queue.debounce_ms == 0 {
        for path in collect_paths {
            diagnostics.push(Diagnostic::warning(
                "queue",
                path,
                "collect mode with debounce_ms = 0 flushes every message immediately",
            ));
        }
    }

    if queue.max_wait_ms > 0 && queue.max_wait_ms < queue.debounce_ms {
        diagnostics.push(Diagnostic::warning(
            "queue",
            "chat.queue.max_wait_ms",
            format!(
                "max_wait_ms ({}) is shorter than debounce_ms ({}); batches flush on age alone",
                queue.max_wait_ms, queue.debounce_ms
            ),
        ));
    }

    if config.chat.runs.wait_timeout_ms == 0 {
        diagnostics.push(Diagnostic::warning(
            "queue",
            "chat.runs.wait_timeout_ms",
            "wait_timeout_ms = 0 makes every wait return immediately",
        ));
    }

    if config.agent.id.trim().is_empty() {
        diagnostics.push(Diagnostic::error("type-error", "agent.id", "agent id must not be empty"));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", ""), 0);
    }

    #[test]
    fn levenshtein_single_edit() {
        assert_eq!(levenshtein("queue", "queu"), 1);
        assert_eq!(levenshtein("cat", "car"), 1);
        assert_eq!(levenshtein("debunce_ms", "debounce_ms"), 1);
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_toml_str("");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let result = validate_toml_str("[chat.queue]\ndebunce_ms = 10\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field" && d.path == "chat.queue.debunce_ms")
            .unwrap();
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains("debounce_ms"), "{}", d.message);
    }

    #[test]
    fn unknown_top_level_key() {
        let result = validate_toml_str("chats = 1\n");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "chats" && d.message.contains("chat"))
        );
    }

    #[test]
    fn by_channel_keys_are_dynamic() {
        let result = validate_toml_str("[chat.queue.by_channel]\nanything = \"collect\"\n");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn bad_mode_is_type_error() {
        let result = validate_toml_str("[chat.queue]\nmode = \"sometimes\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn zero_cap_is_error() {
        let result = validate_toml_str("[chat.queue]\ncap = 0\n");
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "chat.queue.cap")
        );
    }

    #[test]
    fn collect_without_debounce_warns() {
        let result = validate_toml_str("[chat.queue]\nmode = \"collect\"\ndebounce_ms = 0\n");
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(!result.has_errors());
    }

    #[test]
    fn collect_channel_without_debounce_points_at_channel() {
        let result = validate_toml_str(
            "[chat.queue]\ndebounce_ms = 0\n[chat.queue.by_channel]\ntelegram = \"collect\"\n",
        );
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.severity == Severity::Warning
                    && d.path == "chat.queue.by_channel.telegram")
        );
    }

    #[test]
    fn validates_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.yaml");
        std::fs::write(&path, "chat:\n  queue:\n    cap: 0\n").unwrap();
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert!(result.diagnostics.iter().any(|d| d.path == "chat.queue.cap"));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = validate(Some(&dir.path().join("nope.toml")));
        assert!(result.has_errors());
    }

    #[test]
    fn syntax_error_detected() {
        let result = validate_toml_str("[chat\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "syntax"));
    }
}
