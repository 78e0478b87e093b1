//! Metric name and label definitions.
//!
//! This module defines all metric names and common label keys used throughout parley.
//! Centralizing these definitions ensures consistency and makes it easier to document
//! what metrics are available.

/// Inbound pipeline metrics
pub mod auto_reply {
    /// Total messages received for processing
    pub const MESSAGES_RECEIVED_TOTAL: &str = "parley_auto_reply_messages_received_total";
    /// Ingestion duration in seconds (directive parsing + queue decision)
    pub const PROCESSING_DURATION_SECONDS: &str = "parley_auto_reply_processing_duration_seconds";
    /// Backlog length observed after each enqueue
    pub const QUEUE_SIZE: &str = "parley_auto_reply_queue_size";
    /// Messages dropped due to the drop policy
    pub const MESSAGES_DROPPED_TOTAL: &str = "parley_auto_reply_messages_dropped_total";
    /// Inline directives recognized, by kind
    pub const DIRECTIVES_TOTAL: &str = "parley_auto_reply_directives_total";
    /// Queue decisions, by action
    pub const QUEUE_ACTIONS_TOTAL: &str = "parley_auto_reply_queue_actions_total";
    /// Debounce windows flushed, by trigger (quiet, cap, age)
    pub const DEBOUNCE_FLUSHES_TOTAL: &str = "parley_auto_reply_debounce_flushes_total";
    /// Live injections attempted, by result
    pub const LIVE_INJECTIONS_TOTAL: &str = "parley_auto_reply_live_injections_total";
}

/// Agent run lifecycle metrics
pub mod runs {
    /// Total runs started
    pub const STARTED_TOTAL: &str = "parley_runs_started_total";
    /// Total runs settled, by outcome (completed, failed, cancelled)
    pub const SETTLED_TOTAL: &str = "parley_runs_settled_total";
    /// Cancellation requests that hit an active run
    pub const ABORTS_TOTAL: &str = "parley_runs_aborts_total";
    /// Run duration in seconds
    pub const DURATION_SECONDS: &str = "parley_run_duration_seconds";
    /// Number of currently active runs
    pub const ACTIVE: &str = "parley_runs_active";
}

/// Session registry metrics
pub mod session {
    /// Total number of sessions created
    pub const CREATED_TOTAL: &str = "parley_sessions_created_total";
    /// Number of sessions currently tracked
    pub const ACTIVE: &str = "parley_sessions_active";
}

/// Common label keys used across metrics
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const MODE: &str = "mode";
    pub const ACTION: &str = "action";
    pub const POLICY: &str = "policy";
    pub const OUTCOME: &str = "outcome";
    pub const TRIGGER: &str = "trigger";
    pub const KIND: &str = "kind";
    pub const SUCCESS: &str = "success";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Ingestion duration buckets (in seconds)
    /// Covers 10µs to 1s
    pub static INGEST_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
        ]
    });

    /// Agent run duration buckets (in seconds)
    /// Covers 100ms to 10 minutes (agent runs can be slow)
    pub static RUN_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ]
    });

    /// Queue size buckets
    /// Covers 1 to 1000
    pub static QUEUE_SIZE: Lazy<Vec<f64>> =
        Lazy::new(|| vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 1000.0]);
}
