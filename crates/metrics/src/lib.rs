//! Metrics collection and export for parley.
//!
//! This crate provides a unified metrics interface using the `metrics` crate facade.
//! When the `prometheus` feature is enabled, metrics are exported in Prometheus format.
//!
//! # Usage
//!
//! ```rust,ignore
//! use parley_metrics::{auto_reply, counter, labels};
//!
//! counter!(auto_reply::MESSAGES_RECEIVED_TOTAL, labels::CHANNEL => "telegram").increment(1);
//! ```
//!
//! # Features
//!
//! - `prometheus`: Enable Prometheus text rendering via [`MetricsHandle::render`]

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
