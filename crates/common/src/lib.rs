//! Inbound message types shared by the parley crates.

pub mod types;
