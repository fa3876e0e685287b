//! # Feedpipe Library
//!
//! This library exposes the feedpipe modules for testing and integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod cli;
pub mod pipeline;
pub mod plan;

// Re-export the member crates for convenience
pub use feedpipe_client;
pub use feedpipe_core;
