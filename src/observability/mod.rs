//! Observability module providing structured logging.
//!
//! This module initializes and configures the `tracing` subscriber with
//! configurable formats (pretty, compact, JSON) and `RUST_LOG` overrides.

mod tracing_init;

pub use tracing_init::*;
