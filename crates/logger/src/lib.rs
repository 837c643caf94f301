//! Tracing setup shared by the ProbeMesh binaries and tests.
//!
//! The filter comes from `RUST_LOG` (INFO when unset). `RUST_LOG_FORMAT=json`
//! switches to one JSON object per line; anything else gives compact lines
//! without timestamps.

mod subscriber;

pub use subscriber::{LogFormat, init, init_with_level, try_init};
