//! Utilities module for logging and error handling
//!
//! - Structured logging with tracing
//! - The crate-wide error type

pub mod error;
pub mod logging;

pub use error::{FinetuneError, Result};
pub use logging::{init_logging, EpochTimer, LogConfig};
