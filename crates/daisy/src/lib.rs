//! Demo server and client for the daisy RPC runtime, plus their shared configuration.

pub mod config;
pub mod logging;
pub mod schema;
pub mod services;

pub use config::{ConfigError, DaisyConfig, LoggingConfig};
pub use logging::init_tracing;
