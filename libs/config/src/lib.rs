//! # Node Configuration
//!
//! Configuration loading and logging setup for a process hosting an actor
//! runtime behind a membrane.
//!
//! ## Features
//!
//! - **Node Settings**: membrane name, protocol and listen address
//! - **TCP Settings**: connect/write timeouts and frame size limit
//! - **Logging**: `tracing-subscriber` setup with env-filter and optional JSON
//!
//! ## Usage
//!
//! ```rust,no_run
//! use node_config::{init_logging, load_config};
//!
//! let config = load_config(None).unwrap();
//! init_logging(&config.logging).unwrap();
//! let local = config.transport_config().unwrap();
//! ```

pub mod logging;
pub mod node_config;

pub use logging::{init_logging, LoggingConfig};
pub use node_config::{load_config, NodeConfig, NodeSettings, ENV_PREFIX};
