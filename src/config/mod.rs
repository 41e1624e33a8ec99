//! Node Configuration Module
//!
//! Sensor lists, intervals, broker and queue settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `ROTOR_CONFIG` environment variable (path to TOML file)
//! 3. `node_config.toml` in the current working directory
//! 4. Built-in defaults (no sensors configured)
//!
//! ## Usage
//!
//! The loaded config is wrapped in a [`SharedConfig`] so the pipeline can
//! swap it at runtime:
//!
//! ```ignore
//! let (config, source) = NodeConfig::load(cli.config.as_deref())?;
//! let shared = config::shared(config);
//! let device = shared.load().device_id.clone();
//! ```

mod node_config;
pub mod defaults;
pub mod validation;

pub use node_config::*;

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Live configuration; readers take a cheap snapshot with `load()`
pub type SharedConfig = Arc<ArcSwap<NodeConfig>>;

pub fn shared(config: NodeConfig) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}
