//! Configuration for Strata tileset streaming.
//!
//! Settings persist to disk as RON and can be overridden from the command
//! line. Every section uses `#[serde(default)]`, so files written by older or
//! newer versions still load.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, StreamingConfig, TilesetConfig, ViewConfig, default_config_dir};
pub use error::ConfigError;
