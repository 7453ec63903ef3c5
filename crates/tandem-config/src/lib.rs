//! Configuration system for Tandem sessions.
//!
//! Provides runtime-configurable settings that persist to disk as RON files.
//! Supports CLI overrides via clap, hot-reload detection, range validation,
//! and forward/backward compatible serialization.

mod cli;
mod config;
mod entity;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, NetworkConfig, ParticipantConfig, SessionConfig, default_config_dir,
};
pub use entity::{EntityConfig, PositionMode, RotationMode};
pub use error::ConfigError;
