// src/config/mod.rs

//! Configuration loading and validation for simbatch.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it before anything runs (`validate.rs`).
//! - Derive the runtime components' settings (`settings.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod settings;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, EngineSection, HarvestSection, JobConfig, MonitorSection,
    RawConfigFile, WorkspaceSection,
};
