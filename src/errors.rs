// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::BackendKind;

#[derive(Error, Debug)]
pub enum SimbatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Copying the base project into a fresh workspace failed. The partial
    /// workspace has already been discarded.
    #[error("workspace creation failed for job '{job}': {reason}")]
    WorkspaceCreation { job: String, reason: String },

    /// Batch-level: the engine could not be located, so no job is launched.
    #[error("engine unavailable for {backend} backend: {reason}")]
    EngineUnavailable { backend: BackendKind, reason: String },

    #[error("failed to launch engine for job '{job}': {reason}")]
    Launch { job: String, reason: String },

    #[error("could not rewrite {path:?}: {reason}")]
    Rewrite { path: PathBuf, reason: String },

    #[error("automation session error: {0}")]
    Automation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SimbatchError>;
