// src/config/mod.rs

//! Configuration loading and validation for cachedag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate references and property shapes (`validate.rs`).
//! - Build the task graph and engine options (`convert.rs`).

pub mod convert;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    config_root_dir, default_config_path, load_and_validate, load_from_path, parse_and_validate,
};
pub use model::{
    CacheSection, ConfigFile, EngineSection, PropertyConfig, RawConfigFile, RemoteCacheSection,
    TaskConfig,
};
