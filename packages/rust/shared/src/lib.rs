//! Shared types, error model, and configuration for assetmirror.
//!
//! This crate is the foundation depended on by all other assetmirror crates.
//! It provides:
//! - [`MirrorError`]: the unified error type
//! - Domain types ([`Session`], [`NamespacePath`], [`SnapshotKind`])
//! - Configuration ([`AppConfig`], [`MirrorConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConfigOverrides, ConnectionConfig, Credentials, MirrorConfig, MirrorDefaults,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{MirrorError, Result};
pub use types::{NamespacePath, Session, SnapshotKind, local_relative_path};
