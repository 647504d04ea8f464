//! Shared types, error model, and configuration for AIBridge.
//!
//! This crate is the foundation depended on by all other AIBridge crates.
//! It provides:
//! - [`AiBridgeError`]: the unified error type
//! - Domain types ([`WorkItem`], [`TranslationRecord`], [`RecordStatus`], [`Checkpoint`])
//! - Configuration ([`AppConfig`], [`ProviderConfig`], [`ModelParams`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendKind, DEFAULT_PROMPT_TEMPLATE, DefaultsConfig, ModelParams, ProviderConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{AiBridgeError, Result};
pub use types::{Checkpoint, RecordStatus, TranslationRecord, WorkItem, mask_credential};
