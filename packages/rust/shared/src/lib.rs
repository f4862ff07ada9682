//! Shared types, error model, and configuration for AgentSync.
//!
//! This crate is the foundation depended on by all other AgentSync crates.
//! It provides:
//! - [`AgentSyncError`]: the unified error type
//! - Domain types ([`AgencyCandidate`], [`AgentRecord`], [`SyncTaskHandle`], [`RunId`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DetectionConfig, ListingsConfig, PipelineConfig, ReconcilePolicy, RegistryConfig,
    StoreConfig, config_dir, config_file_path, init_config_at, load_config, load_config_from,
    resolve_credentials, store_base_url, validate_config,
};
pub use error::{AgentSyncError, Result};
pub use types::{
    AGENCY_RECORD_TYPE, AgencyCandidate, AgentRecord, Origin, PipelineStage, ReconcileResult,
    RunId, SyncTaskHandle,
};
