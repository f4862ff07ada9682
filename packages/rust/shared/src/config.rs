//! Application configuration for AgentSync.
//!
//! User config lives at `~/.agentsync/agentsync.toml`.
//! A `--config` path overrides the default location; missing files fall back
//! to defaults for every field.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AgentSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "agentsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".agentsync";

// ---------------------------------------------------------------------------
// Config structs (matching agentsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Document store connection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Listings collection and the fields the pipeline touches.
    #[serde(default)]
    pub listings: ListingsConfig,

    /// Agency detection thresholds.
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Agency registry collection.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the OpenSearch-compatible store.
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Basic-auth user. No auth header is sent when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Name of the env var holding the password (never store the password itself).
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Verify the store's TLS certificate.
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            username: None,
            password_env: default_password_env(),
            verify_tls: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_store_url() -> String {
    "https://localhost:9200".into()
}
fn default_password_env() -> String {
    "AGENTSYNC_STORE_PASSWORD".into()
}
fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[listings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingsConfig {
    /// Listings index name.
    #[serde(default = "default_listings_index")]
    pub index: String,

    /// Keyword field holding the normalized contact phone.
    #[serde(default = "default_contact_field")]
    pub contact_field: String,

    /// Source field with the poster's display name.
    #[serde(default = "default_name_field")]
    pub name_field: String,

    /// Source field with the listing platform.
    #[serde(default = "default_source_field")]
    pub source_field: String,

    /// Boolean field set on listings owned by an agency.
    #[serde(default = "default_flag_field")]
    pub flag_field: String,
}

impl Default for ListingsConfig {
    fn default() -> Self {
        Self {
            index: default_listings_index(),
            contact_field: default_contact_field(),
            name_field: default_name_field(),
            source_field: default_source_field(),
            flag_field: default_flag_field(),
        }
    }
}

fn default_listings_index() -> String {
    "listings".into()
}
fn default_contact_field() -> String {
    "decrypted_phone.keyword".into()
}
fn default_name_field() -> String {
    "user_name".into()
}
fn default_source_field() -> String {
    "ad_source".into()
}
fn default_flag_field() -> String {
    "is_agency".into()
}

/// `[detection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minimum listings per contact for it to count as an agency.
    #[serde(default = "default_min_listing_count")]
    pub min_listing_count: u32,

    /// Maximum number of aggregation buckets requested.
    #[serde(default = "default_bucket_cap")]
    pub bucket_cap: u32,

    /// Contact values that mean "no usable contact" (case-insensitive).
    #[serde(default = "default_ignored_contacts")]
    pub ignored_contacts: Vec<String>,

    /// Name used when the sampled listing has none.
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_listing_count: default_min_listing_count(),
            bucket_cap: default_bucket_cap(),
            ignored_contacts: default_ignored_contacts(),
            placeholder_name: default_placeholder_name(),
        }
    }
}

fn default_min_listing_count() -> u32 {
    5
}
fn default_bucket_cap() -> u32 {
    10_000
}
fn default_ignored_contacts() -> Vec<String> {
    vec!["N/A".into(), "unknown".into()]
}
fn default_placeholder_name() -> String {
    "Unknown Agency".into()
}

/// How auto-detected records treat an existing record with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Replace the whole document, manual or not.
    #[default]
    Overwrite,
    /// Read first; manual records only get their count and timestamp refreshed.
    PreserveManual,
}

/// `[registry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry index name.
    #[serde(default = "default_registry_index")]
    pub index: String,

    /// Reconciliation policy against manually curated records.
    #[serde(default)]
    pub policy: ReconcilePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            index: default_registry_index(),
            policy: ReconcilePolicy::default(),
        }
    }
}

fn default_registry_index() -> String {
    "agents".into()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, derived from the app config)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration handed to the orchestrator at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub listings: ListingsConfig,
    pub detection: DetectionConfig,
    pub registry: RegistryConfig,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            listings: config.listings.clone(),
            detection: config.detection.clone(),
            registry: config.registry.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.agentsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AgentSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.agentsync/agentsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AgentSyncError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        AgentSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| AgentSyncError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| AgentSyncError::config(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| AgentSyncError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

/// Reject configs the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    store_base_url(&config.store)?;

    if config.detection.min_listing_count == 0 {
        return Err(AgentSyncError::config(
            "detection.min_listing_count must be at least 1",
        ));
    }
    if config.detection.bucket_cap == 0 {
        return Err(AgentSyncError::config("detection.bucket_cap must be at least 1"));
    }
    for (key, value) in [
        ("listings.index", &config.listings.index),
        ("listings.contact_field", &config.listings.contact_field),
        ("listings.flag_field", &config.listings.flag_field),
        ("registry.index", &config.registry.index),
    ] {
        if value.trim().is_empty() {
            return Err(AgentSyncError::config(format!("{key} must not be empty")));
        }
    }
    if config.listings.index == config.registry.index {
        return Err(AgentSyncError::config(
            "registry.index must differ from listings.index",
        ));
    }
    Ok(())
}

/// Parse the configured store URL.
pub fn store_base_url(store: &StoreConfig) -> Result<Url> {
    let url = Url::parse(&store.url)
        .map_err(|e| AgentSyncError::config(format!("invalid store url '{}': {e}", store.url)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AgentSyncError::config(format!(
            "store url must be http or https, got '{other}'"
        ))),
    }
}

/// Resolve basic-auth credentials from the config and environment.
///
/// Returns `None` when no username is configured. A configured username with
/// an unset password variable is an error.
pub fn resolve_credentials(store: &StoreConfig) -> Result<Option<(String, String)>> {
    let Some(username) = store.username.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(None);
    };

    let var_name = &store.password_env;
    match std::env::var(var_name) {
        Ok(password) if !password.is_empty() => Ok(Some((username.to_string(), password))),
        _ => Err(AgentSyncError::config(format!(
            "store password not found. Set the {var_name} environment variable."
        ))),
    }
}
