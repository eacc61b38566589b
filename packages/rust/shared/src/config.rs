//! Application configuration for assetmirror.
//!
//! User config lives at `~/.assetmirror/assetmirror.toml`.
//! Environment variables and CLI flags override config file values, which
//! override defaults. The merged result is a [`MirrorConfig`], built once at
//! startup and passed down to every component.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{MirrorError, Result};
use crate::types::NamespacePath;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "assetmirror.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".assetmirror";

// ---------------------------------------------------------------------------
// Config structs (matching assetmirror.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote endpoint and logon identity.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Traversal settings.
    #[serde(default)]
    pub mirror: MirrorDefaults,
}

/// `[connection]` section. The password is deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Service endpoint URL (all requests are POSTed here).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Authentication domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Logon user name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            domain: None,
            username: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// `[mirror]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorDefaults {
    /// Namespace the mirror starts from.
    #[serde(default)]
    pub base_namespace: String,

    /// Local directory snapshots are written under.
    #[serde(default = "default_output_root")]
    pub output_root: String,

    /// Records requested per enumeration page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Optional ceiling on records requested per namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,

    /// Maximum namespace and child-asset recursion depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Assets retrieved concurrently within one namespace.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Issue a second retrieval for the metadata snapshot instead of reusing
    /// the content response.
    #[serde(default)]
    pub separate_metadata_fetch: bool,

    /// Dump each asset element as JSON under `json/`, both enumerated assets
    /// and child assets reached through retrieval.
    #[serde(default)]
    pub record_elements: bool,

    /// Overall deadline for a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
}

impl Default for MirrorDefaults {
    fn default() -> Self {
        Self {
            base_namespace: String::new(),
            output_root: default_output_root(),
            page_size: default_page_size(),
            max_results: None,
            max_depth: default_max_depth(),
            concurrency: default_concurrency(),
            separate_metadata_fetch: false,
            record_elements: false,
            run_timeout_secs: None,
        }
    }
}

fn default_output_root() -> String {
    "downloaded_assets".into()
}
fn default_page_size() -> usize {
    10_000
}
fn default_max_depth() -> u32 {
    64
}
fn default_concurrency() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Runtime config (merged from file + env + CLI flags)
// ---------------------------------------------------------------------------

/// Logon credentials. `Debug` redacts the password.
#[derive(Clone)]
pub struct Credentials {
    /// Authentication domain.
    pub domain: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Values supplied on the command line or through the environment.
/// `None` keeps whatever the config file (or default) says.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub endpoint: Option<String>,
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_namespace: Option<String>,
    pub output_root: Option<PathBuf>,
    pub page_size: Option<usize>,
    pub max_results: Option<usize>,
    pub max_depth: Option<u32>,
    pub concurrency: Option<u32>,
    pub separate_metadata_fetch: Option<bool>,
    pub record_elements: Option<bool>,
    pub request_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
}

/// Fully resolved configuration for one mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Service endpoint.
    pub endpoint: Url,
    /// Logon credentials.
    pub credentials: Credentials,
    /// Namespace the mirror starts from.
    pub base_namespace: NamespacePath,
    /// Local output root.
    pub output_root: PathBuf,
    /// Records requested per enumeration page.
    pub page_size: usize,
    /// Optional ceiling on records requested per namespace.
    pub max_results: Option<usize>,
    /// Maximum recursion depth.
    pub max_depth: u32,
    /// Concurrent asset retrievals per namespace.
    pub concurrency: u32,
    /// Fetch metadata with its own retrieval.
    pub separate_metadata_fetch: bool,
    /// Dump enumerated and child asset elements as JSON.
    pub record_elements: bool,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Overall run deadline.
    pub run_timeout: Option<Duration>,
}

impl MirrorConfig {
    /// Merge the file config with overrides and validate the result.
    pub fn resolve(config: &AppConfig, overrides: ConfigOverrides) -> Result<Self> {
        let endpoint = overrides
            .endpoint
            .or_else(|| config.connection.endpoint.clone())
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                MirrorError::config("no endpoint configured. Set ENDPOINT_URL or [connection].endpoint")
            })?;
        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| MirrorError::config(format!("invalid endpoint '{endpoint}': {e}")))?;

        let user = overrides
            .username
            .or_else(|| config.connection.username.clone())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| MirrorError::config("no username configured. Set USERNAME"))?;
        let password = overrides
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| MirrorError::config("no password supplied. Set PASSWORD"))?;
        let domain = overrides
            .domain
            .or_else(|| config.connection.domain.clone())
            .unwrap_or_default();

        let mirror = &config.mirror;
        let resolved = Self {
            endpoint,
            credentials: Credentials {
                domain,
                user,
                password,
            },
            base_namespace: NamespacePath::new(
                overrides
                    .base_namespace
                    .unwrap_or_else(|| mirror.base_namespace.clone()),
            ),
            output_root: overrides
                .output_root
                .unwrap_or_else(|| PathBuf::from(&mirror.output_root)),
            page_size: overrides.page_size.unwrap_or(mirror.page_size),
            max_results: overrides.max_results.or(mirror.max_results),
            max_depth: overrides.max_depth.unwrap_or(mirror.max_depth),
            concurrency: overrides.concurrency.unwrap_or(mirror.concurrency),
            separate_metadata_fetch: overrides
                .separate_metadata_fetch
                .unwrap_or(mirror.separate_metadata_fetch),
            record_elements: overrides.record_elements.unwrap_or(mirror.record_elements),
            request_timeout: Duration::from_secs(
                overrides
                    .request_timeout_secs
                    .unwrap_or(config.connection.request_timeout_secs),
            ),
            run_timeout: overrides
                .run_timeout_secs
                .or(mirror.run_timeout_secs)
                .map(Duration::from_secs),
        };
        resolved.validate()?;
        Ok(resolved)
    }

    /// Reject values the traversal cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(MirrorError::config("page_size must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(MirrorError::config("concurrency must be at least 1"));
        }
        if self.max_depth == 0 {
            return Err(MirrorError::config("max_depth must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(MirrorError::config("request_timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.assetmirror/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MirrorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.assetmirror/assetmirror.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| MirrorError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| MirrorError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MirrorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| MirrorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| MirrorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
