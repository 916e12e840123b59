//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `PAPERGRAB__<SECTION>__<KEY>` environment variables. Credentials that
//! are still unset afterwards fall back to `ELSEVIER_API_KEY` and
//! `UNPAYWALL_EMAIL`.
//!
//! # Configuration File Format
//!
//! ```toml
//! [credentials]
//! elsevier_api_key = "your-api-key"
//! unpaywall_email = "you@example.org"
//!
//! [http]
//! timeout_secs = 45
//!
//! [search]
//! page_size = 25
//!
//! [downloads]
//! default_path = "./downloads"
//!
//! [quantity]
//! max_ceiling = 100
//!
//! [fallback]
//! mode = "auto"
//! command_name = "fetch-fulltext"
//! args = ["{id}", "{outdir}"]
//! timeout_secs = 180
//!
//! [logging]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fallback::FallbackMode;

/// Environment variable holding the Scopus API key
pub const ELSEVIER_API_KEY_ENV: &str = "ELSEVIER_API_KEY";

/// Environment variable holding the Unpaywall contact email
pub const UNPAYWALL_EMAIL_ENV: &str = "UNPAYWALL_EMAIL";

const SCOPUS_SEARCH_URL: &str = "https://api.elsevier.com/content/search/scopus";
const UNPAYWALL_API_BASE: &str = "https://api.unpaywall.org/v2";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Credentials for the remote services
    #[serde(default)]
    pub credentials: Credentials,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Metadata search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Open-access lookup settings
    #[serde(default)]
    pub unpaywall: UnpaywallConfig,

    /// Download settings
    #[serde(default)]
    pub downloads: DownloadConfig,

    /// Quantity tier settings
    #[serde(default)]
    pub quantity: QuantityConfig,

    /// Fallback retrieval settings
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credentials for external services
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Elsevier API key used for Scopus search
    #[serde(default)]
    pub elsevier_api_key: Option<String>,

    /// Contact email required by Unpaywall
    #[serde(default)]
    pub unpaywall_email: Option<String>,
}

impl Credentials {
    /// Read credentials from the process environment only
    pub fn from_env() -> Self {
        Self {
            elsevier_api_key: non_empty_env(ELSEVIER_API_KEY_ENV),
            unpaywall_email: non_empty_env(UNPAYWALL_EMAIL_ENV),
        }
    }

    /// Fill unset credentials from the process environment
    pub fn fill_from_env(&mut self) {
        let env = Self::from_env();
        if self.elsevier_api_key.as_deref().map_or(true, str::is_empty) {
            self.elsevier_api_key = env.elsevier_api_key;
        }
        if self.unpaywall_email.as_deref().map_or(true, str::is_empty) {
            self.unpaywall_email = env.unpaywall_email;
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Custom user agent
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: None,
        }
    }
}

fn default_timeout() -> u64 {
    45
}

fn default_connect_timeout() -> u64 {
    10
}

/// Metadata search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Scopus search endpoint
    #[serde(default = "default_search_url")]
    pub base_url: String,

    /// Entries requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_url(),
            page_size: default_page_size(),
        }
    }
}

fn default_search_url() -> String {
    SCOPUS_SEARCH_URL.to_string()
}

fn default_page_size() -> usize {
    25
}

/// Open-access lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpaywallConfig {
    /// Unpaywall API base
    #[serde(default = "default_unpaywall_url")]
    pub base_url: String,
}

impl Default for UnpaywallConfig {
    fn default() -> Self {
        Self {
            base_url: default_unpaywall_url(),
        }
    }
}

fn default_unpaywall_url() -> String {
    UNPAYWALL_API_BASE.to_string()
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Default download directory
    #[serde(default = "default_download_dir")]
    pub default_path: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            default_path: default_download_dir(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

/// Quantity tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantityConfig {
    /// Download target used by the `max` tier
    #[serde(default = "default_max_ceiling")]
    pub max_ceiling: usize,
}

impl Default for QuantityConfig {
    fn default() -> Self {
        Self {
            max_ceiling: default_max_ceiling(),
        }
    }
}

fn default_max_ceiling() -> usize {
    100
}

/// Fallback retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// When to use the fallback command
    #[serde(default)]
    pub mode: FallbackMode,

    /// Explicit command line, takes precedence over discovery
    #[serde(default)]
    pub command: Option<String>,

    /// Executable name looked up on `PATH`
    #[serde(default)]
    pub command_name: Option<String>,

    /// Command line that installs and runs the tool on demand
    /// (for example `uvx --from <package> <tool>`); used only when its
    /// launcher is on `PATH`
    #[serde(default)]
    pub remote_command: Option<String>,

    /// Argument template appended to the command; `{id}`, `{outdir}` and
    /// `{email}` are substituted
    #[serde(default = "default_fallback_args")]
    pub args: Vec<String>,

    /// Per-identifier timeout in seconds
    #[serde(default = "default_fallback_timeout")]
    pub timeout_secs: u64,

    /// Email substituted for `{email}`; defaults to the Unpaywall email
    #[serde(default)]
    pub email: Option<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            mode: FallbackMode::default(),
            command: None,
            command_name: None,
            remote_command: None,
            args: default_fallback_args(),
            timeout_secs: default_fallback_timeout(),
            email: None,
        }
    }
}

fn default_fallback_args() -> Vec<String> {
    vec!["{id}".to_string(), "{outdir}".to_string()]
}

fn default_fallback_timeout() -> u64 {
    180
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` switches to structured log lines
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from an optional file plus `PAPERGRAB__*` environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix("PAPERGRAB")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut config: Config = settings.try_deserialize()?;
    config.credentials.fill_from_env();
    Ok(config)
}

/// Find a configuration file in the default locations
///
/// `./papergrab.toml` wins over `<config_dir>/papergrab/config.toml`.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("papergrab.toml");
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("papergrab").join("config.toml"))
        .filter(|path| path.is_file())
}

/// Error writing a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("{0} already exists")]
    Exists(PathBuf),

    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Config {
    /// Render as TOML with credentials masked
    pub fn to_toml_redacted(&self) -> Result<String, toml::ser::Error> {
        let mut shown = self.clone();
        let mask = |value: Option<String>| value.map(|_| "********".to_string());
        shown.credentials.elsevier_api_key = mask(shown.credentials.elsevier_api_key);
        shown.credentials.unpaywall_email = mask(shown.credentials.unpaywall_email);
        toml::to_string_pretty(&shown)
    }
}

/// Write a default configuration file to `path`; never overwrites
pub fn write_default_config(path: &Path) -> Result<(), ConfigFileError> {
    if path.exists() {
        return Err(ConfigFileError::Exists(path.to_path_buf()));
    }
    let content = toml::to_string_pretty(&Config::default())?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}
