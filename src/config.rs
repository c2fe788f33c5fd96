//! Export configuration.
//!
//! Settings come in three layers, each overriding the one before:
//!
//! 1. stock defaults ([`ExportConfig::default`]),
//! 2. `spacedump.toml` (or the file given with `--config`),
//! 3. command-line flags.
//!
//! Layers are merged as TOML values ([`merge_toml`]) before deserializing,
//! so a file only needs the keys it changes. Unknown keys are rejected to
//! catch typos early.
//!
//! ## Configuration Options
//!
//! ```toml
//! [gateway]
//! base_url = "https://acme.atlassian.net"
//! platform = "cloud"          # or "dc"
//! # context_path = "/confluence"
//! auth = "auto"               # auto | basic | bearer | none
//!
//! [download]
//! # threads = 8
//! timeout_secs = 30
//!
//! [scan]
//! exclude_page_ids = ["12345"]
//! # exclude_label = "draft"
//!
//! [output]
//! outdir = "output"
//! # css_file = "brand.css"
//! write_metadata_json = true
//! timestamped_dirs = true
//! ```
//!
//! Credentials never live in the file: they are read from `CONFLUENCE_USER`
//! and `CONFLUENCE_TOKEN`.

use crate::confluence::{AuthMethod, Platform};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "spacedump.toml";

/// Download workers when `download.threads` is not set.
pub const DEFAULT_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Everything an export run can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Where the content comes from and how to authenticate.
    pub gateway: GatewayConfig,
    /// Parallel download settings.
    pub download: DownloadConfig,
    /// Pruning rules applied during discovery.
    pub scan: ScanConfig,
    /// Archive layout options.
    pub output: OutputConfig,
}

impl ExportConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.gateway.base_url.trim();
        if !base_url.is_empty()
            && !(base_url.starts_with("https://") || base_url.starts_with("http://"))
        {
            return Err(ConfigError::Validation(
                "gateway.base_url must start with http:// or https://".into(),
            ));
        }
        if self.download.threads == Some(0) {
            return Err(ConfigError::Validation(
                "download.threads must be at least 1".into(),
            ));
        }
        if self.download.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "download.timeout_secs must be non-zero".into(),
            ));
        }
        if self.scan.exclude_page_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "scan.exclude_page_ids must not contain empty ids".into(),
            ));
        }
        if self
            .scan
            .exclude_label
            .as_deref()
            .is_some_and(|l| l.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "scan.exclude_label must not be empty".into(),
            ));
        }
        if self.output.outdir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "output.outdir must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Site root, e.g. `https://acme.atlassian.net`. Empty means "not set".
    pub base_url: String,
    pub platform: Platform,
    /// Overrides the platform's default context path (`/wiki` on Cloud).
    pub context_path: Option<String>,
    pub auth: AuthMethod,
}

/// Parallel download settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    /// Maximum number of concurrent page downloads.
    /// When absent, defaults to [`DEFAULT_THREADS`].
    pub threads: Option<usize>,
    /// Timeout for a single HTTP request, in seconds.
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            threads: None,
            timeout_secs: 30,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// Downloads are network bound, so the count is not tied to CPU cores.
pub fn effective_threads(config: &DownloadConfig) -> usize {
    config.threads.unwrap_or(DEFAULT_THREADS).max(1)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Pages pruned together with their whole subtree.
    pub exclude_page_ids: Vec<String>,
    /// Pages carrying this label are pruned together with their subtree.
    pub exclude_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Parent directory of every export.
    pub outdir: String,
    /// Extra stylesheet copied into the archive and linked after the standard one.
    pub css_file: Option<String>,
    /// Write `pages/<stem>.json` next to every page.
    pub write_metadata_json: bool,
    /// Export into `<outdir>/<YYYY-MM-DD HHMM> <title>` instead of `<outdir>` itself.
    pub timestamped_dirs: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            outdir: "output".to_string(),
            css_file: None,
            write_metadata_json: true,
            timestamped_dirs: true,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer that file and command-line overrides merge onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ExportConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist, `Err` if it exists but
/// contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge overlays onto a base value in order, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlays: impl IntoIterator<Item = toml::Value>,
) -> Result<ExportConfig, ConfigError> {
    let merged = overlays.into_iter().fold(base, merge_toml);
    let config: ExportConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path` merged over stock defaults, with `cli` on top.
pub fn load_config(path: &Path, cli: Option<toml::Value>) -> Result<ExportConfig, ConfigError> {
    let file = load_raw_config(path)?;
    resolve_config(stock_defaults_value(), file.into_iter().chain(cli))
}

/// Returns a fully-commented stock `spacedump.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# spacedump configuration
# =======================
# All settings are optional. Values shown are the defaults.
# Command-line flags override anything set here. Unknown keys are an error.
#
# Credentials are never read from this file:
#   Cloud:        CONFLUENCE_USER (account e-mail) + CONFLUENCE_TOKEN (API token)
#   Data Center:  CONFLUENCE_TOKEN (personal access token)

# ---------------------------------------------------------------------------
# Source
# ---------------------------------------------------------------------------
[gateway]
# Site root, e.g. "https://acme.atlassian.net" or "https://docs.example.com".
base_url = ""

# "cloud" or "dc" (Data Center / Server).
platform = "cloud"

# Path the site is served under. Cloud defaults to "/wiki", Data Center to "".
# context_path = "/confluence"

# auto   = basic on Cloud, bearer on Data Center
# basic  = CONFLUENCE_USER + CONFLUENCE_TOKEN
# bearer = CONFLUENCE_TOKEN
# none   = anonymous access
auth = "auto"

# ---------------------------------------------------------------------------
# Downloads
# ---------------------------------------------------------------------------
[download]
# Pages fetched concurrently. Omit for the default of 4.
# threads = 8

# Timeout for a single HTTP request, in seconds.
timeout_secs = 30

# ---------------------------------------------------------------------------
# Discovery
# ---------------------------------------------------------------------------
[scan]
# Pages skipped together with everything below them.
exclude_page_ids = []

# Pages carrying this label are skipped together with everything below them.
# exclude_label = "draft"

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Parent directory of every export.
outdir = "output"

# Extra stylesheet, linked after the standard one.
# css_file = "brand.css"

# Write pages/<name>.json with the metadata of every page.
write_metadata_json = true

# Export into "<outdir>/<YYYY-MM-DD HHMM> <title>" rather than into outdir itself.
timestamped_dirs = true
"##
}
