//! TOML Configuration with Environment Variable Overrides
//!
//! Supports:
//! - TOML configuration file under the user config directory
//! - Environment variable overrides (`DEEPTRUST_*`)
//! - Atomic writes with backup

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

lazy_static::lazy_static! {
    static ref TOML_CONFIG: RwLock<Option<DeepTrustConfig>> = RwLock::new(None);
}

pub const DEFAULT_BACKEND_URL: &str = "https://your-backend-url.vercel.app";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DeepTrustConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
}

/// Classification service endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_detect_path")]
    pub detect_path: String,
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Per-request deadline; expiry is reported as a transport failure
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}
fn default_detect_path() -> String {
    "/api/detect-deepfake".to_string()
}
fn default_upload_path() -> String {
    "/api/detect-deepfake-upload".to_string()
}
fn default_health_path() -> String {
    "/api/health".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            detect_path: default_detect_path(),
            upload_path: default_upload_path(),
            health_path: default_health_path(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServiceConfig {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Discovery heuristics and cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    #[serde(default = "default_scan_interval_ms")]
    pub interval_ms: u64,
    /// Minimum rendered width and height, in CSS pixels
    #[serde(default = "default_min_media_size")]
    pub min_media_size: f64,
    /// Class substrings marking avatar/profile/icon containers
    #[serde(default = "default_excluded_markers")]
    pub excluded_container_markers: Vec<String>,
    #[serde(default = "default_navigation_settle_ms")]
    pub navigation_settle_ms: u64,
}

fn default_scan_interval_ms() -> u64 {
    2000
}
fn default_min_media_size() -> f64 {
    100.0
}
fn default_excluded_markers() -> Vec<String> {
    vec!["avatar".to_string(), "profile".to_string(), "icon".to_string()]
}
fn default_navigation_settle_ms() -> u64 {
    1000
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_scan_interval_ms(),
            min_media_size: default_min_media_size(),
            excluded_container_markers: default_excluded_markers(),
            navigation_settle_ms: default_navigation_settle_ms(),
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }
}

/// Submission thresholds and admission control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Upper bound of the random pre-submission delay
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Confidence must be strictly above this to be reported
    #[serde(default = "default_report_threshold")]
    pub report_threshold: f64,
    /// Confidence strictly above this is high-risk
    #[serde(default = "default_high_risk_threshold")]
    pub high_risk_threshold: f64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jitter_ms() -> u64 {
    1000
}
fn default_report_threshold() -> f64 {
    30.0
}
fn default_high_risk_threshold() -> f64 {
    70.0
}
fn default_jpeg_quality() -> u8 {
    80
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            jitter_ms: default_jitter_ms(),
            report_threshold: default_report_threshold(),
            high_risk_threshold: default_high_risk_threshold(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Overlay auto-dismiss timings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayConfig {
    #[serde(default = "default_auto_dismiss_ms")]
    pub auto_dismiss_ms: u64,
    #[serde(default = "default_fade_ms")]
    pub fade_ms: u64,
}

fn default_auto_dismiss_ms() -> u64 {
    10_000
}
fn default_fade_ms() -> u64 {
    500
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            auto_dismiss_ms: default_auto_dismiss_ms(),
            fade_ms: default_fade_ms(),
        }
    }
}

impl OverlayConfig {
    pub fn auto_dismiss(&self) -> Duration {
        Duration::from_millis(self.auto_dismiss_ms)
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }
}

/// Directory holding `config.toml` and `stats.json`
pub fn config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("deeptrust");
    path
}

fn get_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load the cached config, reading the default file on first use
pub fn load_toml_config() -> DeepTrustConfig {
    load_cached(&get_config_path())
}

fn load_cached(path: &Path) -> DeepTrustConfig {
    if let Ok(config) = TOML_CONFIG.read() {
        if let Some(ref cfg) = *config {
            return cfg.clone();
        }
    }

    let config = match load_from_path(path) {
        Ok(config) => {
            tracing::info!("Loaded TOML config from {:?}", path);
            config
        }
        Err(e) => {
            if path.exists() {
                tracing::warn!("Ignoring unreadable config {:?}: {:#}", path, e);
            }
            apply_env_overrides(DeepTrustConfig::default())
        }
    };

    if let Ok(mut cfg) = TOML_CONFIG.write() {
        *cfg = Some(config.clone());
    }

    config
}

/// Parse a config file and apply environment overrides (uncached)
pub fn load_from_path(path: &Path) -> Result<DeepTrustConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let config = toml::from_str::<DeepTrustConfig>(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(apply_env_overrides(config))
}

pub fn save_toml_config(config: &DeepTrustConfig) -> Result<()> {
    save_cached(config, &get_config_path())
}

fn save_cached(config: &DeepTrustConfig, path: &Path) -> Result<()> {
    save_to_path(config, path)?;

    if let Ok(mut cfg) = TOML_CONFIG.write() {
        *cfg = Some(config.clone());
    }
    Ok(())
}

/// Write config atomically, keeping a `.bak` of the previous file
pub fn save_to_path(config: &DeepTrustConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    if path.exists() {
        let backup_path = path.with_extension("toml.bak");
        let _ = fs::copy(path, &backup_path);
    }

    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;

    let temp_path = path.with_extension("toml.tmp");
    fs::write(&temp_path, &contents).context("Failed to write temp config")?;
    fs::rename(&temp_path, path).context("Failed to replace config")?;

    tracing::info!("Saved TOML config to {:?}", path);
    Ok(())
}

fn apply_env_overrides(mut config: DeepTrustConfig) -> DeepTrustConfig {
    if let Ok(url) = std::env::var("DEEPTRUST_BACKEND_URL") {
        if !url.is_empty() {
            config.service.backend_url = url;
        }
    }

    if let Ok(secs) = std::env::var("DEEPTRUST_REQUEST_TIMEOUT_SECS") {
        if let Ok(s) = secs.parse::<u64>() {
            config.service.request_timeout_secs = s;
        }
    }

    if let Ok(interval) = std::env::var("DEEPTRUST_SCAN_INTERVAL_MS") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.scan.interval_ms = ms;
        }
    }

    if let Ok(settle) = std::env::var("DEEPTRUST_NAVIGATION_SETTLE_MS") {
        if let Ok(ms) = settle.parse::<u64>() {
            config.scan.navigation_settle_ms = ms;
        }
    }

    if let Ok(jitter) = std::env::var("DEEPTRUST_JITTER_MS") {
        if let Ok(ms) = jitter.parse::<u64>() {
            config.dispatch.jitter_ms = ms;
        }
    }

    config
}
