//! Persisted counters shared with the settings surface
//!
//! Mirrors the extension storage keys: `enabled`, `scannedImages`,
//! `detectedDeepfakes`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const STATS_FILE: &str = "stats.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStats {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub scanned_images: u64,
    #[serde(default)]
    pub detected_deepfakes: u64,
}

fn default_enabled() -> bool {
    true
}

impl Default for ExtensionStats {
    fn default() -> Self {
        Self {
            enabled: true,
            scanned_images: 0,
            detected_deepfakes: 0,
        }
    }
}

/// File-backed counter store. Every mutation is written through.
pub struct StatsStore {
    path: PathBuf,
    current: Mutex<ExtensionStats>,
}

impl StatsStore {
    /// `<config_dir>/deeptrust/stats.json`
    pub fn default_path() -> PathBuf {
        super::toml_config::config_dir().join(STATS_FILE)
    }

    /// Open a store, writing install defaults when the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stats = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Resetting corrupt stats file {:?}: {}", path, e);
                ExtensionStats::default()
            })
        } else {
            tracing::info!("Initializing stats with install defaults at {:?}", path);
            let stats = ExtensionStats::default();
            write_stats(&path, &stats)?;
            stats
        };

        Ok(Self {
            path,
            current: Mutex::new(stats),
        })
    }

    /// In-memory store for hosts that persist counters elsewhere
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            current: Mutex::new(ExtensionStats::default()),
        }
    }

    pub fn snapshot(&self) -> ExtensionStats {
        self.current
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<ExtensionStats> {
        self.update(|s| s.enabled = enabled)
    }

    pub fn increment_scanned(&self) -> Result<ExtensionStats> {
        self.update(|s| s.scanned_images = s.scanned_images.saturating_add(1))
    }

    pub fn increment_detected(&self) -> Result<ExtensionStats> {
        self.update(|s| s.detected_deepfakes = s.detected_deepfakes.saturating_add(1))
    }

    fn update(&self, f: impl FnOnce(&mut ExtensionStats)) -> Result<ExtensionStats> {
        let snapshot = {
            let mut guard = self
                .current
                .lock()
                .map_err(|_| anyhow::anyhow!("stats lock poisoned"))?;
            f(&mut guard);
            *guard
        };
        if !self.path.as_os_str().is_empty() {
            write_stats(&self.path, &snapshot)?;
        }
        Ok(snapshot)
    }
}

fn write_stats(path: &Path, stats: &ExtensionStats) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create stats directory")?;
    }
    let contents = serde_json::to_string_pretty(stats)?;
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
