//! Config module - detector configuration and persisted counters

pub mod stats;
pub mod toml_config;

// Re-export commonly used types
pub use stats::{ExtensionStats, StatsStore};
pub use toml_config::{
    load_toml_config, save_toml_config, DeepTrustConfig, DispatchConfig, OverlayConfig,
    ScanConfig, ServiceConfig,
};
