//! DeepTrust - deepfake detection core
//! Finds media in a live, mutating document, asks the classification
//! service about it, and renders verdict overlays next to it.

pub mod classifier;
pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod events_bus;
pub mod fingerprint;
pub mod navigation;
pub mod overlay;
pub mod scanner;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use classifier::{Classifier, HttpClassifier};
pub use config::{DeepTrustConfig, ExtensionStats, StatsStore};
pub use detector::Detector;
pub use dispatcher::{AnalysisVerdict, RiskLevel};
pub use document::{Document, MediaElement, MediaKind, OverlayHost};
pub use error::{DetectError, DetectResult};
pub use events_bus::{DetectorEvent, EventBus};
pub use fingerprint::{Fingerprint, FingerprintResolver};
pub use overlay::{OverlayId, OverlayView};
pub use scanner::ScanEpoch;

/// Install the tracing subscriber and load `.env`.
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("deeptrust=debug"));

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file found or error loading: {}", e);
    }
}
