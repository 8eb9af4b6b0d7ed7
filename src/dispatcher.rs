//! Analysis dispatcher
//!
//! Submits discovered media to the classifier and turns the heterogeneous
//! responses into verdicts:
//! - images go out by locator (the normalized URL)
//! - videos wait for decoded data, then upload one JPEG frame
//!
//! Every submission is preceded by a random delay so a discovery batch does
//! not hit the service at once. Transport failures on the image path become
//! an offline verdict; on the video path they are logged and dropped.

use crate::classifier::{Classifier, HealthStatus, LocatorRequest, ServiceResponse, UploadRequest};
use crate::config::DispatchConfig;
use crate::document::{MediaElement, MediaKind};
use crate::error::{DetectError, DetectResult};
use crate::fingerprint::Fingerprint;
use crate::scanner::frame::extract_frame_jpeg;
use crate::scanner::{MediaCandidate, ScanEpoch, SharedProcessedSet};
use crate::utils::jitter_delay;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub const IMAGE_FALLBACK_REASON: &str = "Suspicious patterns detected by AI model";
pub const VIDEO_FALLBACK_REASON: &str = "Video analysis detected suspicious patterns";
pub const OFFLINE_REASON: &str = "DeepTrust service temporarily unavailable";

/// How often a pending decoded-data wait rechecks its candidate
const LIVENESS_POLL: Duration = Duration::from_millis(250);

/// Overlay styling and alerting class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    High,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "high-risk",
            RiskLevel::Low => "low-risk",
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, RiskLevel::High)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification result for one piece of media. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisVerdict {
    pub confidence: u8,
    pub reasons: Vec<String>,
    pub is_offline_fallback: bool,
    pub risk: RiskLevel,
}

impl AnalysisVerdict {
    pub fn new(confidence: u8, reasons: Vec<String>, is_offline_fallback: bool, risk: RiskLevel) -> Self {
        Self {
            confidence: confidence.min(100),
            reasons,
            is_offline_fallback,
            risk,
        }
    }

    /// Shown when the service cannot be reached
    pub fn offline() -> Self {
        Self::new(0, vec![OFFLINE_REASON.to_string()], true, RiskLevel::Low)
    }

    pub fn is_high_risk(&self) -> bool {
        self.risk.is_high()
    }
}

/// External side-effects of a classification
pub trait DetectionNotifier: Send + Sync {
    /// The service answered for one piece of media
    fn media_scanned(&self);

    /// A locator-mode verdict crossed the high-risk threshold
    fn high_risk_detected(&self, fingerprint: &Fingerprint, verdict: &AnalysisVerdict);
}

/// Notifier that does nothing, for hosts without a counter surface
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl DetectionNotifier for NoopNotifier {
    fn media_scanned(&self) {}

    fn high_risk_detected(&self, _fingerprint: &Fingerprint, _verdict: &AnalysisVerdict) {}
}

pub struct AnalysisDispatcher {
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn DetectionNotifier>,
    config: DispatchConfig,
    request_timeout: Duration,
}

impl AnalysisDispatcher {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn DetectionNotifier>,
        config: DispatchConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            notifier,
            config,
            request_timeout,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Submit one candidate. `None` means nothing should be rendered.
    /// A video still waiting for decoded data is abandoned once `processed`
    /// moves past the candidate's epoch or the element leaves the document.
    pub async fn submit(
        &self,
        candidate: &MediaCandidate,
        source: &str,
        processed: &SharedProcessedSet,
    ) -> Option<AnalysisVerdict> {
        match candidate.kind {
            MediaKind::Image => {
                tokio::time::sleep(jitter_delay(self.config.jitter_ms)).await;
                self.submit_locator(&candidate.fingerprint, source).await
            }
            MediaKind::Video => match self.prepare_frame(candidate, processed).await {
                Ok(jpeg) => {
                    tokio::time::sleep(jitter_delay(self.config.jitter_ms)).await;
                    self.submit_upload(jpeg, source).await
                }
                Err(e) => {
                    tracing::debug!("Skipping video {}: {}", candidate.fingerprint, e);
                    None
                }
            },
        }
    }

    /// Wait for decoded data, then grab and encode the current frame
    async fn prepare_frame(
        &self,
        candidate: &MediaCandidate,
        processed: &SharedProcessedSet,
    ) -> DetectResult<Vec<u8>> {
        let element = candidate.element().ok_or(DetectError::ElementGone)?;
        tokio::select! {
            biased;
            reason = abandoned(element.as_ref(), candidate.epoch, processed) => return Err(reason),
            _ = element.loaded_data() => {}
        }
        if !element.is_connected() {
            return Err(DetectError::ElementGone);
        }
        extract_frame_jpeg(element.as_ref(), self.config.jpeg_quality)
    }

    /// Locator mode: JSON body with the normalized URL
    pub async fn submit_locator(&self, fingerprint: &Fingerprint, source: &str) -> Option<AnalysisVerdict> {
        let request = LocatorRequest {
            image_url: fingerprint.as_str().to_string(),
            source: source.to_string(),
        };

        match self.with_deadline(self.classifier.classify_locator(&request)).await {
            Ok(response) => {
                self.notifier.media_scanned();
                let verdict = self.interpret(response, IMAGE_FALLBACK_REASON)?;
                if verdict.is_high_risk() {
                    self.notifier.high_risk_detected(fingerprint, &verdict);
                }
                Some(verdict)
            }
            Err(e) if e.is_transport() => {
                tracing::error!("DeepTrust analysis failed: {}", e);
                Some(AnalysisVerdict::offline())
            }
            Err(e) => {
                tracing::error!("DeepTrust analysis failed: {}", e);
                None
            }
        }
    }

    /// Upload mode: multipart JPEG frame. High-risk results do not notify.
    pub async fn submit_upload(&self, jpeg: Vec<u8>, source: &str) -> Option<AnalysisVerdict> {
        let request = UploadRequest {
            jpeg,
            source: source.to_string(),
        };

        match self.with_deadline(self.classifier.classify_upload(request)).await {
            Ok(response) => {
                self.notifier.media_scanned();
                self.interpret(response, VIDEO_FALLBACK_REASON)
            }
            Err(e) => {
                tracing::error!("Video analysis failed: {}", e);
                None
            }
        }
    }

    pub async fn health(&self) -> DetectResult<HealthStatus> {
        self.with_deadline(self.classifier.health()).await
    }

    async fn with_deadline<T>(&self, request: impl Future<Output = DetectResult<T>>) -> DetectResult<T> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(DetectError::Timeout(self.request_timeout.as_millis() as u64)),
        }
    }

    /// Apply the report threshold and normalize confidence and reasons
    pub fn interpret(&self, response: ServiceResponse, fallback_reason: &str) -> Option<AnalysisVerdict> {
        if !response.success || !(response.confidence > self.config.report_threshold) {
            tracing::debug!(
                "Declined verdict (success: {}, confidence: {})",
                response.success,
                response.confidence
            );
            return None;
        }

        let confidence = response.confidence.clamp(0.0, 100.0).round() as u8;
        let risk = if f64::from(confidence) > self.config.high_risk_threshold {
            RiskLevel::High
        } else {
            RiskLevel::Low
        };
        let reasons = response
            .reasons
            .unwrap_or_else(|| vec![fallback_reason.to_string()]);

        Some(AnalysisVerdict::new(confidence, reasons, false, risk))
    }
}

/// Resolves once nobody wants a frame from `element` any more
async fn abandoned(element: &dyn MediaElement, epoch: ScanEpoch, processed: &SharedProcessedSet) -> DetectError {
    let mut poll = tokio::time::interval(LIVENESS_POLL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        poll.tick().await;
        if !processed.is_current(epoch) {
            return DetectError::StaleEpoch(epoch.0);
        }
        if !element.is_connected() {
            return DetectError::ElementGone;
        }
    }
}
