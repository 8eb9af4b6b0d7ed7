//! Classification service interface
//!
//! Two submission modes share one response shape:
//! - locator mode posts `{imageUrl, source}` as JSON
//! - upload mode posts a multipart `image` JPEG plus a `source` field

pub mod http_client;

pub use http_client::HttpClassifier;

use crate::error::DetectResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocatorRequest {
    pub image_url: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub jpeg: Vec<u8>,
    pub source: String,
}

/// Service verdict. Missing fields decode as a declined result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasons: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Remote deepfake classifier
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify_locator(&self, request: &LocatorRequest) -> DetectResult<ServiceResponse>;

    async fn classify_upload(&self, request: UploadRequest) -> DetectResult<ServiceResponse>;

    /// Status probe used by settings surfaces
    async fn health(&self) -> DetectResult<HealthStatus>;
}
