//! HTTP client for the DeepTrust classification backend

use super::{Classifier, HealthStatus, LocatorRequest, ServiceResponse, UploadRequest};
use crate::config::ServiceConfig;
use crate::error::{DetectError, DetectResult};
use crate::scanner::frame::FRAME_FILE_NAME;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::time::Duration;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Classifier backed by the remote HTTP service
pub struct HttpClassifier {
    client: Client,
    service: ServiceConfig,
}

impl HttpClassifier {
    pub fn new(service: ServiceConfig) -> Self {
        let client = Client::builder()
            .timeout(service.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client, using default client: {}", e);
                Client::new()
            });

        Self { client, service }
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    fn map_error(&self, err: reqwest::Error) -> DetectError {
        if err.is_timeout() {
            DetectError::Timeout(self.service.request_timeout().as_millis() as u64)
        } else {
            err.into()
        }
    }

    async fn read_verdict(&self, response: Response) -> DetectResult<ServiceResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Classifier returned {}: {}", status, body);
            return Err(DetectError::Status(status.as_u16()));
        }

        response
            .json::<ServiceResponse>()
            .await
            .map_err(|e| self.map_error(e))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify_locator(&self, request: &LocatorRequest) -> DetectResult<ServiceResponse> {
        let url = self.service.endpoint(&self.service.detect_path);
        tracing::debug!("Locator analysis request to {} for {}", url, request.image_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        self.read_verdict(response).await
    }

    async fn classify_upload(&self, request: UploadRequest) -> DetectResult<ServiceResponse> {
        let url = self.service.endpoint(&self.service.upload_path);
        tracing::debug!(
            "Frame upload request to {} ({} bytes)",
            url,
            request.jpeg.len()
        );

        let image = Part::bytes(request.jpeg)
            .file_name(FRAME_FILE_NAME)
            .mime_str("image/jpeg")
            .map_err(|e| DetectError::FrameEncode(e.to_string()))?;
        let form = Form::new()
            .part("image", image)
            .text("source", request.source);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        self.read_verdict(response).await
    }

    async fn health(&self) -> DetectResult<HealthStatus> {
        let url = self.service.endpoint(&self.service.health_path);
        let response = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(DetectError::Status(response.status().as_u16()));
        }
        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| self.map_error(e))
    }
}
