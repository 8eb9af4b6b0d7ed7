//! Error taxonomy for the detection core

/// Result type for detection operations
pub type DetectResult<T> = Result<T, DetectError>;

/// Errors raised while talking to the classification service or preparing
/// a submission. None of these are fatal to the scan loop.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Classification service unreachable: {0}")]
    Transport(String),

    #[error("Classification service returned HTTP {0}")]
    Status(u16),

    #[error("Classification request exceeded its {0}ms deadline")]
    Timeout(u64),

    #[error("Invalid classification response: {0}")]
    InvalidResponse(String),

    #[error("Frame encoding failed: {0}")]
    FrameEncode(String),

    #[error("Media element is no longer attached to the document")]
    ElementGone,

    #[error("Submission belongs to superseded scan epoch {0}")]
    StaleEpoch(u64),
}

impl DetectError {
    /// Transport-level failures get the offline fallback on the image path.
    /// Non-success status codes and deadline expiry count as transport failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DetectError::Transport(_) | DetectError::Status(_) | DetectError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for DetectError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DetectError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            DetectError::Status(status.as_u16())
        } else {
            DetectError::Transport(err.to_string())
        }
    }
}

impl From<image::ImageError> for DetectError {
    fn from(err: image::ImageError) -> Self {
        DetectError::FrameEncode(err.to_string())
    }
}
