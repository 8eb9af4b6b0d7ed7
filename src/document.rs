//! Host document abstraction
//!
//! The detector never owns the page. A host (browser bridge, headless
//! renderer, test fake) implements these traits and hands out shared
//! references; the core downgrades them to weak back-references.

use crate::overlay::{OverlayId, OverlayView};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Stable identity of an overlay container within one document
pub type HostId = u64;

/// Kind of media element found during discovery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Rendered bounding box relative to the viewport, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Intersects the vertical band `[0, viewport_height)`
    pub fn intersects_viewport(&self, viewport_height: f64) -> bool {
        self.top < viewport_height && self.bottom() > 0.0
    }
}

/// A decoded video frame, RGBA8 row-major
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Marker delivered once per batch of document mutations
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationBatch;

/// The live, mutating page
pub trait Document: Send + Sync {
    /// Full current location (`href`)
    fn location(&self) -> String;

    fn hostname(&self) -> String {
        crate::utils::hostname_of(&self.location())
    }

    fn viewport_height(&self) -> f64;

    /// Image and video elements in document order
    fn media_elements(&self) -> Vec<Arc<dyn MediaElement>>;

    /// Mutation batches observed over the whole document subtree
    fn subscribe_mutations(&self) -> broadcast::Receiver<MutationBatch>;
}

#[async_trait]
pub trait MediaElement: Send + Sync {
    fn kind(&self) -> MediaKind;

    fn src(&self) -> Option<String>;

    /// Lazy-loading attribute (`data-src`)
    fn data_src(&self) -> Option<String> {
        None
    }

    fn bounding_rect(&self) -> Rect;

    /// Class attributes of the element and each ancestor, nearest first
    fn class_chain(&self) -> Vec<String>;

    fn is_connected(&self) -> bool;

    /// Parent node overlays are attached to
    fn container(&self) -> Option<Arc<dyn OverlayHost>>;

    /// Resolves once decoded frame data is available.
    /// Images have nothing to wait for.
    async fn loaded_data(&self) {}

    /// Draw the current frame into an offscreen buffer
    fn capture_frame(&self) -> Option<RawFrame> {
        None
    }

    /// `src`, falling back to `data-src`; empty strings do not count
    fn locator(&self) -> Option<String> {
        self.src()
            .filter(|s| !s.is_empty())
            .or_else(|| self.data_src().filter(|s| !s.is_empty()))
    }
}

/// Container an overlay is rendered into
pub trait OverlayHost: Send + Sync {
    fn host_id(&self) -> HostId;

    fn is_connected(&self) -> bool;

    /// Make the container a positioning context without disturbing
    /// containers that already are one
    fn establish_positioning_context(&self);

    fn mount_overlay(&self, view: &OverlayView);

    fn set_overlay_expanded(&self, id: OverlayId, expanded: bool);

    /// Start the fade-out transition
    fn fade_overlay(&self, id: OverlayId);

    fn unmount_overlay(&self, id: OverlayId);
}
