//! Media discovery
//!
//! Walks the document on every pass and yields media that is worth
//! classifying and has not been claimed in the current epoch.

pub mod frame;
pub mod processed;

pub use processed::{ProcessedSet, ScanEpoch, SharedProcessedSet};

use crate::config::ScanConfig;
use crate::document::{Document, MediaElement, MediaKind};
use crate::fingerprint::{Fingerprint, FingerprintResolver};
use std::sync::{Arc, Weak};

/// A newly discovered element, ready for dispatch
#[derive(Clone)]
pub struct MediaCandidate {
    pub element: Weak<dyn MediaElement>,
    pub raw_locator: String,
    pub fingerprint: Fingerprint,
    pub kind: MediaKind,
    pub epoch: ScanEpoch,
}

impl MediaCandidate {
    /// The element, if the page still holds it
    pub fn element(&self) -> Option<Arc<dyn MediaElement>> {
        self.element.upgrade()
    }

    #[cfg(test)]
    pub(crate) fn for_test<E: MediaElement + 'static>(element: &Arc<E>) -> Self {
        let element: Arc<dyn MediaElement> = element.clone();
        let raw_locator = element.locator().unwrap_or_default();
        Self {
            element: Arc::downgrade(&element),
            fingerprint: FingerprintResolver::new().resolve(&raw_locator),
            raw_locator,
            kind: element.kind(),
            epoch: ScanEpoch::default(),
        }
    }
}

impl std::fmt::Debug for MediaCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCandidate")
            .field("fingerprint", &self.fingerprint)
            .field("kind", &self.kind)
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    NoLocator,
    TooSmall,
    OffScreen,
    ExcludedContainer,
    AlreadyClaimed,
}

pub struct MediaScanner {
    config: ScanConfig,
    resolver: FingerprintResolver,
    processed: SharedProcessedSet,
}

impl MediaScanner {
    pub fn new(config: ScanConfig, processed: SharedProcessedSet) -> Self {
        Self {
            config,
            resolver: FingerprintResolver::new(),
            processed,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// One discovery pass, in document order. Yielded fingerprints are
    /// claimed before this returns.
    pub fn scan(&self, document: &dyn Document) -> Vec<MediaCandidate> {
        let viewport_height = document.viewport_height();
        let mut candidates = Vec::new();
        let mut skipped = 0usize;

        for element in document.media_elements() {
            let result = match element.kind() {
                MediaKind::Image => self.admit_image(element.as_ref(), viewport_height),
                MediaKind::Video => self.admit_video(element.as_ref()),
            }
            .and_then(|raw| self.claim(&element, raw));

            match result {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    tracing::trace!("Skipped {} ({:?})", element.kind(), reason);
                    skipped += 1;
                }
            }
        }

        if !candidates.is_empty() {
            tracing::debug!(
                "Discovered {} new media element(s), skipped {}",
                candidates.len(),
                skipped
            );
        }
        candidates
    }

    fn admit_image(&self, element: &dyn MediaElement, viewport_height: f64) -> Result<String, SkipReason> {
        let locator = element.locator().ok_or(SkipReason::NoLocator)?;

        let rect = element.bounding_rect();
        let min = self.config.min_media_size;
        if rect.width < min || rect.height < min {
            return Err(SkipReason::TooSmall);
        }
        if !rect.intersects_viewport(viewport_height) {
            return Err(SkipReason::OffScreen);
        }
        if self.in_excluded_container(element) {
            return Err(SkipReason::ExcludedContainer);
        }
        Ok(locator)
    }

    /// Videos need a real `src`; lazy `data-src` does not count
    fn admit_video(&self, element: &dyn MediaElement) -> Result<String, SkipReason> {
        element
            .src()
            .filter(|s| !s.is_empty())
            .ok_or(SkipReason::NoLocator)
    }

    fn in_excluded_container(&self, element: &dyn MediaElement) -> bool {
        element.class_chain().iter().any(|class| {
            self.config
                .excluded_container_markers
                .iter()
                .any(|marker| class.contains(marker.as_str()))
        })
    }

    fn claim(&self, element: &Arc<dyn MediaElement>, raw_locator: String) -> Result<MediaCandidate, SkipReason> {
        let fingerprint = self.resolver.resolve(&raw_locator);
        let epoch = self
            .processed
            .claim_in_epoch(&fingerprint)
            .ok_or(SkipReason::AlreadyClaimed)?;

        Ok(MediaCandidate {
            element: Arc::downgrade(element),
            raw_locator,
            fingerprint,
            kind: element.kind(),
            epoch,
        })
    }
}
