//! Overlay presenter
//!
//! Owns the lifecycle of verdict overlays: at most one per container,
//! replaced when a later verdict arrives, toggled and closed by the user,
//! and auto-dismissed unless the verdict is high-risk.

use crate::config::OverlayConfig;
use crate::dispatcher::{AnalysisVerdict, RiskLevel};
use crate::document::{HostId, MediaElement, OverlayHost};
use crate::events_bus::{DetectorEvent, EventBus};
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio_util::sync::CancellationToken;

pub const SUMMARY_TEXT: &str = "Tap to see why";
pub const MODEL_INFO: &str = "Detected by PyDeepFakeDet AI Model";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverlayId(pub u64);

impl std::fmt::Display for OverlayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "overlay#{}", self.0)
    }
}

/// Everything a host needs to render one overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayView {
    pub id: OverlayId,
    pub headline: String,
    pub confidence: u8,
    pub risk: RiskLevel,
    pub summary: String,
    pub reasons: Vec<String>,
    pub model_info: String,
    pub expanded: bool,
    pub offline: bool,
}

impl OverlayView {
    pub fn new(id: OverlayId, verdict: &AnalysisVerdict) -> Self {
        Self {
            id,
            headline: format!("{}% likely deepfake", verdict.confidence),
            confidence: verdict.confidence,
            risk: verdict.risk,
            summary: SUMMARY_TEXT.to_string(),
            reasons: verdict.reasons.clone(),
            model_info: MODEL_INFO.to_string(),
            expanded: false,
            offline: verdict.is_offline_fallback,
        }
    }
}

struct OverlayEntry {
    id: OverlayId,
    host: Arc<dyn OverlayHost>,
    expanded: bool,
    dismiss: Option<CancellationToken>,
}

impl OverlayEntry {
    /// Host calls; never run while the overlay map is locked
    fn teardown(self) {
        if let Some(token) = &self.dismiss {
            token.cancel();
        }
        if self.host.is_connected() {
            self.host.unmount_overlay(self.id);
        }
    }
}

pub struct OverlayPresenter {
    config: OverlayConfig,
    next_id: AtomicU64,
    overlays: Mutex<HashMap<HostId, OverlayEntry>>,
    events: EventBus,
}

impl OverlayPresenter {
    pub fn new(config: OverlayConfig, events: EventBus) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            overlays: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HostId, OverlayEntry>> {
        self.overlays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render a verdict over the element's container, replacing whatever
    /// overlay the container already shows.
    pub fn present(
        self: &Arc<Self>,
        element: &dyn MediaElement,
        fingerprint: &Fingerprint,
        verdict: &AnalysisVerdict,
    ) -> Option<OverlayId> {
        let host = match element.container() {
            Some(host) if host.is_connected() => host,
            _ => {
                tracing::debug!("No live container for {}, dropping verdict", fingerprint);
                return None;
            }
        };

        let host_id = host.host_id();
        let id = OverlayId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let view = OverlayView::new(id, verdict);
        let dismiss = (!verdict.is_high_risk()).then(CancellationToken::new);

        let previous = self.lock().insert(
            host_id,
            OverlayEntry {
                id,
                host: Arc::clone(&host),
                expanded: false,
                dismiss: dismiss.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!("Replacing {} on container {}", previous.id, host_id);
            previous.teardown();
        }
        host.establish_positioning_context();
        host.mount_overlay(&view);

        if let Some(token) = dismiss {
            self.spawn_auto_dismiss(host_id, id, token);
        }

        tracing::info!(
            "Rendered {} ({}% {}) for {}",
            id,
            verdict.confidence,
            verdict.risk,
            fingerprint
        );
        self.events.publish(DetectorEvent::VerdictRendered {
            overlay_id: id.0,
            fingerprint: fingerprint.to_string(),
            confidence: verdict.confidence,
            risk: verdict.risk,
            offline: verdict.is_offline_fallback,
        });
        Some(id)
    }

    fn spawn_auto_dismiss(self: &Arc<Self>, host_id: HostId, id: OverlayId, token: CancellationToken) {
        let presenter: Weak<Self> = Arc::downgrade(self);
        let linger = self.config.auto_dismiss();
        let fade = self.config.fade();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(linger) => {}
            }
            match presenter.upgrade() {
                Some(p) if p.begin_fade(host_id, id) => {}
                _ => return,
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(fade) => {}
            }
            if let Some(p) = presenter.upgrade() {
                p.remove_if_current(host_id, id);
            }
        });
    }

    fn begin_fade(&self, host_id: HostId, id: OverlayId) -> bool {
        let host = match self.lock().get(&host_id) {
            Some(entry) if entry.id == id => Arc::clone(&entry.host),
            _ => return false,
        };
        if !host.is_connected() {
            self.forget_if_current(host_id, id);
            return false;
        }
        host.fade_overlay(id);
        true
    }

    /// Drop the map entry without touching the host
    fn forget_if_current(&self, host_id: HostId, id: OverlayId) -> bool {
        let mut overlays = self.lock();
        match overlays.get(&host_id) {
            Some(entry) if entry.id == id => {
                if let Some(token) = &entry.dismiss {
                    token.cancel();
                }
                overlays.remove(&host_id);
                true
            }
            _ => false,
        }
    }

    fn remove_if_current(&self, host_id: HostId, id: OverlayId) {
        let removed = {
            let mut overlays = self.lock();
            if overlays.get(&host_id).is_some_and(|entry| entry.id == id) {
                overlays.remove(&host_id)
            } else {
                None
            }
        };
        if let Some(entry) = removed {
            tracing::debug!("Auto-dismissed {}", id);
            entry.teardown();
        }
    }

    /// Flip the reasons panel. Returns the new expanded state.
    pub fn toggle(&self, id: OverlayId) -> Option<bool> {
        let (host, expanded) = {
            let mut overlays = self.lock();
            let entry = overlays.values_mut().find(|entry| entry.id == id)?;
            entry.expanded = !entry.expanded;
            (Arc::clone(&entry.host), entry.expanded)
        };
        host.set_overlay_expanded(id, expanded);
        Some(expanded)
    }

    /// Remove unconditionally, cancelling any pending dismissal
    pub fn close(&self, id: OverlayId) -> bool {
        let removed = {
            let mut overlays = self.lock();
            let host_id = overlays
                .iter()
                .find_map(|(host_id, entry)| (entry.id == id).then_some(*host_id));
            host_id.and_then(|host_id| overlays.remove(&host_id))
        };

        match removed {
            Some(entry) => {
                tracing::debug!("Closed {}", id);
                entry.teardown();
                true
            }
            None => false,
        }
    }

    /// Forget overlays whose container left the document
    pub fn prune(&self) -> usize {
        let tracked: Vec<(HostId, OverlayId, Arc<dyn OverlayHost>)> = self
            .lock()
            .iter()
            .map(|(host_id, entry)| (*host_id, entry.id, Arc::clone(&entry.host)))
            .collect();

        let pruned = tracked
            .into_iter()
            .filter(|(_, _, host)| !host.is_connected())
            .filter(|(host_id, id, _)| self.forget_if_current(*host_id, *id))
            .count();
        if pruned > 0 {
            tracing::debug!("Pruned {} detached overlay(s)", pruned);
        }
        pruned
    }

    /// Tear down every overlay and cancel every timer
    pub fn clear(&self) {
        let drained: Vec<OverlayEntry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            entry.teardown();
        }
    }

    pub fn overlay_for(&self, host_id: HostId) -> Option<OverlayId> {
        self.lock().get(&host_id).map(|entry| entry.id)
    }

    pub fn is_expanded(&self, id: OverlayId) -> Option<bool> {
        self.lock()
            .values()
            .find(|entry| entry.id == id)
            .map(|entry| entry.expanded)
    }

    pub fn overlay_count(&self) -> usize {
        self.lock().len()
    }
}
