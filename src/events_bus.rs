//! Detector event bus
//!
//! Fans out rendered verdicts, counter updates and navigation resets to host
//! UIs, and keeps a bounded history of recent events for late subscribers.
//! Entries are Arc-wrapped so history reads only clone pointers.

use crate::config::{ExtensionStats, StatsStore};
use crate::dispatcher::{AnalysisVerdict, DetectionNotifier, RiskLevel};
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

const DEFAULT_MAX_EVENTS: usize = 300;
const CHANNEL_CAPACITY: usize = 64;

/// Events published by the detector. Serializes with an `action` tag so
/// `StatsUpdated` goes out as `{"action": "updateStats", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum DetectorEvent {
    #[serde(rename_all = "camelCase")]
    VerdictRendered {
        overlay_id: u64,
        fingerprint: String,
        confidence: u8,
        risk: RiskLevel,
        offline: bool,
    },
    #[serde(rename = "updateStats")]
    StatsUpdated { stats: ExtensionStats },
    #[serde(rename_all = "camelCase")]
    NavigationReset { epoch: u64, url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub id: String,
    pub timestamp: u64,
    pub event: DetectorEvent,
}

struct EventBusInner {
    sender: broadcast::Sender<Arc<EventEntry>>,
    history: RwLock<VecDeque<Arc<EventEntry>>>,
    max_events: usize,
    counter: AtomicU64,
}

/// Cheaply cloneable handle to one detector's event stream
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_events: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let max_events = max_events.max(1);
        Self {
            inner: Arc::new(EventBusInner {
                sender,
                history: RwLock::new(VecDeque::with_capacity(max_events)),
                max_events,
                counter: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event. Non-blocking, best-effort delivery.
    pub fn publish(&self, event: DetectorEvent) {
        let timestamp = crate::utils::current_timestamp();
        let counter = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(EventEntry {
            id: format!("event_{}_{}", timestamp, counter),
            timestamp,
            event,
        });

        if let Ok(mut history) = self.inner.history.write() {
            history.push_back(Arc::clone(&entry));
            while history.len() > self.inner.max_events {
                history.pop_front();
            }
        }

        // No subscribers is fine
        let _ = self.inner.sender.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventEntry>> {
        self.inner.sender.subscribe()
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<Arc<EventEntry>> {
        self.inner
            .history
            .read()
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.history.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Increments the persisted counters and fans out `updateStats`
pub struct StatsNotifier {
    store: Arc<StatsStore>,
    events: EventBus,
}

impl StatsNotifier {
    pub fn new(store: Arc<StatsStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    fn publish(&self, result: anyhow::Result<ExtensionStats>) {
        match result {
            Ok(stats) => self.events.publish(DetectorEvent::StatsUpdated { stats }),
            Err(e) => tracing::warn!("Failed to persist stats: {:#}", e),
        }
    }
}

impl DetectionNotifier for StatsNotifier {
    fn media_scanned(&self) {
        self.publish(self.store.increment_scanned());
    }

    fn high_risk_detected(&self, fingerprint: &Fingerprint, verdict: &AnalysisVerdict) {
        tracing::info!(
            "High-risk media detected ({}%): {}",
            verdict.confidence,
            fingerprint
        );
        self.publish(self.store.increment_detected());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_event(epoch: u64) -> DetectorEvent {
        DetectorEvent::NavigationReset {
            epoch,
            url: format!("https://example.org/{}", epoch),
        }
    }

    #[test]
    fn test_history_is_bounded_newest_first() {
        let bus = EventBus::with_capacity(3);
        for epoch in 0..5 {
            bus.publish(reset_event(epoch));
        }

        assert_eq!(bus.len(), 3);
        let recent = bus.recent(10);
        assert_eq!(recent[0].event, reset_event(4));
        assert_eq!(recent[2].event, reset_event(2));
    }

    #[test]
    fn test_update_stats_wire_shape() {
        let json = serde_json::to_value(DetectorEvent::StatsUpdated {
            stats: ExtensionStats::default(),
        })
        .unwrap();
        assert_eq!(json["action"], "updateStats");
        assert_eq!(json["stats"]["scannedImages"], 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(reset_event(7));

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.event, reset_event(7));
    }

    #[test]
    fn test_stats_notifier_counts_and_publishes() {
        let store = Arc::new(StatsStore::ephemeral());
        let bus = EventBus::new();
        let notifier = StatsNotifier::new(Arc::clone(&store), bus.clone());

        let verdict = AnalysisVerdict::new(91, vec![], false, RiskLevel::High);
        let fp = crate::fingerprint::FingerprintResolver::new().resolve("https://a.example/x.jpg");
        notifier.media_scanned();
        notifier.high_risk_detected(&fp, &verdict);

        let stats = store.snapshot();
        assert_eq!(stats.scanned_images, 1);
        assert_eq!(stats.detected_deepfakes, 1);
        assert_eq!(bus.len(), 2);
    }
}
