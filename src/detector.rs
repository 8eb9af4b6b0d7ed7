//! Detector lifecycle
//!
//! One `Detector` per document. It owns every piece of scan state (periodic
//! timer, processed set, last seen location) and wires the stages together:
//!
//! ```text
//! tick ──► MediaScanner ──mpsc──► dispatch pump ──► AnalysisDispatcher
//!                                                        │
//! mutations ──► NavigationWatcher ──► epoch reset        ▼
//!                                              OverlayPresenter
//! ```
//!
//! Background tasks hold weak references back to the detector, so dropping
//! the last handle cancels everything.

use crate::classifier::{Classifier, HealthStatus, HttpClassifier};
use crate::config::{DeepTrustConfig, ExtensionStats, StatsStore};
use crate::dispatcher::AnalysisDispatcher;
use crate::document::Document;
use crate::error::DetectResult;
use crate::events_bus::{DetectorEvent, EventBus, EventEntry, StatsNotifier};
use crate::navigation::{NavigationChange, NavigationWatcher};
use crate::overlay::{OverlayId, OverlayPresenter};
use crate::scanner::{MediaCandidate, MediaScanner, ScanEpoch, SharedProcessedSet};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a dispatched candidate needs once it leaves the scanner
#[derive(Clone)]
struct DispatchContext {
    dispatcher: Arc<AnalysisDispatcher>,
    presenter: Arc<OverlayPresenter>,
    processed: SharedProcessedSet,
    document: Arc<dyn Document>,
}

impl DispatchContext {
    async fn deliver(&self, candidate: MediaCandidate) {
        let source = self.document.hostname();
        let Some(verdict) = self
            .dispatcher
            .submit(&candidate, &source, &self.processed)
            .await
        else {
            return;
        };

        if !self.processed.is_current(candidate.epoch) {
            tracing::debug!(
                "Dropping verdict for {} from stale {}",
                candidate.fingerprint,
                candidate.epoch
            );
            return;
        }

        match candidate.element().filter(|element| element.is_connected()) {
            Some(element) => {
                self.presenter
                    .present(element.as_ref(), &candidate.fingerprint, &verdict);
            }
            None => {
                tracing::debug!("Element for {} left the document", candidate.fingerprint);
            }
        }
    }
}

/// Drain discovered candidates; each one is dispatched independently
async fn dispatch_pump(
    mut candidates: mpsc::UnboundedReceiver<MediaCandidate>,
    context: DispatchContext,
    shutdown: CancellationToken,
) {
    loop {
        let candidate = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = candidates.recv() => match next {
                Some(candidate) => candidate,
                None => break,
            },
        };

        let context = context.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = context.deliver(candidate) => {}
            }
        });
    }
    tracing::debug!("Dispatch pump stopped");
}

struct DetectorInner {
    config: DeepTrustConfig,
    document: Arc<dyn Document>,
    scanner: MediaScanner,
    processed: SharedProcessedSet,
    dispatcher: Arc<AnalysisDispatcher>,
    presenter: Arc<OverlayPresenter>,
    navigation: Arc<NavigationWatcher>,
    stats: Arc<StatsStore>,
    events: EventBus,
    candidates: mpsc::UnboundedSender<MediaCandidate>,
    ticker: Mutex<Option<CancellationToken>>,
    settle: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    passes: AtomicU64,
}

impl Drop for DetectorInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl DetectorInner {
    fn start(self: &Arc<Self>) -> bool {
        if self.shutdown.is_cancelled() {
            tracing::warn!("Detector is shut down, not starting");
            return false;
        }

        let token = {
            let mut ticker = lock(&self.ticker);
            if ticker.is_some() {
                tracing::debug!("Scanning already running");
                return false;
            }
            let token = self.shutdown.child_token();
            *ticker = Some(token.clone());
            token
        };

        let period = self.config.scan.interval();
        tracing::info!("Scanning started ({:?} interval)", period);
        self.scan_pass();

        let detector = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match detector.upgrade() {
                    Some(inner) => {
                        inner.scan_pass();
                    }
                    None => break,
                }
            }
        });
        true
    }

    fn stop(&self) -> bool {
        match lock(&self.ticker).take() {
            Some(token) => {
                token.cancel();
                tracing::info!("Scanning stopped");
                true
            }
            None => false,
        }
    }

    fn restart(self: &Arc<Self>) {
        self.stop();
        self.start();
    }

    /// Prune detached overlays, discover, and hand candidates to the pump
    fn scan_pass(&self) -> usize {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.presenter.prune();

        let candidates = self.scanner.scan(self.document.as_ref());
        let discovered = candidates.len();
        for candidate in candidates {
            if self.candidates.send(candidate).is_err() {
                tracing::warn!("Dispatch pump is gone, dropping candidates");
                break;
            }
        }
        discovered
    }

    fn reset_epoch(&self, url: String) -> ScanEpoch {
        let epoch = self.processed.advance();
        tracing::info!("Processed set cleared, now at {}", epoch);
        self.events
            .publish(DetectorEvent::NavigationReset { epoch: epoch.0, url });
        epoch
    }

    fn on_navigation(self: &Arc<Self>, change: NavigationChange) {
        self.reset_epoch(change.to);

        let token = self.shutdown.child_token();
        if let Some(previous) = lock(&self.settle).replace(token.clone()) {
            previous.cancel();
        }

        let settle = self.config.scan.navigation_settle();
        let detector = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(settle) => {}
            }
            if let Some(inner) = detector.upgrade() {
                tracing::debug!("Navigation settled, restarting scan");
                inner.restart();
            }
        });
    }
}

/// Handle to a running detector. Clones share state.
#[derive(Clone)]
pub struct Detector {
    inner: Arc<DetectorInner>,
}

impl Detector {
    /// Wire up a detector for `document` and spawn its background tasks.
    /// Scanning itself begins with [`Detector::start`].
    pub fn launch(
        config: DeepTrustConfig,
        document: Arc<dyn Document>,
        classifier: Arc<dyn Classifier>,
        stats: Arc<StatsStore>,
    ) -> Self {
        let events = EventBus::new();
        let processed = SharedProcessedSet::new();
        let notifier = Arc::new(StatsNotifier::new(Arc::clone(&stats), events.clone()));
        let dispatcher = Arc::new(AnalysisDispatcher::new(
            classifier,
            notifier,
            config.dispatch.clone(),
            config.service.request_timeout(),
        ));
        let presenter = Arc::new(OverlayPresenter::new(config.overlay.clone(), events.clone()));
        let navigation = Arc::new(NavigationWatcher::new(document.location()));
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = Arc::new(DetectorInner {
            scanner: MediaScanner::new(config.scan.clone(), processed.clone()),
            config,
            document: Arc::clone(&document),
            processed: processed.clone(),
            dispatcher: Arc::clone(&dispatcher),
            presenter: Arc::clone(&presenter),
            navigation: Arc::clone(&navigation),
            stats,
            events,
            candidates: tx,
            ticker: Mutex::new(None),
            settle: Mutex::new(None),
            shutdown: shutdown.clone(),
            passes: AtomicU64::new(0),
        });

        tokio::spawn(dispatch_pump(
            rx,
            DispatchContext {
                dispatcher,
                presenter,
                processed,
                document: Arc::clone(&document),
            },
            shutdown.clone(),
        ));

        let batches = document.subscribe_mutations();
        let detector: Weak<DetectorInner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            navigation
                .run(document, batches, shutdown, move |change| {
                    if let Some(inner) = detector.upgrade() {
                        inner.on_navigation(change);
                    }
                })
                .await;
        });

        tracing::info!("DeepTrust detector launched on {}", inner.document.hostname());
        Self { inner }
    }

    /// Launch against the HTTP service, with counters in the user config dir
    pub fn with_http_service(config: DeepTrustConfig, document: Arc<dyn Document>) -> Result<Self> {
        Self::with_http_service_at(config, document, StatsStore::default_path())
    }

    /// Launch against the HTTP service, with counters at `stats_path`
    pub fn with_http_service_at(
        config: DeepTrustConfig,
        document: Arc<dyn Document>,
        stats_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let stats = Arc::new(StatsStore::open(stats_path)?);
        let classifier = Arc::new(HttpClassifier::new(config.service.clone()));
        Ok(Self::launch(config, document, classifier, stats))
    }

    /// Run one pass now and arm the periodic timer. Returns false when a
    /// timer is already armed.
    pub fn start(&self) -> bool {
        self.inner.start()
    }

    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    pub fn restart(&self) {
        self.inner.restart();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.ticker).is_some()
    }

    /// Discovery pass outside the timer. Returns the number of new candidates.
    pub fn scan_now(&self) -> usize {
        self.inner.scan_pass()
    }

    /// Clear the processed set without a location change
    pub fn reset(&self) -> ScanEpoch {
        self.inner.reset_epoch(self.inner.document.location())
    }

    /// Settings toggle: persist the flag, notify, then start or stop
    pub fn set_enabled(&self, enabled: bool) -> Result<ExtensionStats> {
        let stats = self.inner.stats.set_enabled(enabled)?;
        self.inner
            .events
            .publish(DetectorEvent::StatsUpdated { stats });
        if enabled {
            self.start();
        } else {
            self.stop();
        }
        Ok(stats)
    }

    pub fn toggle_overlay(&self, id: OverlayId) -> Option<bool> {
        self.inner.presenter.toggle(id)
    }

    pub fn close_overlay(&self, id: OverlayId) -> bool {
        self.inner.presenter.close(id)
    }

    pub fn overlay_count(&self) -> usize {
        self.inner.presenter.overlay_count()
    }

    pub async fn health(&self) -> DetectResult<HealthStatus> {
        self.inner.dispatcher.health().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventEntry>> {
        self.inner.events.subscribe()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<Arc<EventEntry>> {
        self.inner.events.recent(limit)
    }

    pub fn stats(&self) -> ExtensionStats {
        self.inner.stats.snapshot()
    }

    pub fn epoch(&self) -> ScanEpoch {
        self.inner.processed.epoch()
    }

    pub fn last_url(&self) -> String {
        self.inner.navigation.last_url()
    }

    pub fn scan_passes(&self) -> u64 {
        self.inner.passes.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &DeepTrustConfig {
        &self.inner.config
    }

    /// Page unload: cancel every background task and remove overlays
    pub fn shutdown(&self) {
        self.inner.stop();
        if let Some(settle) = lock(&self.inner.settle).take() {
            settle.cancel();
        }
        self.inner.shutdown.cancel();
        self.inner.presenter.clear();
        tracing::info!("Detector shut down");
    }
}
