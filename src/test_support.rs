//! In-memory fakes for the host document and the classification service

use crate::classifier::{Classifier, HealthStatus, LocatorRequest, ServiceResponse, UploadRequest};
use crate::dispatcher::{AnalysisVerdict, DetectionNotifier};
use crate::document::{
    Document, HostId, MediaElement, MediaKind, MutationBatch, OverlayHost, RawFrame, Rect,
};
use crate::error::{DetectError, DetectResult};
use crate::fingerprint::Fingerprint;
use crate::overlay::{OverlayId, OverlayView};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

// ============================================================================
// Document
// ============================================================================

pub struct FakeDocument {
    location: Mutex<String>,
    viewport_height: f64,
    elements: Mutex<Vec<Arc<FakeElement>>>,
    mutations: broadcast::Sender<MutationBatch>,
}

impl FakeDocument {
    pub fn new(location: &str) -> Arc<Self> {
        let (mutations, _) = broadcast::channel(16);
        Arc::new(Self {
            location: Mutex::new(location.to_string()),
            viewport_height: 800.0,
            elements: Mutex::new(Vec::new()),
            mutations,
        })
    }

    pub fn add(&self, element: Arc<FakeElement>) {
        self.elements.lock().unwrap().push(element);
        self.mutate();
    }

    pub fn clear(&self) {
        self.elements.lock().unwrap().clear();
        self.mutate();
    }

    /// Change the location the way a single-page app does
    pub fn navigate(&self, location: &str) {
        *self.location.lock().unwrap() = location.to_string();
        self.mutate();
    }

    pub fn mutate(&self) {
        let _ = self.mutations.send(MutationBatch);
    }
}

impl Document for FakeDocument {
    fn location(&self) -> String {
        self.location.lock().unwrap().clone()
    }

    fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    fn media_elements(&self) -> Vec<Arc<dyn MediaElement>> {
        self.elements
            .lock()
            .unwrap()
            .iter()
            .map(|e| Arc::clone(e) as Arc<dyn MediaElement>)
            .collect()
    }

    fn subscribe_mutations(&self) -> broadcast::Receiver<MutationBatch> {
        self.mutations.subscribe()
    }
}

// ============================================================================
// Media elements
// ============================================================================

pub struct FakeElement {
    kind: MediaKind,
    src: Option<String>,
    data_src: Option<String>,
    rect: Rect,
    classes: Vec<String>,
    host: Option<Arc<dyn OverlayHost>>,
    frame: Option<RawFrame>,
    loaded: watch::Sender<bool>,
    connected: AtomicBool,
}

impl FakeElement {
    pub fn image(src: &str) -> FakeElementBuilder {
        FakeElementBuilder::new(MediaKind::Image, src)
    }

    pub fn video(src: &str) -> FakeElementBuilder {
        FakeElementBuilder::new(MediaKind::Video, src)
    }

    /// Fire the decoded-data signal
    pub fn finish_loading(&self) {
        self.loaded.send_replace(true);
    }

    pub fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

pub struct FakeElementBuilder {
    kind: MediaKind,
    src: String,
    data_src: Option<String>,
    rect: Rect,
    classes: Vec<String>,
    host: Option<Arc<dyn OverlayHost>>,
}

impl FakeElementBuilder {
    fn new(kind: MediaKind, src: &str) -> Self {
        Self {
            kind,
            src: src.to_string(),
            data_src: None,
            rect: Rect::new(0.0, 0.0, 300.0, 300.0),
            classes: Vec::new(),
            host: None,
        }
    }

    pub fn data_src(mut self, data_src: &str) -> Self {
        self.data_src = Some(data_src.to_string());
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    /// Class attributes, nearest first
    pub fn classes(mut self, classes: &[&str]) -> Self {
        self.classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn host<H: OverlayHost + 'static>(mut self, host: &Arc<H>) -> Self {
        self.host = Some(Arc::clone(host) as Arc<dyn OverlayHost>);
        self
    }

    pub fn build(self) -> Arc<FakeElement> {
        let is_video = self.kind == MediaKind::Video;
        let (loaded, _) = watch::channel(!is_video);
        let frame = is_video.then(|| RawFrame {
            width: 8,
            height: 8,
            rgba: vec![96; 8 * 8 * 4],
        });

        Arc::new(FakeElement {
            kind: self.kind,
            src: Some(self.src),
            data_src: self.data_src,
            rect: self.rect,
            classes: self.classes,
            host: self.host,
            frame,
            loaded,
            connected: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl MediaElement for FakeElement {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn src(&self) -> Option<String> {
        self.src.clone()
    }

    fn data_src(&self) -> Option<String> {
        self.data_src.clone()
    }

    fn bounding_rect(&self) -> Rect {
        self.rect
    }

    fn class_chain(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn container(&self) -> Option<Arc<dyn OverlayHost>> {
        self.host.clone()
    }

    async fn loaded_data(&self) {
        let mut loaded = self.loaded.subscribe();
        loop {
            let ready = *loaded.borrow_and_update();
            if ready || loaded.changed().await.is_err() {
                return;
            }
        }
    }

    fn capture_frame(&self) -> Option<RawFrame> {
        self.frame.clone()
    }
}

// ============================================================================
// Overlay hosts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Position,
    Mount(OverlayId),
    Expand(OverlayId, bool),
    Fade(OverlayId),
    Unmount(OverlayId),
}

pub struct FakeHost {
    id: HostId,
    connected: AtomicBool,
    positioned: AtomicBool,
    calls: Mutex<Vec<HostCall>>,
    mounted: Mutex<Vec<OverlayId>>,
    views: Mutex<Vec<OverlayView>>,
}

impl FakeHost {
    pub fn new(id: HostId) -> Arc<Self> {
        Arc::new(Self {
            id,
            connected: AtomicBool::new(true),
            positioned: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            mounted: Mutex::new(Vec::new()),
            views: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mounted(&self) -> Vec<OverlayId> {
        self.mounted.lock().unwrap().clone()
    }

    pub fn last_view(&self) -> Option<OverlayView> {
        self.views.lock().unwrap().last().cloned()
    }

    pub fn is_positioned(&self) -> bool {
        self.positioned.load(Ordering::SeqCst)
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl OverlayHost for FakeHost {
    fn host_id(&self) -> HostId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn establish_positioning_context(&self) {
        self.positioned.store(true, Ordering::SeqCst);
        self.record(HostCall::Position);
    }

    fn mount_overlay(&self, view: &OverlayView) {
        self.mounted.lock().unwrap().push(view.id);
        self.views.lock().unwrap().push(view.clone());
        self.record(HostCall::Mount(view.id));
    }

    fn set_overlay_expanded(&self, id: OverlayId, expanded: bool) {
        self.record(HostCall::Expand(id, expanded));
    }

    fn fade_overlay(&self, id: OverlayId) {
        self.record(HostCall::Fade(id));
    }

    fn unmount_overlay(&self, id: OverlayId) {
        self.mounted.lock().unwrap().retain(|m| *m != id);
        self.record(HostCall::Unmount(id));
    }
}

// ============================================================================
// Classification service
// ============================================================================

type FailureFn = Arc<dyn Fn() -> DetectError + Send + Sync>;

#[derive(Default)]
struct Script {
    response: ServiceResponse,
    failure: Option<FailureFn>,
    latency: Duration,
}

#[derive(Default)]
pub struct FakeClassifier {
    script: Mutex<Script>,
    locator_requests: Mutex<Vec<LocatorRequest>>,
    request_times: Mutex<Vec<Instant>>,
    uploads: Mutex<Vec<UploadRequest>>,
}

impl FakeClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond_with(&self, response: ServiceResponse) {
        let mut script = self.script.lock().unwrap();
        script.response = response;
        script.failure = None;
    }

    pub fn fail_with(&self, failure: impl Fn() -> DetectError + Send + Sync + 'static) {
        self.script.lock().unwrap().failure = Some(Arc::new(failure));
    }

    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().unwrap().latency = latency;
    }

    pub fn locator_requests(&self) -> Vec<LocatorRequest> {
        self.locator_requests.lock().unwrap().clone()
    }

    /// When each locator request arrived, on the tokio clock
    pub fn request_times(&self) -> Vec<Instant> {
        self.request_times.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.jpeg.clone())
            .collect()
    }

    pub fn upload_sources(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.source.clone())
            .collect()
    }

    async fn reply(&self) -> DetectResult<ServiceResponse> {
        let (response, failure, latency) = {
            let script = self.script.lock().unwrap();
            (script.response.clone(), script.failure.clone(), script.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(failure) => Err(failure()),
            None => Ok(response),
        }
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify_locator(&self, request: &LocatorRequest) -> DetectResult<ServiceResponse> {
        self.locator_requests.lock().unwrap().push(request.clone());
        self.request_times.lock().unwrap().push(Instant::now());
        self.reply().await
    }

    async fn classify_upload(&self, request: UploadRequest) -> DetectResult<ServiceResponse> {
        self.uploads.lock().unwrap().push(request);
        self.reply().await
    }

    async fn health(&self) -> DetectResult<HealthStatus> {
        Ok(HealthStatus {
            status: "ok".to_string(),
        })
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    scanned: AtomicU64,
    high_risk: Mutex<Vec<Fingerprint>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::SeqCst)
    }

    pub fn high_risk(&self) -> Vec<Fingerprint> {
        self.high_risk.lock().unwrap().clone()
    }
}

impl DetectionNotifier for RecordingNotifier {
    fn media_scanned(&self) {
        self.scanned.fetch_add(1, Ordering::SeqCst);
    }

    fn high_risk_detected(&self, fingerprint: &Fingerprint, _verdict: &AnalysisVerdict) {
        self.high_risk.lock().unwrap().push(fingerprint.clone());
    }
}
