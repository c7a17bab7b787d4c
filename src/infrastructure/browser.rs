//! Page automation over a headless Chromium
//!
//! The orchestrator only sees [`PageAutomation`]: open a page for a batch
//! request, receive intercepted listing responses on a channel, close the
//! page. [`ChromiumAutomation`] implements it with chromiumoxide by watching
//! `Network.responseReceived` / `Network.loadingFinished` and pulling the
//! body of every matching response. After navigation a page is only handed
//! back once the network has been quiet for [`NETWORK_QUIET_WINDOW`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::plan::BatchRequest;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Page operation failed for {url}: {message}")]
    Page { url: String, message: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Response interception failed for {url}: {message}")]
    Interception { url: String, message: String },

    #[error("Batch attempt for {url} timed out after {limit:?}")]
    Timeout { url: String, limit: Duration },
}

/// A network response intercepted while a batch page was open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedResponse {
    pub url: String,
    pub body: String,
}

pub type InterceptSender = mpsc::UnboundedSender<InterceptedResponse>;
pub type InterceptReceiver = mpsc::UnboundedReceiver<InterceptedResponse>;

/// A page kept open until the orchestrator has let it settle.
#[async_trait]
pub trait OpenPage: Send {
    /// Stop interception and release the page.
    async fn close(self: Box<Self>) -> Result<(), AutomationError>;
}

/// Executes batch requests and reports the responses they trigger.
#[async_trait]
pub trait PageAutomation: Send + Sync {
    /// Open a page for `request`, navigate, and wait for it to load.
    ///
    /// Intercepted responses go to `sink` until the returned page is closed;
    /// implementations must drop `sink` by the time `close` returns.
    async fn open(
        &self,
        request: &BatchRequest,
        sink: InterceptSender,
    ) -> Result<Box<dyn OpenPage>, AutomationError>;
}

/// No request may be in flight for this long before a page counts as idle.
pub const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Substring identifying listing responses worth forwarding
    pub response_url_marker: String,
    /// Longest wait for network idle after navigation
    pub network_idle_timeout: Duration,
}

/// chromiumoxide-backed [`PageAutomation`].
pub struct ChromiumAutomation {
    browser: Browser,
    handler_task: JoinHandle<()>,
    marker: Arc<str>,
    network_idle_timeout: Duration,
}

impl ChromiumAutomation {
    pub async fn launch(options: &BrowserOptions) -> Result<Self, AutomationError> {
        let mut builder = BrowserConfig::builder().no_sandbox();
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(AutomationError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AutomationError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("chromiumoxide handler event error: {}", e);
                }
            }
        });

        info!("🌐 Browser launched (headless: {})", options.headless);

        Ok(Self {
            browser,
            handler_task,
            marker: Arc::from(options.response_url_marker.as_str()),
            network_idle_timeout: options.network_idle_timeout,
        })
    }

    /// Close the browser and wait for its handler to stop.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process wait failed: {}", e);
        }
        self.handler_task.abort();
    }
}

#[async_trait]
impl PageAutomation for ChromiumAutomation {
    async fn open(
        &self,
        request: &BatchRequest,
        sink: InterceptSender,
    ) -> Result<Box<dyn OpenPage>, AutomationError> {
        let page_error = |e: chromiumoxide::error::CdpError| AutomationError::Page {
            url: request.url.clone(),
            message: e.to_string(),
        };

        let page = self.browser.new_page("about:blank").await.map_err(page_error)?;
        page.execute(EnableParams::default()).await.map_err(page_error)?;

        let interception_error = |e: chromiumoxide::error::CdpError| AutomationError::Interception {
            url: request.url.clone(),
            message: e.to_string(),
        };
        let requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(interception_error)?;
        let responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(interception_error)?;
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(interception_error)?;
        let failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(interception_error)?;

        let stop = CancellationToken::new();
        let (inflight_tx, mut inflight_rx) = watch::channel(0);
        let forwarder = tokio::spawn(forward_responses(
            page.clone(),
            ResponseTracker::new(Arc::clone(&self.marker)),
            ResponseStreams {
                requests,
                responses,
                finished,
                failed,
            },
            Forwarding {
                sink,
                inflight: inflight_tx,
                stop: stop.clone(),
            },
        ));

        let opened = ChromiumPage {
            page,
            stop,
            forwarder,
            url: request.url.clone(),
            closed: false,
        };

        debug!("Navigating batch #{} to {}", request.index, request.url);
        if let Err(e) = opened.page.goto(request.url.as_str()).await {
            let err = AutomationError::Navigation {
                url: request.url.clone(),
                message: e.to_string(),
            };
            if let Err(close_err) = Box::new(opened).close().await {
                debug!("Closing page after failed navigation: {}", close_err);
            }
            return Err(err);
        }

        let idle = timeout(
            self.network_idle_timeout,
            wait_for_network_idle(&mut inflight_rx, NETWORK_QUIET_WINDOW),
        )
        .await;
        if idle.is_err() {
            debug!(
                "Batch #{} network still busy after {:?}, continuing",
                request.index, self.network_idle_timeout
            );
        }

        Ok(Box::new(opened))
    }
}

/// Resolve once `inflight` has stayed at zero for `quiet`, or once the
/// forwarder publishing it is gone.
pub async fn wait_for_network_idle(inflight: &mut watch::Receiver<usize>, quiet: Duration) {
    loop {
        let busy = *inflight.borrow_and_update() > 0;
        if busy {
            if inflight.changed().await.is_err() {
                return;
            }
            continue;
        }

        match timeout(quiet, inflight.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => return,
        }
    }
}

struct ChromiumPage {
    page: Page,
    stop: CancellationToken,
    forwarder: JoinHandle<()>,
    url: String,
    closed: bool,
}

#[async_trait]
impl OpenPage for ChromiumPage {
    async fn close(mut self: Box<Self>) -> Result<(), AutomationError> {
        // Let in-progress body fetches finish before the page goes away.
        self.stop.cancel();
        if let Err(e) = (&mut self.forwarder).await {
            debug!("Response forwarder for {} ended abnormally: {}", self.url, e);
        }

        self.closed = true;
        self.page.clone().close().await.map_err(|e| AutomationError::Page {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        // A timed-out attempt drops the page without closing it.
        self.stop.cancel();
        if self.closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let page = self.page.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            if let Err(e) = page.close().await {
                debug!("Closing abandoned page {} failed: {}", url, e);
            }
        });
    }
}

struct ResponseStreams {
    requests: EventStream<EventRequestWillBeSent>,
    responses: EventStream<EventResponseReceived>,
    finished: EventStream<EventLoadingFinished>,
    failed: EventStream<EventLoadingFailed>,
}

struct Forwarding {
    sink: InterceptSender,
    inflight: watch::Sender<usize>,
    stop: CancellationToken,
}

/// Per-page bookkeeping of network requests.
///
/// Every request counts as in flight until it finishes or fails. Requests
/// whose response URL contains the marker are remembered so their body can
/// be fetched on `loadingFinished`.
#[derive(Debug)]
pub struct ResponseTracker {
    marker: Arc<str>,
    inflight: HashSet<String>,
    completed: HashSet<String>,
    listings: HashMap<String, String>,
}

impl ResponseTracker {
    pub fn new(marker: Arc<str>) -> Self {
        Self {
            marker,
            inflight: HashSet::new(),
            completed: HashSet::new(),
            listings: HashMap::new(),
        }
    }

    pub fn request_started(&mut self, request_id: &str) {
        // Event streams are polled independently, so a completion can be
        // seen before its start.
        if !self.completed.contains(request_id) {
            self.inflight.insert(request_id.to_string());
        }
    }

    /// Returns whether the response is a listing worth fetching.
    pub fn response_received(&mut self, request_id: &str, url: &str) -> bool {
        if !url.contains(&*self.marker) || self.completed.contains(request_id) {
            return false;
        }
        self.listings.insert(request_id.to_string(), url.to_string());
        true
    }

    /// URL of the listing whose body is now available, if any.
    pub fn loading_finished(&mut self, request_id: &str) -> Option<String> {
        self.complete(request_id);
        self.listings.remove(request_id)
    }

    /// URL of the listing that will never deliver a body, if any.
    pub fn loading_failed(&mut self, request_id: &str) -> Option<String> {
        self.complete(request_id);
        self.listings.remove(request_id)
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    fn complete(&mut self, request_id: &str) {
        self.inflight.remove(request_id);
        self.completed.insert(request_id.to_string());
    }
}

/// Pair `responseReceived` with `loadingFinished` for marker URLs, then
/// fetch and forward the body.
async fn forward_responses(
    page: Page,
    mut tracker: ResponseTracker,
    mut streams: ResponseStreams,
    forwarding: Forwarding,
) {
    let Forwarding {
        sink,
        inflight,
        stop,
    } = forwarding;

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            Some(event) = streams.requests.next() => {
                tracker.request_started(event.request_id.inner());
            }
            Some(event) = streams.responses.next() => {
                tracker.response_received(event.request_id.inner(), &event.response.url);
            }
            Some(event) = streams.finished.next() => {
                if let Some(url) = tracker.loading_finished(event.request_id.inner()) {
                    match fetch_body(&page, event.request_id.clone()).await {
                        Ok(body) => {
                            if sink.send(InterceptedResponse { url, body }).is_err() {
                                break;
                            }
                        }
                        Err(message) => warn!("❌ Failed to read response body from {}: {}", url, message),
                    }
                }
            }
            Some(event) = streams.failed.next() => {
                if let Some(url) = tracker.loading_failed(event.request_id.inner()) {
                    debug!("Listing request failed before completion: {} ({})", url, event.error_text);
                }
            }
            else => break,
        }

        let count = tracker.inflight();
        inflight.send_if_modified(|current| {
            let changed = *current != count;
            *current = count;
            changed
        });
    }
}

async fn fetch_body(page: &Page, request_id: RequestId) -> Result<String, String> {
    let response = page
        .execute(GetResponseBodyParams::new(request_id))
        .await
        .map_err(|e| e.to_string())?;

    decode_body(&response.result.body, response.result.base64_encoded)
}

/// Turn a CDP response body into text.
pub fn decode_body(body: &str, base64_encoded: bool) -> Result<String, String> {
    if !base64_encoded {
        return Ok(body.to_string());
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body.as_bytes())
        .map_err(|e| format!("base64 decode failed: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("body is not UTF-8: {e}"))
}
