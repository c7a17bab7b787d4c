//! # Batch Orchestrator
//!
//! Dispatches the planned batch attempts to the page automation
//! collaborator, drains the responses each attempt intercepts, merges the
//! extracted records into the shared accumulator and writes snapshots.
//!
//! Per attempt:
//! 1. short-circuit if the target is already reached (or the run was
//!    cancelled), without claiming an offset
//! 2. claim the next offset and open the batch page
//! 3. keep draining intercepted responses through the settle delay
//! 4. close the page, drain what is left, snapshot if anything was added
//!
//! Nothing that goes wrong inside an attempt aborts the run, and the final
//! snapshot is always written.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::application::accumulator::SharedAccumulator;
use crate::application::plan::{BatchPlan, BatchRequest, OffsetCursor};
use crate::domain::{decode_payload, extract_records};
use crate::infrastructure::browser::{
    AutomationError, InterceptReceiver, InterceptedResponse, OpenPage, PageAutomation,
};
use crate::infrastructure::persistence::SnapshotSink;

/// Grace period for closing the page of a timed-out attempt.
const ABANDONED_PAGE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub scan_url: Url,

    /// Records requested per batch (pagination step)
    pub batch_size: usize,

    /// Unique records wanted
    pub target: usize,

    pub safety_multiplier: usize,

    /// Attempts allowed in flight at once
    pub max_concurrency: usize,

    /// Time an opened page is kept alive for late responses
    pub settle_delay: Duration,

    /// Upper bound for one whole attempt, `None` waits indefinitely
    pub request_handler_timeout: Option<Duration>,

    /// Substring a response URL must contain to be treated as a listing
    pub response_url_marker: String,
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The target was already reached or the run was cancelled
    Skipped,
    Completed { added: usize },
    Failed,
}

/// Run statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub attempts_planned: usize,
    pub attempts_dispatched: usize,
    pub attempts_skipped: usize,
    pub attempts_failed: usize,
    pub responses_seen: usize,
    pub malformed_payloads: usize,
    /// Unique records held by the accumulator at the end
    pub collected: usize,
    /// Records in the final snapshot, `None` if the final write failed
    pub written: Option<usize>,
    pub target_reached: bool,
}

#[derive(Debug, Default)]
struct RunCounters {
    responses_seen: AtomicUsize,
    malformed_payloads: AtomicUsize,
}

pub struct BatchOrchestrator<A: ?Sized, S: ?Sized> {
    automation: Arc<A>,
    sink: Arc<S>,
    accumulator: SharedAccumulator,
    plan: BatchPlan,
    cursor: OffsetCursor,
    config: OrchestratorConfig,
    cancellation_token: CancellationToken,
    counters: RunCounters,
}

impl<A, S> BatchOrchestrator<A, S>
where
    A: PageAutomation + ?Sized,
    S: SnapshotSink + ?Sized,
{
    pub fn new(
        automation: Arc<A>,
        sink: Arc<S>,
        accumulator: SharedAccumulator,
        config: OrchestratorConfig,
    ) -> Self {
        let plan = BatchPlan::new(
            config.scan_url.clone(),
            config.target,
            config.batch_size,
            config.safety_multiplier,
        );
        let cursor = plan.cursor();

        Self {
            automation,
            sink,
            accumulator,
            plan,
            cursor,
            config,
            cancellation_token: CancellationToken::new(),
            counters: RunCounters::default(),
        }
    }

    /// Use an externally controlled token (e.g. cancelled on Ctrl-C).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub const fn plan(&self) -> &BatchPlan {
        &self.plan
    }

    /// Run every planned attempt, then write the final snapshot.
    pub async fn run(&self) -> RunSummary {
        let attempts_planned = self.plan.batch_count();
        info!(
            "🔗 Dispatching up to {} batch attempts ({} per batch, target {}, concurrency {})",
            attempts_planned,
            self.plan.batch_size(),
            self.config.target,
            self.config.max_concurrency
        );

        let outcomes: Vec<AttemptOutcome> = stream::iter(0..attempts_planned)
            .map(|index| self.run_attempt(index))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        self.finish(attempts_planned, &outcomes).await
    }

    /// Write the final snapshot and assemble the summary.
    async fn finish(&self, attempts_planned: usize, outcomes: &[AttemptOutcome]) -> RunSummary {
        let mut summary = RunSummary {
            attempts_planned,
            ..RunSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                AttemptOutcome::Skipped => summary.attempts_skipped += 1,
                AttemptOutcome::Completed { .. } => summary.attempts_dispatched += 1,
                AttemptOutcome::Failed => {
                    summary.attempts_dispatched += 1;
                    summary.attempts_failed += 1;
                }
            }
        }

        let snapshot = self.accumulator.snapshot().await;
        summary.responses_seen = self.counters.responses_seen.load(Ordering::Relaxed);
        summary.malformed_payloads = self.counters.malformed_payloads.load(Ordering::Relaxed);
        summary.collected = self.accumulator.len().await;
        summary.target_reached = self.accumulator.is_done().await;

        summary.written = match self.sink.write_snapshot(&snapshot).await {
            Ok(written) => {
                info!("📁 Final saved {} tokens", written);
                Some(written)
            }
            Err(e) => {
                error!("❌ Final snapshot write failed: {}", e);
                None
            }
        };

        if !summary.target_reached {
            warn!(
                "Target of {} not reached: collected {} unique tokens over {} dispatched attempts",
                self.config.target, summary.collected, summary.attempts_dispatched
            );
        }

        summary
    }

    async fn should_stop(&self) -> bool {
        self.cancellation_token.is_cancelled() || self.accumulator.is_done().await
    }

    async fn run_attempt(&self, index: usize) -> AttemptOutcome {
        if self.should_stop().await {
            debug!("Batch #{} skipped: run already complete", index);
            return AttemptOutcome::Skipped;
        }

        let request = self.plan.request(index, self.cursor.claim());

        let mut page = None;
        let result = match self.config.request_handler_timeout {
            Some(limit) => {
                let bounded = timeout(limit, self.execute(&request, &mut page)).await;
                if let Ok(result) = bounded {
                    result
                } else {
                    if let Some(page) = page.take() {
                        self.close_abandoned(page, &request).await;
                    }
                    Err(AutomationError::Timeout {
                        url: request.url.clone(),
                        limit,
                    })
                }
            }
            None => self.execute(&request, &mut page).await,
        };

        match result {
            Ok(added) => {
                if added > 0 {
                    self.save_snapshot(&request).await;
                } else {
                    debug!("Batch #{} (offset {}) added no new tokens", request.index, request.offset);
                }
                AttemptOutcome::Completed { added }
            }
            Err(e) => {
                error!("❌ Batch attempt #{} failed: {}", request.index, e);
                AttemptOutcome::Failed
            }
        }
    }

    /// Open the page, keep it through the settle delay, drain everything it
    /// intercepted. Returns the number of new records.
    ///
    /// The open page lives in `slot` so a timed-out attempt can still close it.
    async fn execute(
        &self,
        request: &BatchRequest,
        slot: &mut Option<Box<dyn OpenPage>>,
    ) -> Result<usize, AutomationError> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut added = 0;

        // Responses can arrive while navigation is still in progress.
        let opened = {
            let open = self.automation.open(request, sender);
            tokio::pin!(open);
            loop {
                tokio::select! {
                    result = &mut open => break result?,
                    Some(response) = receiver.recv() => {
                        added += self.handle_response(&response).await;
                    }
                }
            }
        };
        *slot = Some(opened);

        let settle_deadline = Instant::now() + self.config.settle_delay;
        loop {
            tokio::select! {
                () = sleep_until(settle_deadline) => break,
                message = receiver.recv() => match message {
                    Some(response) => added += self.handle_response(&response).await,
                    None => {
                        sleep_until(settle_deadline).await;
                        break;
                    }
                },
            }
        }

        if let Some(page) = slot.take() {
            if let Err(e) = page.close().await {
                warn!("Closing page for batch #{} failed: {}", request.index, e);
            }
        }
        added += self.drain_remaining(&mut receiver).await;

        Ok(added)
    }

    async fn close_abandoned(&self, page: Box<dyn OpenPage>, request: &BatchRequest) {
        match timeout(ABANDONED_PAGE_CLOSE_TIMEOUT, page.close()).await {
            Ok(Ok(())) => debug!("Closed page of timed-out batch #{}", request.index),
            Ok(Err(e)) => warn!("Closing page of timed-out batch #{} failed: {}", request.index, e),
            Err(_) => warn!("Page of timed-out batch #{} did not close in time", request.index),
        }
    }

    async fn drain_remaining(&self, receiver: &mut InterceptReceiver) -> usize {
        let mut added = 0;
        while let Some(response) = receiver.recv().await {
            added += self.handle_response(&response).await;
        }
        added
    }

    /// Filter, decode, extract and merge one response. Returns new records.
    async fn handle_response(&self, response: &InterceptedResponse) -> usize {
        if !response.url.contains(&self.config.response_url_marker) {
            debug!("Ignoring non-listing response: {}", response.url);
            return 0;
        }
        self.counters.responses_seen.fetch_add(1, Ordering::Relaxed);

        let payload = match decode_payload(&response.url, &response.body) {
            Ok(payload) => payload,
            Err(e) => {
                self.counters.malformed_payloads.fetch_add(1, Ordering::Relaxed);
                warn!("❌ Error processing response: {}", e);
                return 0;
            }
        };

        let extraction = extract_records(&payload);
        if !extraction.is_found() {
            self.counters.malformed_payloads.fetch_add(1, Ordering::Relaxed);
            warn!("❌ No token array in response from {}", response.url);
            return 0;
        }

        let records = extraction.records();
        let outcome = self.accumulator.merge(records).await;
        if outcome.skipped > 0 {
            debug!("{} records without identifier skipped", outcome.skipped);
        }
        if outcome.added > 0 {
            info!(
                "✅ Captured batch: {} tokens, new: {}, total: {}",
                records.len(),
                outcome.added,
                outcome.total
            );
        }

        outcome.added
    }

    async fn save_snapshot(&self, request: &BatchRequest) {
        let snapshot = self.accumulator.snapshot().await;
        match self.sink.write_snapshot(&snapshot).await {
            Ok(written) => debug!("Snapshot after batch #{}: {} tokens", request.index, written),
            Err(e) => error!("❌ Snapshot write failed after batch #{}: {}", request.index, e),
        }
    }
}
