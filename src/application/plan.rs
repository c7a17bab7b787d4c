//! Batch planning: how many attempts to schedule and what each one requests.

use std::sync::atomic::{AtomicUsize, Ordering};

use url::Url;

/// One page load against the scan page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    /// Position in the plan (0-based), for logging
    pub index: usize,
    pub offset: usize,
    pub limit: usize,
    pub url: String,
}

/// Bounded sequence of candidate batches for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    scan_url: Url,
    batch_size: usize,
    batch_count: usize,
}

impl BatchPlan {
    /// `ceil(target / batch_size) * safety_multiplier` attempts, saturating
    /// at `usize::MAX`.
    ///
    /// The multiplier pads the plan for batches that yield nothing new
    /// (overlap, rate limiting, malformed payloads).
    pub fn new(scan_url: Url, target: usize, batch_size: usize, safety_multiplier: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            scan_url,
            batch_size,
            batch_count: Self::attempt_count(target, batch_size, safety_multiplier)
                .unwrap_or(usize::MAX),
        }
    }

    /// Planned attempts, `None` when the product overflows.
    pub fn attempt_count(target: usize, batch_size: usize, safety_multiplier: usize) -> Option<usize> {
        target.div_ceil(batch_size.max(1)).checked_mul(safety_multiplier)
    }

    pub const fn batch_count(&self) -> usize {
        self.batch_count
    }

    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Build the request for a given offset.
    pub fn request(&self, index: usize, offset: usize) -> BatchRequest {
        let mut url = self.scan_url.clone();
        url.query_pairs_mut()
            .append_pair("limit", &self.batch_size.to_string())
            .append_pair("offset", &offset.to_string());

        BatchRequest {
            index,
            offset,
            limit: self.batch_size,
            url: url.into(),
        }
    }

    pub fn cursor(&self) -> OffsetCursor {
        OffsetCursor::new(self.batch_size)
    }
}

/// Pagination offset shared by concurrent attempts.
///
/// Advanced once per dispatched attempt, whether or not the attempt yields
/// anything.
#[derive(Debug)]
pub struct OffsetCursor {
    next: AtomicUsize,
    step: usize,
}

impl OffsetCursor {
    pub const fn new(step: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            step,
        }
    }

    /// Claim the next offset.
    pub fn claim(&self) -> usize {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }

    /// Offset the next claim will receive.
    pub fn peek(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}
