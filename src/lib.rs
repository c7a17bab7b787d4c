//! pump-scan - pump.fun token listing scraper
//!
//! Drives a headless Chromium against the advanced scan page, intercepts
//! the paginated listing XHRs, deduplicates tokens by identifier and keeps
//! a JSON snapshot of the results on disk.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{BatchOrchestrator, RunSummary, SharedAccumulator};
pub use infrastructure::{ScanConfig, SnapshotSink};
