//! Infrastructure layer: browser automation, snapshot persistence,
//! configuration and logging.

pub mod browser;
pub mod config;
pub mod logging;
pub mod persistence;

pub use browser::{
    AutomationError, BrowserOptions, ChromiumAutomation, InterceptReceiver, InterceptSender,
    InterceptedResponse, OpenPage, PageAutomation,
};
pub use config::{ConfigError, ScanConfig};
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use persistence::{JsonFileSink, MemorySink, PersistenceError, SnapshotSink};
