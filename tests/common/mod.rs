//! Scripted stand-in for the browser, keyed by pagination offset.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use url::Url;

use pump_scan::application::{BatchRequest, OrchestratorConfig};
use pump_scan::infrastructure::{
    AutomationError, InterceptSender, InterceptedResponse, OpenPage, PageAutomation,
};

pub const MARKER: &str = "list?sortBy=creationTime";

pub fn listing_url(offset: usize) -> String {
    format!("https://frontend-api-v3.pump.fun/coins/{MARKER}&limit=30&offset={offset}")
}

/// What a batch page does once opened.
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver a body during navigation
    Respond { url: String, body: String },
    /// Deliver a body this long after navigation finished
    RespondLate {
        after: Duration,
        url: String,
        body: String,
    },
    /// Fail navigation
    Fail(String),
    /// Never finish navigating
    Hang,
}

impl Step {
    pub fn listing(offset: usize, payload: &Value) -> Self {
        Self::Respond {
            url: listing_url(offset),
            body: payload.to_string(),
        }
    }
}

#[derive(Default)]
pub struct ScriptedAutomation {
    script: HashMap<usize, Vec<Step>>,
    opened: Mutex<Vec<BatchRequest>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_offset(mut self, offset: usize, steps: Vec<Step>) -> Self {
        self.script.insert(offset, steps);
        self
    }

    pub fn opened(&self) -> Vec<BatchRequest> {
        self.opened.lock().unwrap().clone()
    }

    pub fn opened_offsets(&self) -> Vec<usize> {
        self.opened().iter().map(|r| r.offset).collect()
    }

    /// Pages whose `close` ran to completion.
    pub fn closed_pages(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedPage {
    late: Vec<JoinHandle<()>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl OpenPage for ScriptedPage {
    async fn close(self: Box<Self>) -> Result<(), AutomationError> {
        for handle in self.late {
            handle.await.unwrap();
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PageAutomation for ScriptedAutomation {
    async fn open(
        &self,
        request: &BatchRequest,
        sink: InterceptSender,
    ) -> Result<Box<dyn OpenPage>, AutomationError> {
        self.opened.lock().unwrap().push(request.clone());

        let steps = self.script.get(&request.offset).cloned().unwrap_or_default();
        let mut late = Vec::new();

        for step in steps {
            match step {
                Step::Respond { url, body } => {
                    let _ = sink.send(InterceptedResponse { url, body });
                }
                Step::RespondLate { after, url, body } => {
                    let sink = sink.clone();
                    late.push(tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = sink.send(InterceptedResponse { url, body });
                    }));
                }
                Step::Fail(message) => {
                    return Err(AutomationError::Navigation {
                        url: request.url.clone(),
                        message,
                    });
                }
                Step::Hang => std::future::pending::<()>().await,
            }
        }

        Ok(Box::new(ScriptedPage {
            late,
            closed: Arc::clone(&self.closed),
        }))
    }
}

pub fn orchestrator_config(target: usize, batch_size: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        scan_url: Url::parse("https://pump.fun/advanced/scan").unwrap(),
        batch_size,
        target,
        safety_multiplier: 2,
        max_concurrency: 1,
        settle_delay: Duration::ZERO,
        request_handler_timeout: None,
        response_url_marker: MARKER.to_string(),
    }
}
