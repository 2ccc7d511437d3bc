//! Logging interceptor
//!
//! Records a bounded copy of every event for observability and mirrors it to
//! `tracing` at debug level.

use super::{HookEvent, Interceptor};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tooling::CancelToken;
use tracing::debug;

/// A recorded copy of one event.
#[derive(Debug, Clone)]
pub struct LoggedEvent {
    pub event_type: String,
    pub name: String,
    pub error: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub at: DateTime<Utc>,
}

/// Ring of recent events.
pub struct LoggingInterceptor {
    cap: usize,
    events: Mutex<VecDeque<LoggedEvent>>,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            cap,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshot of recorded events, oldest first.
    pub fn events(&self) -> Vec<LoggedEvent> {
        self.events.lock().iter().cloned().collect()
    }

    fn record(&self, event: &HookEvent) {
        debug!(
            event = event.event_type.as_str(),
            name = %event.name,
            error = event.error.as_deref().unwrap_or(""),
            "hook event"
        );

        let mut events = self.events.lock();
        if events.len() == self.cap {
            events.pop_front();
        }
        events.push_back(LoggedEvent {
            event_type: event.event_type.as_str().to_string(),
            name: event.name.clone(),
            error: event.error.clone(),
            metadata: event.metadata.clone(),
            at: Utc::now(),
        });
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before(&self, _cancel: &CancelToken, event: &mut HookEvent) -> Result<()> {
        self.record(event);
        Ok(())
    }

    async fn after(&self, event: &mut HookEvent) -> Result<()> {
        self.record(event);
        Ok(())
    }
}
