// Test doubles shared by the engine tests: a scripted provider and an
// in-memory event log.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::event_log::{EventLog, EventRecord, ItemStatus, StatusRow};
use crate::llm_client::{CompletionProvider, LlmError};

type Handler = dyn Fn(&str, &str) -> Result<String, LlmError> + Send + Sync;

/// Answers every `chat` through a closure over `(system, user)`.
pub struct ScriptedProvider {
    handler: Box<Handler>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answers `reply`.
    pub fn fixed(reply: &str) -> Arc<Self> {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// Always fails with a 503.
    pub fn failing() -> Arc<Self> {
        Self::new(|_, _| Err(LlmError::Api {
            status: 503,
            message: "connection refused".to_string(),
        }))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn chat(&self, system: &str, user: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        (self.handler)(system, user)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}

#[derive(Default)]
pub struct MemoryEventLog {
    records: Mutex<Vec<EventRecord>>,
    texts: Mutex<Vec<(String, String)>>,
}

impl MemoryEventLog {
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn status_rows(&self) -> Vec<StatusRow> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                EventRecord::Status(row) => Some(row),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<ItemStatus> {
        self.status_rows().into_iter().map(|r| r.status).collect()
    }
}

impl EventLog for MemoryEventLog {
    fn append_record(&self, record: &EventRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn append_text(&self, title: &str, body: &str) {
        self.texts
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}
