use crate::context::LogContext;
use crate::record::LogRecord;
use crate::sink::{Attr, LogSink, SinkError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One delivery observed by a [`MemorySink`].
#[derive(Debug, Clone)]
pub struct CapturedRecord {
    pub ctx: LogContext,
    pub record: LogRecord,
    /// Static attrs of the sink configuration the record arrived
    /// through, with keys qualified by their group path ("req.user").
    pub attrs: Vec<Attr>,
}

impl CapturedRecord {
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.iter().find(|attr| attr.key == key).map(|attr| &attr.value)
    }
}

/// An in-memory sink that records every delivery, for tests.
///
/// Derived configurations (`with_attrs` / `with_group`) append to the
/// same shared record list, so one `MemorySink` kept on the test side
/// observes deliveries made through any derived view. `set_fail` makes
/// every subsequent `handle` call fail until switched back, across all
/// derived configurations.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
    fail: Arc<AtomicBool>,
    attrs: Vec<Attr>,
    groups: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().expect("memory sink lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("memory sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn qualify(groups: &[String], key: &str) -> String {
    if groups.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", groups.join("."), key)
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn handle(&self, ctx: &LogContext, record: &LogRecord) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Backend("memory sink failure requested".to_string()));
        }
        self.records.lock().expect("memory sink lock poisoned").push(CapturedRecord {
            ctx: ctx.clone(),
            record: record.clone(),
            attrs: self.attrs.clone(),
        });
        Ok(())
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink> {
        let mut derived = self.clone();
        for attr in attrs {
            derived.attrs.push(Attr {
                key: qualify(&derived.groups, &attr.key),
                value: attr.value,
            });
        }
        Arc::new(derived)
    }

    fn with_group(&self, name: &str) -> Arc<dyn LogSink> {
        let mut derived = self.clone();
        derived.groups.push(name.to_string());
        Arc::new(derived)
    }
}
