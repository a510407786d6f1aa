use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Request-scoped context captured alongside each submitted record.
///
/// The triggering handler treats it as opaque: whatever context a record
/// was submitted with is the context its sink sees at delivery time,
/// even when delivery happens much later during a backlog replay.
/// Cloning is cheap; `with_value` derives a new context and leaves the
/// receiver untouched.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    values: Arc<BTreeMap<String, Value>>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context with one additional named value.
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut values = (*self.values).clone();
        values.insert(key.into(), value.into());
        LogContext { values: Arc::new(values) }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}
