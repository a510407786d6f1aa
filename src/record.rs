use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::Level;

/// A single structured log entry as it travels from a handler to a sink.
///
/// `level` keeps the ordered [`tracing::Level`] value because trigger
/// decisions compare levels; it serializes as the usual display string
/// ("DEBUG", "ERROR", ...). The source-location fields are populated by
/// the subscriber layer and stay `None` for hand-built records.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "level_as_str")]
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Build a record stamped with the current time and no fields.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            target: None,
            module_path: None,
            file: None,
            line: None,
            fields: BTreeMap::new(),
        }
    }

    /// Attach one structured field, replacing any previous value for the key.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

fn level_as_str<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_level_as_display_string() {
        let record = LogRecord::new(Level::DEBUG, "hello").with_field("attempt", 3);
        let value = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(value["level"], json!("DEBUG"));
        assert_eq!(value["message"], json!("hello"));
        assert_eq!(value["fields"]["attempt"], json!(3));
        assert!(value.get("file").is_none());
    }

    #[test]
    fn with_field_replaces_existing_values() {
        let record = LogRecord::new(Level::INFO, "m")
            .with_field("k", "old")
            .with_field("k", "new");
        assert_eq!(record.fields["k"], json!("new"));
    }
}
