use crate::context::LogContext;
use crate::record::LogRecord;
use crate::sink::{Attr, LogSink, SinkError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// [`LogSink`] that writes one JSON object per line to a shared writer.
///
/// Static attributes accumulate in a resolved field object: `with_attrs`
/// inserts under the current group path, `with_group` nests everything
/// added afterwards (including record fields) one object deeper. The
/// built-in columns — `timestamp`, `level`, `message` and the source
/// location — always stay top-level.
///
/// The writer sits behind a synchronous lock; `handle` performs the
/// write inline, so this sink is meant for local destinations (stdout,
/// a file, a test buffer), not for network transports.
pub struct JsonLinesSink<W> {
    writer: Arc<Mutex<W>>,
    attrs: Map<String, Value>,
    groups: Vec<String>,
}

impl<W> Clone for JsonLinesSink<W> {
    fn clone(&self) -> Self {
        JsonLinesSink {
            writer: Arc::clone(&self.writer),
            attrs: self.attrs.clone(),
            groups: self.groups.clone(),
        }
    }
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self::shared(Arc::new(Mutex::new(writer)))
    }

    /// Build a sink over an externally held writer. All configurations
    /// derived from this sink keep writing to the same writer.
    pub fn shared(writer: Arc<Mutex<W>>) -> Self {
        JsonLinesSink {
            writer,
            attrs: Map::new(),
            groups: Vec::new(),
        }
    }

    fn render(&self, record: &LogRecord) -> Value {
        let mut line = Map::new();
        line.insert("timestamp".to_string(), Value::String(record.timestamp.to_rfc3339()));
        line.insert("level".to_string(), Value::String(record.level.to_string()));
        line.insert("message".to_string(), Value::String(record.message.clone()));
        if let Some(target) = &record.target {
            line.insert("target".to_string(), Value::String(target.clone()));
        }
        if let Some(module_path) = &record.module_path {
            line.insert("module_path".to_string(), Value::String(module_path.clone()));
        }
        if let Some(file) = &record.file {
            line.insert("file".to_string(), Value::String(file.clone()));
        }
        if let Some(line_no) = record.line {
            line.insert("line".to_string(), Value::from(line_no));
        }
        for (key, value) in &self.attrs {
            line.insert(key.clone(), value.clone());
        }
        let slot = open_path(&mut line, &self.groups);
        for (key, value) in &record.fields {
            slot.insert(key.clone(), value.clone());
        }
        Value::Object(line)
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

fn child_object<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    // A plain attr occupying the group's name is shadowed by the group.
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(children) => children,
        _ => unreachable!("slot was just made an object"),
    }
}

fn open_path<'a>(root: &'a mut Map<String, Value>, groups: &[String]) -> &'a mut Map<String, Value> {
    let mut current = root;
    for group in groups {
        current = child_object(current, group);
    }
    current
}

#[async_trait]
impl<W: Write + Send + 'static> LogSink for JsonLinesSink<W> {
    async fn handle(&self, _ctx: &LogContext, record: &LogRecord) -> Result<(), SinkError> {
        let line = self.render(record);
        let mut encoded = serde_json::to_vec(&line)?;
        encoded.push(b'\n');
        let mut writer = self.writer.lock().expect("json sink writer lock poisoned");
        writer.write_all(&encoded)?;
        Ok(())
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink> {
        let mut derived = self.clone();
        let slot = open_path(&mut derived.attrs, &self.groups);
        for attr in attrs {
            slot.insert(attr.key, attr.value);
        }
        Arc::new(derived)
    }

    fn with_group(&self, name: &str) -> Arc<dyn LogSink> {
        let mut derived = self.clone();
        derived.groups.push(name.to_string());
        Arc::new(derived)
    }
}
