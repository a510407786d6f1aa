use crate::context::LogContext;
use crate::record::LogRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::Level;

/// One static field attached to a sink configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub key: String,
    pub value: Value,
}

impl Attr {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Attr { key: key.into(), value: value.into() }
    }
}

/// Delivery failure reported by a [`LogSink`].
///
/// The triggering handler never inspects the variant; errors are carried
/// back to the submitter opaquely and the affected records stay queued
/// for the next submission to retry.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("sink I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink backend failure: {0}")]
    Backend(String),
}

/// Destination for [`LogRecord`]s produced by the triggering handler.
///
/// Implementations are responsible for transporting records to a concrete
/// backend (a JSON-lines writer, stdout, a log aggregator, etc.) and for
/// producing derived configurations that carry extra static fields.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Whether the sink wants records at `level`. Queried by callers that
    /// sit in front of the triggering handler; the handler itself never
    /// filters and never consults this.
    fn enabled(&self, _ctx: &LogContext, _level: Level) -> bool {
        true
    }

    /// Deliver one record.
    ///
    /// **Parameters**
    /// - `ctx`: the request-scoped context the record was submitted with.
    /// - `record`: fully-populated [`LogRecord`].
    ///
    /// **Returns**
    /// - `Ok(())` if the record was accepted by the backend.
    /// - `Err(..)` if the backend failed (I/O error, serialization
    ///   error, etc.). The triggering handler surfaces the error to the
    ///   submitter and keeps undelivered backlog entries for a later
    ///   retry.
    async fn handle(&self, ctx: &LogContext, record: &LogRecord) -> Result<(), SinkError>;

    /// Return a sink with `attrs` merged into its static fields. Must not
    /// mutate the receiver; later attributes may shadow earlier ones with
    /// the same key.
    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink>;

    /// Return a sink that nests subsequently added field names under
    /// `name`. Must not mutate the receiver.
    fn with_group(&self, name: &str) -> Arc<dyn LogSink>;
}
