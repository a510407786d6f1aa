use crate::context::LogContext;
use crate::record::LogRecord;
use crate::sink::{Attr, LogSink, SinkError};
use async_trait::async_trait;
use std::sync::Arc;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the triggering handler itself
/// without any I/O, and for unit tests that don't care about delivery.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn handle(&self, _ctx: &LogContext, _record: &LogRecord) -> Result<(), SinkError> {
        Ok(())
    }

    fn with_attrs(&self, _attrs: Vec<Attr>) -> Arc<dyn LogSink> {
        Arc::new(NoopSink)
    }

    fn with_group(&self, _name: &str) -> Arc<dyn LogSink> {
        Arc::new(NoopSink)
    }
}
