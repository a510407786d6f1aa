use crate::context::LogContext;
use crate::record::LogRecord;
use crate::sink::{Attr, LogSink, SinkError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Level;

/// Name of the attribute that identifies records belonging to one
/// triggered log stream.
pub const LOG_STREAM_ID_KEY: &str = "log_stream_id";

/// A [`LogSink`] decorator that withholds a stream of records until one
/// of them reaches a trigger level, then replays the whole history to
/// the target sink in submission order.
///
/// A handler does not process records itself; it only tracks them and
/// decides when delivery is due. All handlers derived from one root via
/// [`with_attrs`](TriggeredLogHandler::with_attrs) /
/// [`with_group`](TriggeredLogHandler::with_group) share a single
/// trigger flag and backlog, so a severe record submitted through any
/// view releases every record buffered by every view of the stream.
/// Each buffered record remembers the sink configuration of the view it
/// was submitted through and is replayed with exactly that decoration.
///
/// Delivery failures are surfaced to the submitter and never retried
/// internally; the undelivered tail of the backlog stays queued, and the
/// next submission on the stream (from any view) drains it before
/// sending its own record. Until a stream triggers, its backlog grows
/// without bound, so give each stream a bounded lifetime (typically one
/// request).
#[derive(Clone)]
pub struct TriggeredLogHandler {
    target: Arc<dyn LogSink>,
    stream: Arc<StreamState>,
}

/// State shared by every handler in one stream's tree.
struct StreamState {
    trigger_level: Level,
    // The flag and the backlog must be read and written as one unit:
    // whether a record is buffered or forwarded depends on a consistent
    // view of both.
    inner: Mutex<StreamInner>,
}

#[derive(Default)]
struct StreamInner {
    triggered: bool,
    backlog: Vec<PendingRecord>,
}

/// Everything needed to deliver one withheld record later.
struct PendingRecord {
    ctx: LogContext,
    target: Arc<dyn LogSink>,
    record: LogRecord,
}

// tracing orders levels by verbosity: ERROR sorts lowest, TRACE highest.
fn at_least_as_severe(level: Level, trigger: Level) -> bool {
    level <= trigger
}

impl TriggeredLogHandler {
    /// Create the root handler of a new stream, initialized untriggered.
    ///
    /// `target` is where records go once the stream triggers. The
    /// `stream_id` is attached to `target` once, under
    /// [`LOG_STREAM_ID_KEY`], so every record emitted through the stream
    /// carries the same identifier no matter which derived view sent it.
    pub fn new(target: Arc<dyn LogSink>, stream_id: &str, trigger_level: Level) -> Self {
        let target = target.with_attrs(vec![Attr::new(LOG_STREAM_ID_KEY, stream_id)]);
        TriggeredLogHandler {
            target,
            stream: Arc::new(StreamState {
                trigger_level,
                inner: Mutex::new(StreamInner::default()),
            }),
        }
    }

    /// Derive a view whose sink carries `attrs` in addition to the
    /// current decoration. The new view shares this stream's trigger
    /// state; the receiver is unchanged.
    pub fn with_attrs(&self, attrs: Vec<Attr>) -> TriggeredLogHandler {
        TriggeredLogHandler {
            target: self.target.with_attrs(attrs),
            stream: Arc::clone(&self.stream),
        }
    }

    /// Derive a view whose sink nests subsequently added field names
    /// under `name`, sharing this stream's trigger state.
    pub fn with_group(&self, name: &str) -> TriggeredLogHandler {
        TriggeredLogHandler {
            target: self.target.with_group(name),
            stream: Arc::clone(&self.stream),
        }
    }

    /// Whether the stream has switched to immediate delivery. The flag
    /// never resets for the life of the stream.
    pub async fn is_triggered(&self) -> bool {
        self.stream.inner.lock().await.triggered
    }

    /// Number of records accepted but not yet delivered to the sink.
    pub async fn pending(&self) -> usize {
        self.stream.inner.lock().await.backlog.len()
    }
}

impl StreamInner {
    fn buffer(&mut self, ctx: &LogContext, target: &Arc<dyn LogSink>, record: &LogRecord) {
        self.backlog.push(PendingRecord {
            ctx: ctx.clone(),
            target: Arc::clone(target),
            record: record.clone(),
        });
    }

    /// Send the entire backlog, each record through the sink of the view
    /// that submitted it, then clear it. On failure the delivered prefix
    /// is removed, the failing record onward stays queued in order, and
    /// the error is returned so the next submission retries.
    async fn drain_backlog(&mut self) -> Result<(), SinkError> {
        let mut failed = None;
        for (idx, pending) in self.backlog.iter().enumerate() {
            if let Err(err) = pending.target.handle(&pending.ctx, &pending.record).await {
                failed = Some((idx, err));
                break;
            }
        }
        match failed {
            Some((idx, err)) => {
                self.backlog.drain(..idx);
                Err(err)
            }
            None => {
                self.backlog.clear();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl LogSink for TriggeredLogHandler {
    /// Always true: rejecting a record here would make it permanently
    /// invisible even if the stream triggers later. Filtering authority
    /// rests entirely with the shared stream state.
    fn enabled(&self, _ctx: &LogContext, _level: Level) -> bool {
        true
    }

    /// Buffer the record if the stream hasn't triggered yet, or deliver
    /// any backlog followed by this record if it has.
    ///
    /// The whole operation is one critical section: the trigger-level
    /// comparison, the flag update, and the buffer-or-flush decision all
    /// happen under the stream lock, so concurrent submissions through
    /// different views cannot disagree on whether the stream is
    /// triggered, and lock acquisition order fixes delivery order.
    async fn handle(&self, ctx: &LogContext, record: &LogRecord) -> Result<(), SinkError> {
        let mut inner = self.stream.inner.lock().await;
        if at_least_as_severe(record.level, self.stream.trigger_level) {
            inner.triggered = true;
        }
        if !inner.triggered {
            inner.buffer(ctx, &self.target, record);
            return Ok(());
        }
        if !inner.backlog.is_empty() {
            if let Err(err) = inner.drain_backlog().await {
                // The current record becomes just another undelivered
                // record at the tail, awaiting the next retry.
                inner.buffer(ctx, &self.target, record);
                return Err(err);
            }
        }
        // A failure on this direct forward is surfaced but the record is
        // not enqueued; only backlog entries are retained for retry.
        self.target.handle(ctx, record).await
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn LogSink> {
        Arc::new(TriggeredLogHandler::with_attrs(self, attrs))
    }

    fn with_group(&self, name: &str) -> Arc<dyn LogSink> {
        Arc::new(TriggeredLogHandler::with_group(self, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySink;
    use serde_json::json;

    fn record(level: Level, message: &str) -> LogRecord {
        LogRecord::new(level, message)
    }

    #[test]
    fn severity_comparison_matches_tracing_ordering() {
        assert!(at_least_as_severe(Level::ERROR, Level::WARN));
        assert!(at_least_as_severe(Level::WARN, Level::WARN));
        assert!(!at_least_as_severe(Level::INFO, Level::WARN));
        assert!(!at_least_as_severe(Level::TRACE, Level::DEBUG));
    }

    #[tokio::test]
    async fn new_attaches_the_stream_id_once() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink.clone()), "STREAM_ID", Level::DEBUG);
        handler
            .handle(&LogContext::new(), &record(Level::ERROR, "boom"))
            .await
            .expect("deliver");
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attrs.len(), 1);
        assert_eq!(records[0].attr(LOG_STREAM_ID_KEY), Some(&json!("STREAM_ID")));
    }

    #[tokio::test]
    async fn with_attrs_shares_stream_state_and_leaves_receiver_alone() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink), "STREAM_ID", Level::DEBUG);
        let derived = handler.with_attrs(vec![Attr::new("op", "x")]);
        assert!(Arc::ptr_eq(&handler.stream, &derived.stream));
    }

    #[tokio::test]
    async fn with_group_shares_stream_state() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink), "STREAM_ID", Level::DEBUG);
        let derived = handler.with_group("GROUP_NAME");
        assert!(Arc::ptr_eq(&handler.stream, &derived.stream));
    }

    #[tokio::test]
    async fn buffers_until_triggered_then_replays_in_order() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink.clone()), "STREAM_ID", Level::WARN);

        let ctx1 = LogContext::new().with_value("request", "one");
        handler
            .handle(&ctx1, &record(Level::DEBUG, "MESSAGE 1"))
            .await
            .expect("buffer");
        assert!(sink.is_empty());
        {
            let inner = handler.stream.inner.lock().await;
            assert!(!inner.triggered);
            assert_eq!(inner.backlog.len(), 1);
            assert_eq!(inner.backlog[0].record.message, "MESSAGE 1");
        }

        let ctx2 = LogContext::new().with_value("request", "two");
        handler
            .handle(&ctx2, &record(Level::ERROR, "MESSAGE 2"))
            .await
            .expect("flush");
        assert_eq!(handler.pending().await, 0);

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record.message, "MESSAGE 1");
        assert_eq!(records[0].ctx.value("request"), Some(&json!("one")));
        assert_eq!(records[1].record.message, "MESSAGE 2");
        assert_eq!(records[1].ctx.value("request"), Some(&json!("two")));
    }

    #[tokio::test]
    async fn failure_preserves_messages_for_the_next_submission() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink.clone()), "STREAM_ID", Level::WARN);
        let ctx = LogContext::new();

        handler
            .handle(&ctx, &record(Level::DEBUG, "MESSAGE 1"))
            .await
            .expect("buffer");
        assert_eq!(handler.pending().await, 1);

        sink.set_fail(true);
        let err = handler.handle(&ctx, &record(Level::ERROR, "MESSAGE 2")).await;
        assert!(err.is_err(), "drain failure must bubble up");
        assert_eq!(handler.pending().await, 2);
        assert!(sink.is_empty());

        sink.set_fail(false);
        handler
            .handle(&ctx, &record(Level::ERROR, "MESSAGE 3"))
            .await
            .expect("retry drain");
        assert_eq!(handler.pending().await, 0);

        let messages: Vec<String> = sink.records().iter().map(|r| r.record.message.clone()).collect();
        assert_eq!(messages, ["MESSAGE 1", "MESSAGE 2", "MESSAGE 3"]);
    }

    #[tokio::test]
    async fn trigger_is_monotonic() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink.clone()), "STREAM_ID", Level::WARN);
        let ctx = LogContext::new();

        handler
            .handle(&ctx, &record(Level::ERROR, "severe"))
            .await
            .expect("deliver");
        assert!(handler.is_triggered().await);

        // Below the trigger level, but the stream already switched to
        // immediate delivery and never switches back.
        handler
            .handle(&ctx, &record(Level::DEBUG, "follow-up"))
            .await
            .expect("deliver");
        assert!(handler.is_triggered().await);
        assert_eq!(handler.pending().await, 0);

        let messages: Vec<String> = sink.records().iter().map(|r| r.record.message.clone()).collect();
        assert_eq!(messages, ["severe", "follow-up"]);
    }

    #[tokio::test]
    async fn record_at_exactly_the_trigger_level_triggers() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink.clone()), "STREAM_ID", Level::WARN);
        handler
            .handle(&LogContext::new(), &record(Level::WARN, "edge"))
            .await
            .expect("deliver");
        assert!(handler.is_triggered().await);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn direct_forward_failure_is_not_requeued() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink.clone()), "STREAM_ID", Level::WARN);
        let ctx = LogContext::new();

        handler
            .handle(&ctx, &record(Level::ERROR, "first"))
            .await
            .expect("deliver");

        // Known gap, preserved on purpose: when the drain has nothing to
        // do and the triggering record's own forward fails, the error is
        // surfaced but the record is lost — unlike backlog entries, it is
        // not kept for a retry.
        sink.set_fail(true);
        let err = handler.handle(&ctx, &record(Level::ERROR, "second")).await;
        assert!(err.is_err());
        assert_eq!(handler.pending().await, 0);

        sink.set_fail(false);
        handler
            .handle(&ctx, &record(Level::ERROR, "third"))
            .await
            .expect("deliver");
        let messages: Vec<String> = sink.records().iter().map(|r| r.record.message.clone()).collect();
        assert_eq!(messages, ["first", "third"]);
    }

    #[tokio::test]
    async fn enabled_never_filters() {
        let sink = MemorySink::new();
        let handler = TriggeredLogHandler::new(Arc::new(sink), "STREAM_ID", Level::ERROR);
        let ctx = LogContext::new();
        assert!(handler.enabled(&ctx, Level::TRACE));
        assert!(handler.enabled(&ctx, Level::ERROR));
    }
}
