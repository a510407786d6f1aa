use crate::context::LogContext;
use crate::handler::{TriggeredLogHandler, LOG_STREAM_ID_KEY};
use crate::record::LogRecord;
use crate::sink::{Attr, LogSink};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that maps the span tree onto triggered
/// log streams.
///
/// A span created with a `log_stream_id` field roots a new stream: a
/// [`TriggeredLogHandler`] is built for it and stored in the span's
/// extensions, with the span's remaining fields as static attrs. Spans
/// nested below a stream derive their own view from the nearest
/// ancestor's handler, adding their fields the same way. Events inside a
/// stream become [`LogRecord`]s and are pushed through a bounded channel
/// to a background task that drives the handler, so sink I/O never runs
/// on application threads; events outside any stream are ignored.
///
/// A delivery failure is reported on stderr and the affected records
/// stay in the stream's backlog — the next event on that stream retries
/// them. The stream id must be present at span creation; fields recorded
/// later via `Span::record` are not scanned.
pub struct TriggeredLayer {
    sender: mpsc::Sender<QueuedRecord>,
    target: Arc<dyn LogSink>,
    trigger_level: Level,
    /// Total events seen by the layer, in or out of a stream.
    pub total_events: Arc<AtomicU64>,
    /// Successfully handed to the delivery task.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full.
    pub dropped_events: Arc<AtomicU64>,
}

struct QueuedRecord {
    handler: TriggeredLogHandler,
    record: LogRecord,
}

impl TriggeredLayer {
    /// Create a new layer and spawn the background task that pulls
    /// queued records off the channel and submits them to their stream's
    /// handler. Must be called within a tokio runtime.
    ///
    /// A minimal `buffer` threshold is enforced to avoid degenerate
    /// configurations.
    pub fn new(
        target: Arc<dyn LogSink>,
        trigger_level: Level,
        buffer: usize,
    ) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let (tx, mut rx) = mpsc::channel::<QueuedRecord>(buffer);

        let total_events = Arc::new(AtomicU64::new(0));
        let enqueued_events = Arc::new(AtomicU64::new(0));
        let dropped_events = Arc::new(AtomicU64::new(0));

        let enqueued_events_bg = Arc::clone(&enqueued_events);

        let handle = tokio::spawn(async move {
            let ctx = LogContext::new();
            while let Some(queued) = rx.recv().await {
                enqueued_events_bg.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = queued.handler.handle(&ctx, &queued.record).await {
                    // Undelivered records stay in the stream backlog; the
                    // next event on the stream retries them.
                    eprintln!("triggered log delivery failed: {}", err);
                }
            }
        });

        (
            Self {
                sender: tx,
                target,
                trigger_level,
                total_events,
                enqueued_events,
                dropped_events,
            },
            handle,
        )
    }
}

impl<S> Layer<S> for TriggeredLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = SpanVisitor::default();
        attrs.record(&mut visitor);

        let span = match ctx.span(id) {
            Some(span) => span,
            None => return,
        };

        let handler = if let Some(stream_id) = visitor.stream_id {
            let root =
                TriggeredLogHandler::new(Arc::clone(&self.target), &stream_id, self.trigger_level);
            if visitor.attrs.is_empty() {
                root
            } else {
                root.with_attrs(visitor.attrs)
            }
        } else {
            let inherited = span.parent().and_then(|parent| {
                parent
                    .scope()
                    .find_map(|ancestor| ancestor.extensions().get::<TriggeredLogHandler>().cloned())
            });
            match inherited {
                Some(parent) if !visitor.attrs.is_empty() => parent.with_attrs(visitor.attrs),
                Some(parent) => parent,
                None => return,
            }
        };

        span.extensions_mut().insert(handler);
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let span = event
            .parent()
            .and_then(|id| ctx.span(id))
            .or_else(|| ctx.lookup_current());
        let handler = span.and_then(|span| {
            span.scope()
                .find_map(|ancestor| ancestor.extensions().get::<TriggeredLogHandler>().cloned())
        });
        let handler = match handler {
            Some(handler) => handler,
            None => return,
        };

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let meta = event.metadata();
        let record = LogRecord {
            timestamp: Utc::now(),
            level: *meta.level(),
            message: message.unwrap_or_default(),
            target: Some(meta.target().to_string()),
            module_path: meta.module_path().map(|s| s.to_string()),
            file: meta.file().map(|s| s.to_string()),
            line: meta.line(),
            fields,
        };

        if self.sender.try_send(QueuedRecord { handler, record }).is_err() {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            eprintln!("log channel full, dropping log record");
        }
    }
}

/// Collects a span's fields as static attrs, pulling out the stream id.
#[derive(Default)]
struct SpanVisitor {
    stream_id: Option<String>,
    attrs: Vec<Attr>,
}

impl Visit for SpanVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == LOG_STREAM_ID_KEY {
            self.stream_id = Some(value.to_string());
        } else {
            self.attrs.push(Attr::new(field.name(), value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.attrs.push(Attr::new(field.name(), value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.attrs.push(Attr::new(field.name(), value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.attrs.push(Attr::new(field.name(), value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == LOG_STREAM_ID_KEY {
            self.stream_id = Some(rendered);
        } else {
            self.attrs.push(Attr::new(field.name(), rendered));
        }
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // Message text usually arrives here as pre-formatted arguments.
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            *self.message = Some(rendered);
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(rendered));
        }
    }
}
