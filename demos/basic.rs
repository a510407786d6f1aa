use std::sync::Arc;
use tracing::Level;
use triggered_log_sink::context::LogContext;
use triggered_log_sink::handler::TriggeredLogHandler;
use triggered_log_sink::json::JsonLinesSink;
use triggered_log_sink::record::LogRecord;
use triggered_log_sink::sink::LogSink;

// This file serves as a basic demonstration of the functionality
// of the TriggeredLogHandler.

#[tokio::main]
async fn main() {
    // Records go out as JSON lines on stdout. Any other LogSink
    // implementation would do just as well here.
    let target: Arc<dyn LogSink> = Arc::new(JsonLinesSink::stdout());
    let ctx = LogContext::new();

    let stream = TriggeredLogHandler::new(Arc::clone(&target), "1", Level::ERROR);
    stream
        .handle(&ctx, &LogRecord::new(Level::DEBUG, "Debug message 1"))
        .await
        .expect("submit");
    // At this point nothing has been written because the debug record
    // is not severe enough to trigger the stream.
    stream
        .handle(&ctx, &LogRecord::new(Level::ERROR, "Error message"))
        .await
        .expect("submit");
    // After the error, both records come out in the order they were
    // reported.

    // A fresh stream starts untriggered again.
    let stream = TriggeredLogHandler::new(target, "2", Level::ERROR);
    stream
        .handle(&ctx, &LogRecord::new(Level::DEBUG, "Debug message 2"))
        .await
        .expect("submit");
    // This debug record is never written: nothing in stream "2" was
    // ever severe enough to trigger, and the backlog is reclaimed with
    // the stream.
}
