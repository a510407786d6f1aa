use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;
use triggered_log_sink::handler::LOG_STREAM_ID_KEY;
use triggered_log_sink::layer::TriggeredLayer;
use triggered_log_sink::memory::MemorySink;

#[tokio::test]
async fn span_rooted_stream_buffers_then_replays() {
    let sink = MemorySink::new();
    let (layer, drain) = TriggeredLayer::new(Arc::new(sink.clone()), Level::WARN, 64);
    let subscriber = Registry::default().with(layer);

    {
        let _guard = tracing::subscriber::set_default(subscriber);
        let span = tracing::info_span!("request", log_stream_id = "req-7");
        let _entered = span.enter();
        tracing::debug!(step = 1, "starting");
        tracing::error!("exploded");
    }
    // Dropping the subscriber closes the channel; the delivery task
    // finishes whatever was queued and exits.
    drain.await.expect("delivery task");

    let records = sink.records();
    assert_eq!(records.len(), 2);

    assert_eq!(records[0].record.message, "starting");
    assert_eq!(records[0].record.level, Level::DEBUG);
    assert_eq!(records[0].record.fields["step"], serde_json::json!(1));
    assert_eq!(records[0].attr(LOG_STREAM_ID_KEY), Some(&serde_json::json!("req-7")));

    assert_eq!(records[1].record.message, "exploded");
    assert_eq!(records[1].record.level, Level::ERROR);
}

#[tokio::test]
async fn child_span_fields_decorate_the_derived_view() {
    let sink = MemorySink::new();
    let (layer, drain) = TriggeredLayer::new(Arc::new(sink.clone()), Level::WARN, 64);
    let subscriber = Registry::default().with(layer);

    {
        let _guard = tracing::subscriber::set_default(subscriber);
        let root = tracing::info_span!("request", log_stream_id = "req-9");
        let _entered = root.enter();
        let child = tracing::info_span!("db", query = "select 1");
        let _child_entered = child.enter();
        tracing::warn!("slow query");
    }
    drain.await.expect("delivery task");

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.message, "slow query");
    assert_eq!(records[0].attr("query"), Some(&serde_json::json!("select 1")));
    assert_eq!(records[0].attr(LOG_STREAM_ID_KEY), Some(&serde_json::json!("req-9")));
}

#[tokio::test]
async fn a_quiet_stream_is_never_delivered() {
    let sink = MemorySink::new();
    let (layer, drain) = TriggeredLayer::new(Arc::new(sink.clone()), Level::ERROR, 64);
    let subscriber = Registry::default().with(layer);

    {
        let _guard = tracing::subscriber::set_default(subscriber);
        let span = tracing::info_span!("request", log_stream_id = "req-quiet");
        let _entered = span.enter();
        tracing::info!("step one");
        tracing::warn!("still below the trigger");
    }
    drain.await.expect("delivery task");

    assert!(sink.is_empty());
}

#[tokio::test]
async fn events_outside_any_stream_are_ignored() {
    let sink = MemorySink::new();
    let (layer, drain) = TriggeredLayer::new(Arc::new(sink.clone()), Level::WARN, 64);
    let total_events = Arc::clone(&layer.total_events);
    let subscriber = Registry::default().with(layer);

    {
        let _guard = tracing::subscriber::set_default(subscriber);
        tracing::error!("no stream span anywhere");
    }
    drain.await.expect("delivery task");

    assert_eq!(total_events.load(Ordering::Relaxed), 1);
    assert!(sink.is_empty());
}
