use crate::layer::TriggeredLayer;
use crate::sink::LogSink;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration for the triggered logging layer.
///
/// **Fields**
/// - `channel_buffer`: maximum number of queued records before new ones
///   are dropped.
/// - `trigger_level`: severity at or above which a stream switches to
///   immediate delivery.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   stacked on top of the triggered layer so events also show up on
///   the console.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub trigger_level: Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            trigger_level: Level::WARN,
            enable_stdout: true,
        }
    }
}

/// Initialize the global `tracing` subscriber using the provided sink
/// and [`LayerConfig`].
///
/// **Parameters**
/// - `sink`: implementation of [`LogSink`] that receives records once
///   their stream triggers.
/// - `config`: [`LayerConfig`] controlling buffering and triggering.
///
/// **Effects**
///
/// This installs a [`Registry`] combined with [`TriggeredLayer`] as the
/// global default subscriber, so all `tracing` events in the process are
/// observed by the layer. Must be called within a tokio runtime because
/// the layer spawns its delivery task.
pub fn init_tracing_with_config(sink: Arc<dyn LogSink>, config: LayerConfig) {
    let (layer, _handle) = TriggeredLayer::new(sink, config.trigger_level, config.channel_buffer);

    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    }
}

/// Initialize tracing with sensible defaults.
///
/// Equivalent to calling [`init_tracing_with_config`] with
/// [`LayerConfig::default`].
pub fn init_tracing(sink: Arc<dyn LogSink>) {
    init_tracing_with_config(sink, LayerConfig::default());
}
