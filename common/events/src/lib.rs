pub mod model;
pub mod sink;

pub use model::{EventError, EventResult, LowStockEvent, LOW_STOCK_EVENT_VERSION};
pub use sink::{BufferSnapshot, BufferedEventSink, EventSink, LogEventSink, RecordingEventSink};
#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
pub use sink::KafkaEventSink;
