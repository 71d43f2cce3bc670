pub mod connector;
pub mod metrics;
pub mod sync;
pub mod watermark;

pub use connector::ExchangeConnector;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use sync::{SyncEngine, TickReport};
pub use watermark::{TimeMarker, WatermarkTable};
