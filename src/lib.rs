// ABOUTME: Library root for events-replicator
// ABOUTME: Incremental MySQL-to-ClickHouse event replication with a durable watermark

pub mod config;
pub mod extract;
pub mod load;
pub mod schema;
pub mod sync;
pub mod transform;
pub mod value;
pub mod watermark;

pub use config::EtlConfig;
pub use sync::{CycleOutcome, SyncOrchestrator};
pub use watermark::WatermarkStore;
