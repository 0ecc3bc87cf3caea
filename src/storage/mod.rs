//! Hand-off of collected data points to the storage collaborator

mod adapter;
mod dispatcher;

pub use adapter::{
    AvailPayloadBuilder, DataPoint, LoggingStorageAdapter, MetricPayloadBuilder, PayloadBuilder,
    StorageAdapter,
};
pub use dispatcher::{
    BufferedDispatcher, DispatcherConfig, AVAIL_BATCH_SIZE, AVAIL_BUFFER_SIZE, METRIC_BATCH_SIZE,
    METRIC_BUFFER_SIZE,
};
