//! Collection scheduling
//!
//! Each endpoint gets two [`ScheduledCollectionsQueue`]s, one for metrics
//! and one for avails, kept in step with its resource graph by observers.
//! A collector loop per queue sleeps until the next due time and hands the
//! due batch to the endpoint service on the blocking pool.

mod collector;
mod endpoint;
mod queue;

pub use collector::{run_collector, CollectionHandler, CollectorSettings, DELAY_TOLERANCE_MILLIS};
pub use endpoint::{EndpointScheduler, ManagedEndpoint, SchedulerConfig};
pub use queue::{
    round_up_to_second, Clock, ManualClock, MeasurementKind, ScheduledCollectionsQueue,
    ScheduledMeasurementInstance, SystemClock,
};
