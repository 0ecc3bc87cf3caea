//! Sensors of the host the agent runs on
//!
//! The platform tree is fixed: one operating system root with file store,
//! memory and processor children. [`type_set`] declares it so the
//! platform endpoint goes through the same discovery and scheduling as
//! remote endpoints.

mod driver;
mod location;

pub use driver::{PlatformDriver, PlatformDriverFactory, PlatformSnapshot};
pub use location::{PlatformLocationResolver, PlatformNodeLocation};

use crate::events::MetricKind;
use crate::inventory::{Interval, MetricDetail, MetricType, ResourceType, TypeSet};
use crate::protocol::AttributeLocation;
use driver::{
    AVAILABLE_MEMORY, CPU_USAGE, FILE_STORE, MACHINE_ID, MEMORY, OPERATING_SYSTEM, PROCESSOR,
    PROCESS_COUNT, SYSTEM_CPU_LOAD, SYSTEM_LOAD_AVERAGE, TOTAL_MEMORY, TOTAL_SPACE, USABLE_SPACE,
};

pub const TYPE_SET_NAME: &str = "Platform";

fn gauge(name: &str, units: &str, interval: Interval) -> MetricType<PlatformNodeLocation> {
    MetricType::new(
        name,
        AttributeLocation::new(PlatformNodeLocation::default(), name),
        interval,
        MetricDetail {
            kind: MetricKind::Gauge,
            units: units.to_string(),
        },
    )
}

fn child_type(name: &str, template: &str) -> ResourceType<PlatformNodeLocation> {
    ResourceType::new(
        name,
        PlatformNodeLocation::segment(name, location::ANY_NAME),
        template,
    )
    .with_parents(&[OPERATING_SYSTEM])
}

/// The platform resource types, every metric collected at `interval`
pub fn type_set(interval: Interval) -> TypeSet<PlatformNodeLocation> {
    let os = ResourceType::new(
        OPERATING_SYSTEM,
        PlatformNodeLocation::segment(OPERATING_SYSTEM, location::ANY_NAME),
        "%_ManagedServerName% Operating System [%s]",
    )
    .with_config_property(
        MACHINE_ID,
        AttributeLocation::new(PlatformNodeLocation::default(), MACHINE_ID),
    )
    .with_metric(gauge(SYSTEM_CPU_LOAD, "percentage", interval))
    .with_metric(gauge(SYSTEM_LOAD_AVERAGE, "none", interval))
    .with_metric(gauge(PROCESS_COUNT, "none", interval));

    let file_store = child_type(FILE_STORE, "File Store [%s]")
        .with_metric(gauge(USABLE_SPACE, "bytes", interval))
        .with_metric(gauge(TOTAL_SPACE, "bytes", interval));

    let memory = child_type(MEMORY, "Memory")
        .with_metric(gauge(AVAILABLE_MEMORY, "bytes", interval))
        .with_metric(gauge(TOTAL_MEMORY, "bytes", interval));

    let processor = child_type(PROCESSOR, "Processor [%s]")
        .with_metric(gauge(CPU_USAGE, "percentage", interval));

    TypeSet::new(TYPE_SET_NAME, vec![os, file_store, memory, processor])
}
