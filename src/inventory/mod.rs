//! Resource types, discovered resources and the per-endpoint resource graph

mod ids;
mod interval;
mod resource;
mod resource_manager;
mod resource_type_manager;
mod types;

pub use ids::{
    avail_instance_id, metric_instance_id, parse_resource_id, resource_id, Id, ResourceIdParts,
};
pub use interval::{Interval, TimeUnit};
pub use resource::{
    AvailInstance, ConfigPropertyInstance, MeasurementInstance, MetricInstance, Resource,
};
pub use resource_manager::{AddResult, ResourceManager, ResourceObserver};
pub use resource_type_manager::ResourceTypeManager;
pub use types::{
    AvailDetail, AvailType, ConfigPropertyType, MeasurementType, MetricDetail, MetricType,
    ResourceType, TypeSet,
};

use crate::protocol::NodeLocation;
use std::sync::Arc;

/// The changes one discovery scan made to an endpoint's resource graph
#[derive(Debug, Clone)]
pub struct InventoryEvent<L: NodeLocation> {
    pub feed_id: String,
    pub endpoint_name: String,
    pub added: Vec<Arc<Resource<L>>>,
    pub modified: Vec<Arc<Resource<L>>>,
    pub removed: Vec<Arc<Resource<L>>>,
}

impl<L: NodeLocation> InventoryEvent<L> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Consumer of discovery deltas, such as an inventory backend
#[cfg_attr(test, mockall::automock)]
pub trait InventoryListener<L: NodeLocation>: Send + Sync {
    fn resources_changed(&self, event: &InventoryEvent<L>);
}

/// Writes discovery deltas to the log instead of an inventory backend
#[derive(Debug, Default)]
pub struct LoggingInventoryListener;

impl<L: NodeLocation> InventoryListener<L> for LoggingInventoryListener {
    fn resources_changed(&self, event: &InventoryEvent<L>) {
        log::info!(
            "Inventory of [{}] changed: [{}] added, [{}] modified, [{}] removed",
            event.endpoint_name,
            event.added.len(),
            event.modified.len(),
            event.removed.len()
        );
        for resource in &event.added {
            log::debug!("Added resource [{}] at [{}]", resource.id, resource.location);
        }
        for resource in &event.removed {
            log::debug!("Removed resource [{}]", resource.id);
        }
    }
}
