use crate::inventory::types::{AvailDetail, MeasurementType, MetricDetail, ResourceType};
use crate::inventory::Id;
use crate::protocol::{AttributeLocation, NodeLocation};
use std::sync::Arc;

/// A concrete metric or availability to collect for one resource
#[derive(Debug, Clone)]
pub struct MeasurementInstance<L: NodeLocation, D> {
    pub id: Id,
    pub name: String,
    /// Absolute location of the attribute to read
    pub location: AttributeLocation<L>,
    pub measurement_type: Arc<MeasurementType<L, D>>,
    /// Overrides the key data points are stored under
    pub storage_key: Option<String>,
}

pub type MetricInstance<L> = MeasurementInstance<L, MetricDetail>;
pub type AvailInstance<L> = MeasurementInstance<L, AvailDetail>;

impl<L: NodeLocation, D> MeasurementInstance<L, D> {
    /// Key the collected data points are stored under
    pub fn key(&self) -> &str {
        self.storage_key.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn interval_millis(&self) -> u64 {
        self.measurement_type.interval.millis()
    }

    fn same_as(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.location == other.location
            && self.storage_key == other.storage_key
            && self.measurement_type.interval == other.measurement_type.interval
    }
}

/// A configuration property value read at discovery time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPropertyInstance {
    pub name: String,
    /// `None` when the value could not be read
    pub value: Option<String>,
}

/// A discovered, addressable node of an endpoint
#[derive(Debug, Clone)]
pub struct Resource<L: NodeLocation> {
    pub id: Id,
    pub name: String,
    pub location: L,
    pub resource_type: Arc<ResourceType<L>>,
    /// `None` only for root resources
    pub parent: Option<Id>,
    pub metrics: Vec<MetricInstance<L>>,
    pub avails: Vec<AvailInstance<L>>,
    pub config: Vec<ConfigPropertyInstance>,
}

impl<L: NodeLocation> Resource<L> {
    pub fn new(
        id: Id,
        name: String,
        location: L,
        resource_type: Arc<ResourceType<L>>,
        parent: Option<Id>,
    ) -> Self {
        Self {
            id,
            name,
            location,
            resource_type,
            parent,
            metrics: Vec::new(),
            avails: Vec::new(),
            config: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn config_value(&self, name: &str) -> Option<&str> {
        self.config
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.value.as_deref())
    }

    /// Whether `other` describes this resource without any visible change
    pub fn same_as(&self, other: &Resource<L>) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.location == other.location
            && self.parent == other.parent
            && self.resource_type.name == other.resource_type.name
            && self.config == other.config
            && self.metrics.len() == other.metrics.len()
            && self.avails.len() == other.avails.len()
            && self.metrics.iter().zip(&other.metrics).all(|(a, b)| a.same_as(b))
            && self.avails.iter().zip(&other.avails).all(|(a, b)| a.same_as(b))
    }
}
