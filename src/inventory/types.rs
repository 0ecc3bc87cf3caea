//! Resource and measurement type definitions
//!
//! Types are built once per endpoint from configuration and never change
//! afterwards; resources and measurement instances hold `Arc`s to them.

use crate::events::MetricKind;
use crate::inventory::{Id, Interval};
use crate::protocol::{AttributeLocation, NodeLocation};
use regex::Regex;
use std::sync::Arc;

/// Details specific to metric types
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDetail {
    pub kind: MetricKind,
    pub units: String,
}

impl Default for MetricDetail {
    fn default() -> Self {
        Self {
            kind: MetricKind::Gauge,
            units: "none".to_string(),
        }
    }
}

/// Details specific to availability types
#[derive(Debug, Clone, Default)]
pub struct AvailDetail {
    /// Pattern a string value must match to be considered UP
    pub up_pattern: Option<Regex>,
}

/// A metric or availability definition attached to a resource type
#[derive(Debug, Clone)]
pub struct MeasurementType<L: NodeLocation, D> {
    pub id: Id,
    pub name: String,
    /// Attribute to read, relative to the owning resource's location
    pub location: AttributeLocation<L>,
    pub interval: Interval,
    pub enabled: bool,
    pub detail: D,
}

pub type MetricType<L> = MeasurementType<L, MetricDetail>;
pub type AvailType<L> = MeasurementType<L, AvailDetail>;

impl<L: NodeLocation, D> MeasurementType<L, D> {
    pub fn new(name: &str, location: AttributeLocation<L>, interval: Interval, detail: D) -> Self {
        Self {
            id: Id::new(name),
            name: name.to_string(),
            location,
            interval,
            enabled: true,
            detail,
        }
    }
}

/// A resource configuration property read once at discovery time
#[derive(Debug, Clone)]
pub struct ConfigPropertyType<L: NodeLocation> {
    pub name: String,
    pub location: AttributeLocation<L>,
}

/// A node in the resource type graph
#[derive(Debug, Clone)]
pub struct ResourceType<L: NodeLocation> {
    pub id: Id,
    pub name: String,
    /// Pattern locating resources of this type relative to a parent resource
    pub location: L,
    /// Names of the types whose resources may contain resources of this type
    pub parents: Vec<String>,
    pub resource_name_template: String,
    pub metric_types: Vec<Arc<MetricType<L>>>,
    pub avail_types: Vec<Arc<AvailType<L>>>,
    pub config_properties: Vec<ConfigPropertyType<L>>,
    /// Names of operations the type declares; they are not executed by the agent
    pub operations: Vec<String>,
}

impl<L: NodeLocation> ResourceType<L> {
    pub fn new(name: &str, location: L, resource_name_template: &str) -> Self {
        Self {
            id: Id::new(name),
            name: name.to_string(),
            location,
            parents: Vec::new(),
            resource_name_template: resource_name_template.to_string(),
            metric_types: Vec::new(),
            avail_types: Vec::new(),
            config_properties: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn with_parents(mut self, parents: &[&str]) -> Self {
        self.parents = parents.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_metric(mut self, metric: MetricType<L>) -> Self {
        self.metric_types.push(Arc::new(metric));
        self
    }

    pub fn with_avail(mut self, avail: AvailType<L>) -> Self {
        self.avail_types.push(Arc::new(avail));
        self
    }

    pub fn with_config_property(mut self, name: &str, location: AttributeLocation<L>) -> Self {
        self.config_properties.push(ConfigPropertyType {
            name: name.to_string(),
            location,
        });
        self
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Number of metric and avail types that will actually be collected
    pub fn enabled_measurement_count(&self) -> usize {
        self.metric_types.iter().filter(|m| m.enabled).count()
            + self.avail_types.iter().filter(|a| a.enabled).count()
    }
}

/// A named group of resource types, referenced by endpoints
#[derive(Debug, Clone)]
pub struct TypeSet<L: NodeLocation> {
    pub name: String,
    pub enabled: bool,
    pub types: Vec<ResourceType<L>>,
}

impl<L: NodeLocation> TypeSet<L> {
    pub fn new(name: &str, types: Vec<ResourceType<L>>) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            types,
        }
    }
}
