//! Resource type definitions as they appear in the configuration file

use crate::error::ConfigError;
use crate::events::MetricKind;
use crate::inventory::{
    AvailDetail, AvailType, Interval, MeasurementType, MetricDetail, MetricType, ResourceType,
    TimeUnit, TypeSet,
};
use crate::protocol::{AttributeLocation, NodeLocation};
use regex::Regex;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_units() -> String {
    "none".to_string()
}

/// A named group of resource types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSetConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub resource_types: Vec<ResourceTypeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTypeConfig {
    pub name: String,

    /// Location pattern relative to the parent resource
    pub location: String,

    /// Names of parent types; empty for root types
    #[serde(default)]
    pub parents: Vec<String>,

    pub resource_name_template: String,

    #[serde(default)]
    pub metrics: Vec<MetricTypeConfig>,

    #[serde(default)]
    pub avails: Vec<AvailTypeConfig>,

    #[serde(default)]
    pub config_properties: Vec<ConfigPropertyConfig>,

    #[serde(default)]
    pub operations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTypeConfig {
    pub name: String,

    /// Node relative to the owning resource; empty means the resource itself
    #[serde(default)]
    pub location: String,

    /// Attribute name, `name#sub` for a field of a complex value
    pub attribute: String,

    pub interval: u64,

    #[serde(default)]
    pub time_units: TimeUnit,

    #[serde(default)]
    pub metric_type: MetricKind,

    #[serde(default = "default_units")]
    pub units: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailTypeConfig {
    pub name: String,

    #[serde(default)]
    pub location: String,

    pub attribute: String,

    pub interval: u64,

    #[serde(default)]
    pub time_units: TimeUnit,

    /// Regex a string value must fully match to count as UP
    #[serde(default)]
    pub up_regex: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPropertyConfig {
    pub name: String,

    #[serde(default)]
    pub location: String,

    pub attribute: String,
}

fn parse_location<L: NodeLocation>(value: &str, owner: &str) -> Result<L, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("[{owner}]: {e}")))
}

fn attribute_location<L: NodeLocation>(
    location: &str,
    attribute: &str,
    owner: &str,
) -> Result<AttributeLocation<L>, ConfigError> {
    if attribute.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "[{owner}] has an empty attribute name"
        )));
    }
    Ok(AttributeLocation::new(parse_location(location, owner)?, attribute))
}

/// Compile an up pattern so that it must match the whole value
pub fn compile_up_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| ConfigError::ValidationError(format!("invalid up regex [{pattern}]: {e}")))
}

impl MetricTypeConfig {
    fn to_metric_type<L: NodeLocation>(&self) -> Result<MetricType<L>, ConfigError> {
        let mut metric = MeasurementType::new(
            &self.name,
            attribute_location(&self.location, &self.attribute, &self.name)?,
            Interval::new(self.interval, self.time_units),
            MetricDetail {
                kind: self.metric_type,
                units: self.units.clone(),
            },
        );
        metric.enabled = self.enabled;
        Ok(metric)
    }
}

impl AvailTypeConfig {
    fn to_avail_type<L: NodeLocation>(&self) -> Result<AvailType<L>, ConfigError> {
        let up_pattern = self.up_regex.as_deref().map(compile_up_pattern).transpose()?;
        let mut avail = MeasurementType::new(
            &self.name,
            attribute_location(&self.location, &self.attribute, &self.name)?,
            Interval::new(self.interval, self.time_units),
            AvailDetail { up_pattern },
        );
        avail.enabled = self.enabled;
        Ok(avail)
    }
}

impl ResourceTypeConfig {
    fn to_resource_type<L: NodeLocation>(&self) -> Result<ResourceType<L>, ConfigError> {
        let mut resource_type = ResourceType::new(
            &self.name,
            parse_location(&self.location, &self.name)?,
            &self.resource_name_template,
        );
        resource_type.parents = self.parents.clone();
        resource_type.operations = self.operations.clone();

        for metric in &self.metrics {
            resource_type = resource_type.with_metric(metric.to_metric_type()?);
        }
        for avail in &self.avails {
            resource_type = resource_type.with_avail(avail.to_avail_type()?);
        }
        for property in &self.config_properties {
            resource_type = resource_type.with_config_property(
                &property.name,
                attribute_location(&property.location, &property.attribute, &property.name)?,
            );
        }
        Ok(resource_type)
    }
}

impl TypeSetConfig {
    /// Build the protocol's type set
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if a location, attribute or up
    /// regex cannot be parsed.
    pub fn to_type_set<L: NodeLocation>(&self) -> Result<TypeSet<L>, ConfigError> {
        let types = self
            .resource_types
            .iter()
            .map(ResourceTypeConfig::to_resource_type)
            .collect::<Result<Vec<_>, _>>()?;
        let mut set = TypeSet::new(&self.name, types);
        set.enabled = self.enabled;
        Ok(set)
    }
}
