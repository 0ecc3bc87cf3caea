//! Protocol-agnostic location algebra, drivers and sessions
//!
//! Every monitored protocol plugs into the collection core through three
//! seams:
//!
//! - a [`NodeLocation`] type addressing nodes of its management model
//! - a [`LocationResolver`] that knows how to combine and match locations
//! - a [`Driver`] that performs the actual I/O
//!
//! Everything above this module (discovery, scheduling, dispatching) is
//! written once against these traits.

pub mod discovery;
pub mod dmr;
pub mod endpoint_service;
pub mod jmx;
pub mod platform;
mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use discovery::{DiscoveredResources, Discovery};
pub use endpoint_service::{
    DiscoveryOutcome, EndpointDefinition, EndpointService, MeasurementConsumer,
};
pub use session::Session;

use crate::error::ProtocolError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Address of a node in some protocol's management model
///
/// A location is either concrete, addressing exactly one node, or a
/// multi-target pattern containing wildcards.
pub trait NodeLocation:
    Clone
    + Eq
    + Hash
    + Ord
    + fmt::Debug
    + fmt::Display
    + FromStr<Err = ProtocolError>
    + Send
    + Sync
    + 'static
{
}

/// An attribute of a node, optionally narrowed to a sub-field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeLocation<L> {
    pub location: L,
    pub attribute: String,
    pub sub_reference: Option<String>,
}

impl<L: NodeLocation> AttributeLocation<L> {
    /// Create an attribute location
    ///
    /// `attribute` may use `name#sub` to address a field of a complex value.
    pub fn new(location: L, attribute: &str) -> Self {
        match attribute.split_once('#') {
            Some((name, sub)) => Self {
                location,
                attribute: name.to_string(),
                sub_reference: Some(sub.to_string()),
            },
            None => Self {
                location,
                attribute: attribute.to_string(),
                sub_reference: None,
            },
        }
    }
}

impl<L: NodeLocation> fmt::Display for AttributeLocation<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_reference {
            Some(sub) => write!(f, "{}:{}#{}", self.location, self.attribute, sub),
            None => write!(f, "{}:{}", self.location, self.attribute),
        }
    }
}

/// Protocol-specific rules for combining and matching locations
pub trait LocationResolver<L: NodeLocation>: Send + Sync {
    /// Whether the location contains wildcards and may address many nodes
    fn is_multi_target(&self, location: &L) -> bool;

    /// The value `single` has in place of the first wildcard of `multi_target`
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::LocationMismatch` if `single` was not produced
    /// by a query for `multi_target`.
    fn find_wildcard_match(&self, multi_target: &L, single: &L) -> Result<String, ProtocolError>;

    /// Whether `child` lies strictly below `parent`
    fn is_parent(&self, parent: &L, child: &L) -> bool;

    /// Whether `candidate` is addressed by `query`
    fn matches(&self, query: &L, candidate: &L) -> bool;

    /// Build a resource name from a template and the resource's location
    ///
    /// Every resolver substitutes `%key%` tokens with the matching location
    /// component and `%_ManagedServerName%` with the endpoint name.
    fn apply_template(&self, template: &str, location: &L, endpoint_name: &str) -> String;

    /// Resolve `location` against `base`
    fn absolutize(&self, base: &L, location: &L) -> L;

    fn absolutize_attribute(
        &self,
        base: &L,
        attribute: &AttributeLocation<L>,
    ) -> AttributeLocation<L> {
        AttributeLocation {
            location: self.absolutize(base, &attribute.location),
            attribute: attribute.attribute.clone(),
            sub_reference: attribute.sub_reference.clone(),
        }
    }
}

/// Result of reading an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// The location addressed a single node
    Single(Value),
    /// The location was a pattern; one value per matched node
    Multiple(Vec<Value>),
}

impl AttributeValue {
    pub fn into_values(self) -> Vec<Value> {
        match self {
            AttributeValue::Single(value) => vec![value],
            AttributeValue::Multiple(values) => values,
        }
    }
}

/// Protocol I/O against one endpoint
pub trait Driver<L: NodeLocation>: Send {
    /// Find the nodes addressed by `query`
    ///
    /// Zero matches is not an error and yields an empty map.
    fn fetch_nodes(&self, query: &L) -> Result<BTreeMap<L, Value>, ProtocolError>;

    fn attribute_exists(&self, location: &AttributeLocation<L>) -> Result<bool, ProtocolError>;

    fn fetch_attribute(&self, location: &AttributeLocation<L>)
        -> Result<AttributeValue, ProtocolError>;
}

/// Creates drivers for an endpoint; one driver per session
pub trait DriverFactory<L: NodeLocation>: Send + Sync {
    /// Short protocol name used in logs and diagnostics
    fn protocol(&self) -> &'static str;

    fn create_driver(&self) -> Result<Box<dyn Driver<L>>, ProtocolError>;
}
