//! Recursive resource discovery over the type graph

use crate::inventory::{
    avail_instance_id, metric_instance_id, resource_id, ConfigPropertyInstance, Id,
    MeasurementInstance, MeasurementType, Resource, ResourceType,
};
use crate::protocol::{AttributeValue, NodeLocation, Session};
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

/// Result of walking the type graph once
#[derive(Debug)]
pub struct DiscoveredResources<L: NodeLocation> {
    /// Every resource found, each parent before its children
    pub resources: Vec<Resource<L>>,
    /// Number of subtrees that could not be queried
    pub errors: usize,
}

impl<L: NodeLocation> Default for DiscoveredResources<L> {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            errors: 0,
        }
    }
}

struct ParentRef<L> {
    id: Id,
    location: L,
}

/// Walks an endpoint's type graph and builds the resources it finds
pub struct Discovery;

impl Discovery {
    /// Discover everything reachable from the root types
    ///
    /// A failure querying one subtree is logged and counted; the rest of the
    /// scan continues.
    pub fn discover_all<L: NodeLocation>(session: &Session<L>) -> DiscoveredResources<L> {
        let mut discovered = DiscoveredResources::default();
        for root_type in session.type_manager().root_types() {
            Self::discover_children(session, None, &root_type, &mut discovered);
        }
        debug!(
            "Discovered [{}] resources on endpoint [{}] with [{}] errors",
            discovered.resources.len(),
            session.endpoint_name(),
            discovered.errors
        );
        discovered
    }

    fn discover_children<L: NodeLocation>(
        session: &Session<L>,
        parent: Option<&ParentRef<L>>,
        resource_type: &Arc<ResourceType<L>>,
        discovered: &mut DiscoveredResources<L>,
    ) {
        let resolver = session.resolver();
        let query = match parent {
            Some(parent) => resolver.absolutize(&parent.location, &resource_type.location),
            None => resource_type.location.clone(),
        };

        let nodes = match session.fetch_nodes(&query) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(
                    "Failed to discover resources of type [{}] at [{}] on endpoint [{}]: {}",
                    resource_type.name,
                    query,
                    session.endpoint_name(),
                    e
                );
                discovered.errors += 1;
                return;
            }
        };

        let child_types = session.type_manager().child_types(&resource_type.name);

        for location in nodes.into_keys() {
            let resource = Self::build_resource(session, parent, resource_type, location);
            let this = ParentRef {
                id: resource.id.clone(),
                location: resource.location.clone(),
            };
            discovered.resources.push(resource);

            for child_type in &child_types {
                Self::discover_children(session, Some(&this), child_type, discovered);
            }
        }
    }

    fn build_resource<L: NodeLocation>(
        session: &Session<L>,
        parent: Option<&ParentRef<L>>,
        resource_type: &Arc<ResourceType<L>>,
        location: L,
    ) -> Resource<L> {
        let resolver = session.resolver();
        let endpoint_name = session.endpoint_name();
        let id = resource_id(session.feed_id(), endpoint_name, &location);
        let name = resolver.apply_template(
            &resource_type.resource_name_template,
            &location,
            endpoint_name,
        );

        let mut resource = Resource::new(
            id,
            name,
            location,
            Arc::clone(resource_type),
            parent.map(|p| p.id.clone()),
        );

        for property in &resource_type.config_properties {
            let attribute = resolver.absolutize_attribute(&resource.location, &property.location);
            let value = match session.fetch_attribute(&attribute) {
                Ok(value) => Self::property_value(value),
                Err(e) => {
                    warn!(
                        "Failed to read config property [{}] of resource [{}]: {}",
                        property.name, resource.id, e
                    );
                    None
                }
            };
            resource.config.push(ConfigPropertyInstance {
                name: property.name.clone(),
                value,
            });
        }

        resource.metrics = Self::instances(session, &resource, &resource_type.metric_types, metric_instance_id);
        resource.avails = Self::instances(session, &resource, &resource_type.avail_types, avail_instance_id);
        resource
    }

    fn instances<L: NodeLocation, D>(
        session: &Session<L>,
        resource: &Resource<L>,
        types: &[Arc<MeasurementType<L, D>>],
        make_id: fn(&Id, &str) -> Id,
    ) -> Vec<MeasurementInstance<L, D>> {
        let resolver = session.resolver();
        let mut instances = Vec::new();

        for measurement_type in types.iter().filter(|t| t.enabled) {
            let location = resolver.absolutize_attribute(&resource.location, &measurement_type.location);
            match session.attribute_exists(&location) {
                Ok(true) => instances.push(MeasurementInstance {
                    id: make_id(&resource.id, &measurement_type.name),
                    name: measurement_type.name.clone(),
                    location,
                    measurement_type: Arc::clone(measurement_type),
                    storage_key: None,
                }),
                Ok(false) => debug!(
                    "Attribute [{}] does not exist on resource [{}], skipping [{}]",
                    location, resource.id, measurement_type.name
                ),
                Err(e) => warn!(
                    "Failed to check attribute [{}] of resource [{}]: {}",
                    location, resource.id, e
                ),
            }
        }
        instances
    }

    fn property_value(value: AttributeValue) -> Option<String> {
        let values: Vec<String> = value
            .into_values()
            .into_iter()
            .filter_map(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::inventory::{
        AvailDetail, AvailType, Interval, MetricDetail, MetricType, ResourceTypeManager, TypeSet,
    };
    use crate::protocol::dmr::{DmrLocationResolver, DmrNodeLocation};
    use crate::protocol::testing::InMemoryDriver;
    use crate::protocol::AttributeLocation;

    fn loc(path: &str) -> DmrNodeLocation {
        path.parse().unwrap()
    }

    fn type_manager() -> Arc<ResourceTypeManager<DmrNodeLocation>> {
        let server = ResourceType::new("WildFly Server", loc("/"), "Server [%_ManagedServerName%]")
            .with_config_property("Version", AttributeLocation::new(loc("/"), "product-version"))
            .with_avail(AvailType::new(
                "Server Availability",
                AttributeLocation::new(loc("/"), "server-state"),
                Interval::seconds(30),
                AvailDetail::default(),
            ));
        let datasource = ResourceType::new(
            "Datasource",
            loc("/subsystem=datasources/data-source=*"),
            "Datasource [%data-source%]",
        )
        .with_parents(&["WildFly Server"])
        .with_metric(MetricType::new(
            "Active Count",
            AttributeLocation::new(loc("/statistics=pool"), "ActiveCount"),
            Interval::seconds(60),
            MetricDetail::default(),
        ))
        .with_metric(MetricType::new(
            "Missing",
            AttributeLocation::new(loc("/"), "no-such-attribute"),
            Interval::seconds(60),
            MetricDetail::default(),
        ));

        let sets = vec![TypeSet::new("main", vec![server, datasource])];
        Arc::new(ResourceTypeManager::new(&sets, None, 1_000).unwrap())
    }

    fn session(driver: InMemoryDriver<DmrNodeLocation>) -> Session<DmrNodeLocation> {
        Session::new(
            "feed",
            "local",
            "dmr",
            Box::new(driver),
            Arc::new(DmrLocationResolver),
            type_manager(),
            Arc::new(Diagnostics::new()),
        )
    }

    fn populated_driver() -> InMemoryDriver<DmrNodeLocation> {
        InMemoryDriver::new()
            .with_node(loc("/"))
            .with_attribute(loc("/"), "product-version", "30.0.0.Final".into())
            .with_attribute(loc("/"), "server-state", "running".into())
            .with_node(loc("/subsystem=datasources/data-source=ExampleDS"))
            .with_node(loc("/subsystem=datasources/data-source=OtherDS"))
            .with_attribute(
                loc("/subsystem=datasources/data-source=ExampleDS/statistics=pool"),
                "ActiveCount",
                3.into(),
            )
            .with_attribute(
                loc("/subsystem=datasources/data-source=OtherDS/statistics=pool"),
                "ActiveCount",
                0.into(),
            )
    }

    #[test]
    fn test_discovers_tree_parents_first() {
        let discovered = Discovery::discover_all(&session(populated_driver()));

        assert_eq!(discovered.errors, 0);
        assert_eq!(discovered.resources.len(), 3);

        let server = &discovered.resources[0];
        assert_eq!(server.name, "Server [local]");
        assert_eq!(server.id.as_str(), "feed~local~/");
        assert_eq!(server.config_value("Version"), Some("30.0.0.Final"));
        assert_eq!(server.avails.len(), 1);
        assert!(server.is_root());

        let ds = &discovered.resources[1];
        assert_eq!(ds.name, "Datasource [ExampleDS]");
        assert_eq!(ds.parent.as_ref(), Some(&server.id));
        assert_eq!(ds.metrics.len(), 1);
        assert_eq!(
            ds.metrics[0].location.location.to_string(),
            "/subsystem=datasources/data-source=ExampleDS/statistics=pool"
        );
        assert_eq!(
            ds.metrics[0].id.as_str(),
            "MI~R~[feed~local~/subsystem=datasources/data-source=ExampleDS]~MT~Active Count"
        );
    }

    #[test]
    fn test_repeated_discovery_yields_identical_ids() {
        let first = Discovery::discover_all(&session(populated_driver()));
        let second = Discovery::discover_all(&session(populated_driver()));

        let first_ids: Vec<&Id> = first.resources.iter().map(|r| &r.id).collect();
        let second_ids: Vec<&Id> = second.resources.iter().map(|r| &r.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_failing_subtree_is_skipped() {
        let driver = populated_driver()
            .failing_query(loc("/subsystem=datasources/data-source=*"));
        let discovered = Discovery::discover_all(&session(driver));

        assert_eq!(discovered.errors, 1);
        assert_eq!(discovered.resources.len(), 1);
        assert_eq!(discovered.resources[0].name, "Server [local]");
    }

    #[test]
    fn test_no_matches_is_not_an_error() {
        let discovered = Discovery::discover_all(&session(InMemoryDriver::new()));

        assert_eq!(discovered.errors, 0);
        assert!(discovered.resources.is_empty());
    }
}
