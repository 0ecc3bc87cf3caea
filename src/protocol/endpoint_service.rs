//! Per-endpoint facade over discovery, the resource graph and measurement

use crate::diagnostics::Diagnostics;
use crate::error::{ProtocolError, ServiceError};
use crate::events::{Avail, AvailDataPoint, MetricDataPoint};
use crate::inventory::{
    AddResult, AvailInstance, Id, InventoryEvent, InventoryListener, MetricInstance, Resource,
    ResourceManager, ResourceObserver, ResourceTypeManager,
};
use crate::protocol::{
    AttributeValue, Discovery, DriverFactory, LocationResolver, NodeLocation, Session,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// String values matching this are UP unless the avail type defines its own pattern
pub const DEFAULT_UP_PATTERN: &str = "^(?i)(?:UP|OK|TRUE|RUNNING)$";

fn default_up_pattern() -> &'static Regex {
    static UP: OnceLock<Regex> = OnceLock::new();
    UP.get_or_init(|| Regex::new(DEFAULT_UP_PATTERN).expect("failed to compile default up pattern"))
}

/// Receives data points produced by a measurement batch
pub trait MeasurementConsumer<P>: Send + Sync {
    fn accept(&self, point: P);
}

/// Identity and readiness settings of one monitored endpoint
#[derive(Debug, Clone)]
pub struct EndpointDefinition<L: NodeLocation> {
    pub name: String,
    pub feed_id: String,
    /// Locations that must each resolve to at least one node before the
    /// endpoint is considered ready
    pub wait_for: Vec<L>,
}

impl<L: NodeLocation> EndpointDefinition<L> {
    pub fn new(name: &str, feed_id: &str) -> Self {
        Self {
            name: name.to_string(),
            feed_id: feed_id.to_string(),
            wait_for: Vec::new(),
        }
    }
}

/// What one discovery scan changed
#[derive(Debug)]
pub struct DiscoveryOutcome<L: NodeLocation> {
    pub event: InventoryEvent<L>,
    /// Subtrees that could not be queried; removals are skipped when non-zero
    pub errors: usize,
    pub duration: Duration,
}

/// Clears the single-flight flag however discovery exits
struct DiscoveryGuard<'a>(&'a AtomicBool);

impl<'a> DiscoveryGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DiscoveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything the agent does against one endpoint
///
/// The service owns the endpoint's resource graph. Discovery replaces it by
/// diff, collectors read through [`measure_metrics`](Self::measure_metrics)
/// and [`measure_avails`](Self::measure_avails), and observers registered
/// with [`add_resource_observer`](Self::add_resource_observer) hear about
/// every change synchronously.
pub struct EndpointService<L: NodeLocation> {
    definition: EndpointDefinition<L>,
    driver_factory: Arc<dyn DriverFactory<L>>,
    resolver: Arc<dyn LocationResolver<L>>,
    type_manager: Arc<ResourceTypeManager<L>>,
    resources: RwLock<ResourceManager<L>>,
    diagnostics: Arc<Diagnostics>,
    discovering: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn InventoryListener<L>>>>,
}

impl<L: NodeLocation> EndpointService<L> {
    pub fn new(
        definition: EndpointDefinition<L>,
        driver_factory: Arc<dyn DriverFactory<L>>,
        resolver: Arc<dyn LocationResolver<L>>,
        type_manager: Arc<ResourceTypeManager<L>>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let resources = RwLock::new(ResourceManager::new(&definition.name));
        Self {
            definition,
            driver_factory,
            resolver,
            type_manager,
            resources,
            diagnostics,
            discovering: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn feed_id(&self) -> &str {
        &self.definition.feed_id
    }

    pub fn protocol(&self) -> &'static str {
        self.driver_factory.protocol()
    }

    fn read_resources(&self) -> RwLockReadGuard<'_, ResourceManager<L>> {
        self.resources.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_resources(&self) -> RwLockWriteGuard<'_, ResourceManager<L>> {
        self.resources.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_resource_observer(&self, observer: Arc<dyn ResourceObserver<L>>) {
        self.write_resources().add_observer(observer);
    }

    pub fn add_inventory_listener(&self, listener: Arc<dyn InventoryListener<L>>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Open a session with a fresh driver
    ///
    /// # Errors
    ///
    /// Returns the driver factory's error if no driver could be created.
    pub fn open_session(&self) -> Result<Session<L>, ProtocolError> {
        let driver = self.driver_factory.create_driver()?;
        Ok(Session::new(
            &self.definition.feed_id,
            &self.definition.name,
            self.driver_factory.protocol(),
            driver,
            Arc::clone(&self.resolver),
            Arc::clone(&self.type_manager),
            Arc::clone(&self.diagnostics),
        ))
    }

    /// Open a session and check every `wait_for` location resolves
    fn open_ready_session(&self) -> Result<Session<L>, ServiceError> {
        let session = self.open_session()?;
        for location in &self.definition.wait_for {
            if session.fetch_nodes(location)?.is_empty() {
                debug!(
                    "Endpoint [{}] waits for [{}] which does not exist yet",
                    self.definition.name, location
                );
                return Err(ServiceError::NotReady(self.definition.name.clone()));
            }
        }
        Ok(session)
    }

    /// Run a full discovery scan and patch the resource graph with the result
    ///
    /// Resources that were not found again are removed only when the scan
    /// had no errors.
    ///
    /// # Errors
    ///
    /// - `ServiceError::DiscoveryInProgress` if another scan is running
    /// - `ServiceError::NotReady` if a `wait_for` location does not resolve
    /// - `ServiceError::Protocol` if no session could be opened
    pub fn discover_resources(&self) -> Result<DiscoveryOutcome<L>, ServiceError> {
        let _guard = DiscoveryGuard::acquire(&self.discovering)
            .ok_or_else(|| ServiceError::DiscoveryInProgress(self.definition.name.clone()))?;

        let started = Instant::now();
        let discovered = {
            let session = self.open_ready_session()?;
            Discovery::discover_all(&session)
        };

        let mut event = InventoryEvent {
            feed_id: self.definition.feed_id.clone(),
            endpoint_name: self.definition.name.clone(),
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
        };

        {
            let mut resources = self.write_resources();
            let mut seen: HashSet<Id> = HashSet::with_capacity(discovered.resources.len());

            for resource in discovered.resources {
                let id = resource.id.clone();
                let result = resources.add_resource(resource);
                if let Some(stored) = resources.get_resource(&id) {
                    match result {
                        AddResult::Added => event.added.push(stored),
                        AddResult::Modified => event.modified.push(stored),
                        AddResult::Unchanged => {}
                    }
                }
                seen.insert(id);
            }

            if discovered.errors == 0 {
                let stale: Vec<Id> = resources
                    .resources_depth_first()
                    .iter()
                    .filter(|r| !seen.contains(&r.id))
                    .map(|r| r.id.clone())
                    .collect();
                for id in stale {
                    event.removed.extend(resources.remove_resource(&id));
                }
            } else {
                warn!(
                    "Discovery of endpoint [{}] had [{}] errors, keeping resources that were not found",
                    self.definition.name, discovered.errors
                );
            }

            resources.log_tree_graph();
        }

        let duration = started.elapsed();
        self.diagnostics.record_discovery(duration);
        info!(
            "Discovered endpoint [{}] in [{}ms]: added=[{}] modified=[{}] removed=[{}] errors=[{}]",
            self.definition.name,
            duration.as_millis(),
            event.added.len(),
            event.modified.len(),
            event.removed.len(),
            discovered.errors
        );

        if !event.is_empty() {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            for listener in listeners.iter() {
                listener.resources_changed(&event);
            }
        }

        Ok(DiscoveryOutcome {
            event,
            errors: discovered.errors,
            duration,
        })
    }

    /// Collect one batch of metrics
    ///
    /// Instances whose read fails produce no data point. A connectivity
    /// failure abandons the rest of the batch.
    ///
    /// # Errors
    ///
    /// `ServiceError::NotReady` while a `wait_for` location does not resolve;
    /// connectivity failures are logged, not returned.
    pub fn measure_metrics(
        &self,
        instances: &[&MetricInstance<L>],
        consumer: &dyn MeasurementConsumer<MetricDataPoint>,
    ) -> Result<(), ServiceError> {
        let session = match self.open_ready_session() {
            Ok(session) => session,
            Err(ServiceError::Protocol(e)) if e.is_connectivity() => {
                error!(
                    "Endpoint [{}] is unreachable, skipping [{}] metrics: {}",
                    self.definition.name,
                    instances.len(),
                    e
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for instance in instances {
            match session.fetch_attribute(&instance.location) {
                Ok(value) => match metric_value(value) {
                    Some(value) => consumer.accept(MetricDataPoint {
                        key: instance.key().to_string(),
                        timestamp: Utc::now(),
                        value,
                        kind: instance.measurement_type.detail.kind,
                        units: instance.measurement_type.detail.units.clone(),
                    }),
                    None => debug!(
                        "Metric [{}] on endpoint [{}] has no numeric value",
                        instance.id, self.definition.name
                    ),
                },
                Err(e) if e.is_connectivity() => {
                    error!(
                        "Endpoint [{}] became unreachable while collecting metric [{}]: {}",
                        self.definition.name, instance.id, e
                    );
                    return Ok(());
                }
                Err(e) => warn!(
                    "Failed to collect metric [{}] on endpoint [{}]: {}",
                    instance.id, self.definition.name, e
                ),
            }
        }
        Ok(())
    }

    /// Collect one batch of availabilities
    ///
    /// Every requested instance produces a data point: a failed read is
    /// reported DOWN, and an unreachable endpoint reports all of them DOWN.
    ///
    /// # Errors
    ///
    /// `ServiceError::NotReady` while a `wait_for` location does not resolve.
    pub fn measure_avails(
        &self,
        instances: &[&AvailInstance<L>],
        consumer: &dyn MeasurementConsumer<AvailDataPoint>,
    ) -> Result<(), ServiceError> {
        let report = |instance: &AvailInstance<L>, value: Avail| {
            consumer.accept(AvailDataPoint {
                key: instance.key().to_string(),
                timestamp: Utc::now(),
                value,
            })
        };

        let session = match self.open_ready_session() {
            Ok(session) => session,
            Err(ServiceError::Protocol(e)) if e.is_connectivity() => {
                error!(
                    "Endpoint [{}] is unreachable, reporting [{}] avails DOWN: {}",
                    self.definition.name,
                    instances.len(),
                    e
                );
                for instance in instances {
                    report(*instance, Avail::Down);
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut unreachable = false;
        for instance in instances {
            if unreachable {
                report(*instance, Avail::Down);
                continue;
            }
            match session.fetch_attribute(&instance.location) {
                Ok(value) => {
                    let pattern = instance
                        .measurement_type
                        .detail
                        .up_pattern
                        .as_ref()
                        .unwrap_or_else(|| default_up_pattern());
                    report(*instance, avail_value(value, pattern));
                }
                Err(e) => {
                    if e.is_connectivity() {
                        error!(
                            "Endpoint [{}] became unreachable while collecting avail [{}]: {}",
                            self.definition.name, instance.id, e
                        );
                        unreachable = true;
                    } else {
                        warn!(
                            "Failed to collect avail [{}] on endpoint [{}]: {}",
                            instance.id, self.definition.name, e
                        );
                    }
                    report(*instance, Avail::Down);
                }
            }
        }
        Ok(())
    }

    pub fn get_resource(&self, id: &Id) -> Option<Arc<Resource<L>>> {
        self.read_resources().get_resource(id)
    }

    /// Resources whose location matches `query`
    pub fn find_resources(&self, query: &L) -> Vec<Arc<Resource<L>>> {
        self.read_resources().find_resources(query, self.resolver.as_ref())
    }

    /// Remove resources matching `query` together with their descendants
    pub fn remove_resources(&self, query: &L) -> Vec<Arc<Resource<L>>> {
        self.write_resources()
            .remove_resources(query, self.resolver.as_ref())
    }

    /// Drop the whole graph; observers hear about every removal
    pub fn clear_resources(&self) -> Vec<Arc<Resource<L>>> {
        let mut resources = self.write_resources();
        let roots: Vec<Id> = resources.root_resources().iter().map(|r| r.id.clone()).collect();
        let mut removed = Vec::with_capacity(resources.len());
        for id in &roots {
            removed.extend(resources.remove_resource(id));
        }
        removed
    }

    /// All resources, each parent before its children
    pub fn resources_snapshot(&self) -> Vec<Arc<Resource<L>>> {
        self.read_resources().resources_depth_first()
    }

    pub fn resource_count(&self) -> usize {
        self.read_resources().len()
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Reduce a read to one metric value, summing multi-node reads
fn metric_value(value: AttributeValue) -> Option<f64> {
    value
        .into_values()
        .iter()
        .filter_map(numeric)
        .fold(None, |sum, v| Some(sum.unwrap_or(0.0) + v))
}

fn single_avail(value: &Value, up_pattern: &Regex) -> Avail {
    match value {
        Value::Bool(up) => Avail::from(*up),
        Value::Number(n) => match n.as_f64() {
            Some(v) => Avail::from(v != 0.0),
            None => Avail::Unknown,
        },
        Value::String(s) => Avail::from(up_pattern.is_match(s.trim())),
        _ => Avail::Unknown,
    }
}

/// Reduce a read to one availability; any DOWN node makes the whole read DOWN
fn avail_value(value: AttributeValue, up_pattern: &Regex) -> Avail {
    value
        .into_values()
        .iter()
        .map(|v| single_avail(v, up_pattern))
        .reduce(Avail::merge)
        .unwrap_or(Avail::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{
        AvailDetail, AvailType, Interval, MetricDetail, MetricType, MockInventoryListener,
        ResourceType, TypeSet,
    };
    use crate::protocol::dmr::{DmrLocationResolver, DmrNodeLocation};
    use crate::protocol::testing::{CollectingConsumer, InMemoryDriver};
    use crate::protocol::AttributeLocation;
    use serde_json::json;

    fn loc(path: &str) -> DmrNodeLocation {
        path.parse().unwrap()
    }

    fn type_manager() -> Arc<ResourceTypeManager<DmrNodeLocation>> {
        let server = ResourceType::new("WildFly Server", loc("/"), "Server [%_ManagedServerName%]")
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
        .with_avail(AvailType::new(
            "Datasource Enabled",
            AttributeLocation::new(loc("/"), "enabled"),
            Interval::seconds(30),
            AvailDetail::default(),
        ));

        let sets = vec![TypeSet::new("main", vec![server, datasource])];
        Arc::new(ResourceTypeManager::new(&sets, None, 1_000).unwrap())
    }

    fn driver() -> InMemoryDriver<DmrNodeLocation> {
        InMemoryDriver::new()
            .with_node(loc("/"))
            .with_attribute(loc("/"), "server-state", json!("running"))
            .with_node(loc("/subsystem=datasources/data-source=ExampleDS"))
            .with_attribute(loc("/subsystem=datasources/data-source=ExampleDS"), "enabled", json!(true))
            .with_attribute(
                loc("/subsystem=datasources/data-source=ExampleDS/statistics=pool"),
                "ActiveCount",
                json!(3),
            )
            .with_node(loc("/subsystem=datasources/data-source=OtherDS"))
            .with_attribute(loc("/subsystem=datasources/data-source=OtherDS"), "enabled", json!(false))
            .with_attribute(
                loc("/subsystem=datasources/data-source=OtherDS/statistics=pool"),
                "ActiveCount",
                json!("4"),
            )
    }

    fn service(driver: &InMemoryDriver<DmrNodeLocation>) -> EndpointService<DmrNodeLocation> {
        EndpointService::new(
            EndpointDefinition::new("local", "feed"),
            Arc::new(driver.clone()),
            Arc::new(DmrLocationResolver),
            type_manager(),
            Arc::new(Diagnostics::new()),
        )
    }

    fn all_metrics(service: &EndpointService<DmrNodeLocation>) -> Vec<MetricInstance<DmrNodeLocation>> {
        service
            .resources_snapshot()
            .iter()
            .flat_map(|r| r.metrics.clone())
            .collect()
    }

    fn all_avails(service: &EndpointService<DmrNodeLocation>) -> Vec<AvailInstance<DmrNodeLocation>> {
        service
            .resources_snapshot()
            .iter()
            .flat_map(|r| r.avails.clone())
            .collect()
    }

    #[test]
    fn test_second_discovery_of_unchanged_endpoint_is_empty() {
        let driver = driver();
        let service = service(&driver);
        let mut listener = MockInventoryListener::<DmrNodeLocation>::new();
        listener
            .expect_resources_changed()
            .withf(|event| event.added.len() == 3 && event.removed.is_empty())
            .times(1)
            .return_const(());
        service.add_inventory_listener(Arc::new(listener));

        let first = service.discover_resources().unwrap();
        assert_eq!(first.event.added.len(), 3);
        let ids: Vec<Id> = service.resources_snapshot().iter().map(|r| r.id.clone()).collect();

        let second = service.discover_resources().unwrap();
        assert!(second.event.is_empty());
        let ids_again: Vec<Id> = service.resources_snapshot().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn test_vanished_resource_is_removed() {
        let driver = driver();
        let service = service(&driver);
        service.discover_resources().unwrap();

        driver.remove_node(&loc("/subsystem=datasources/data-source=OtherDS"));
        let outcome = service.discover_resources().unwrap();

        assert_eq!(outcome.event.removed.len(), 1);
        assert_eq!(outcome.event.removed[0].name, "Datasource [OtherDS]");
        assert_eq!(service.resource_count(), 2);
    }

    #[test]
    fn test_removals_skipped_when_discovery_has_errors() {
        let healthy = driver();
        let service = service(&healthy);
        service.discover_resources().unwrap();

        healthy.fail_query(loc("/subsystem=datasources/data-source=*"));
        let outcome = service.discover_resources().unwrap();

        assert_eq!(outcome.errors, 1);
        assert!(outcome.event.removed.is_empty());
        assert_eq!(service.resource_count(), 3);
    }

    #[test]
    fn test_overlapping_discovery_is_rejected() {
        let driver = driver();
        let service = service(&driver);
        let _running = DiscoveryGuard::acquire(&service.discovering).unwrap();

        assert!(matches!(
            service.discover_resources(),
            Err(ServiceError::DiscoveryInProgress(_))
        ));
    }

    #[test]
    fn test_not_ready_until_wait_for_resolves() {
        let driver = driver();
        let mut definition = EndpointDefinition::new("local", "feed");
        definition.wait_for = vec![loc("/deployment=app.war")];
        let service = EndpointService::new(
            definition,
            Arc::new(driver.clone()),
            Arc::new(DmrLocationResolver),
            type_manager(),
            Arc::new(Diagnostics::new()),
        );

        assert!(matches!(service.discover_resources(), Err(ServiceError::NotReady(_))));

        driver.add_node(loc("/deployment=app.war"));
        assert!(service.discover_resources().is_ok());
    }

    #[test]
    fn test_measure_metrics() {
        let driver = driver();
        let service = service(&driver);
        service.discover_resources().unwrap();

        let metrics = all_metrics(&service);
        let batch: Vec<&MetricInstance<DmrNodeLocation>> = metrics.iter().collect();
        let consumer = CollectingConsumer::default();
        service.measure_metrics(&batch, &consumer).unwrap();

        let mut values: Vec<f64> = consumer.points().iter().map(|p| p.value).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(values, vec![3.0, 4.0]);
    }

    #[test]
    fn test_unreachable_endpoint_reports_avails_down_and_skips_metrics() {
        let driver = driver();
        let service = service(&driver);
        service.discover_resources().unwrap();
        driver.set_unreachable(true);

        let avails = all_avails(&service);
        let avail_batch: Vec<&AvailInstance<DmrNodeLocation>> = avails.iter().collect();
        let avail_consumer = CollectingConsumer::default();
        service.measure_avails(&avail_batch, &avail_consumer).unwrap();

        let points = avail_consumer.points();
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.value == Avail::Down));

        let metrics = all_metrics(&service);
        let metric_batch: Vec<&MetricInstance<DmrNodeLocation>> = metrics.iter().collect();
        let metric_consumer = CollectingConsumer::default();
        service.measure_metrics(&metric_batch, &metric_consumer).unwrap();
        assert!(metric_consumer.points().is_empty());
    }

    #[test]
    fn test_avails_failing_individually_are_down() {
        let driver = driver();
        let service = service(&driver);
        service.discover_resources().unwrap();
        let avails = all_avails(&service);

        // every attribute gone, the endpoint itself still answers
        driver.remove_node(&loc("/"));
        driver.remove_node(&loc("/subsystem=datasources/data-source=ExampleDS"));
        driver.remove_node(&loc("/subsystem=datasources/data-source=OtherDS"));

        let batch: Vec<&AvailInstance<DmrNodeLocation>> = avails.iter().collect();
        let consumer = CollectingConsumer::default();
        service.measure_avails(&batch, &consumer).unwrap();

        let points = consumer.points();
        assert_eq!(points.len(), avails.len());
        assert!(points.iter().all(|p| p.value == Avail::Down));
    }

    #[test]
    fn test_avail_mapping() {
        let up = default_up_pattern();

        assert_eq!(avail_value(AttributeValue::Single(json!("running")), up), Avail::Up);
        assert_eq!(avail_value(AttributeValue::Single(json!("OK")), up), Avail::Up);
        assert_eq!(avail_value(AttributeValue::Single(json!("stopped")), up), Avail::Down);
        assert_eq!(avail_value(AttributeValue::Single(json!(0)), up), Avail::Down);
        assert_eq!(avail_value(AttributeValue::Single(json!(7)), up), Avail::Up);
        assert_eq!(avail_value(AttributeValue::Single(json!(true)), up), Avail::Up);
        assert_eq!(avail_value(AttributeValue::Single(Value::Null), up), Avail::Unknown);
        assert_eq!(avail_value(AttributeValue::Multiple(vec![]), up), Avail::Unknown);
        assert_eq!(
            avail_value(AttributeValue::Multiple(vec![json!(true), json!(false), Value::Null]), up),
            Avail::Down
        );
    }

    #[test]
    fn test_custom_up_pattern() {
        let pattern = Regex::new("^(?:STARTED|ACTIVE)$").unwrap();
        assert_eq!(avail_value(AttributeValue::Single(json!("ACTIVE")), &pattern), Avail::Up);
        assert_eq!(avail_value(AttributeValue::Single(json!("running")), &pattern), Avail::Down);
    }

    #[test]
    fn test_measure_avails_uses_type_up_pattern() {
        let server = ResourceType::new("WildFly Server", loc("/"), "Server").with_avail(AvailType::new(
            "Server Availability",
            AttributeLocation::new(loc("/"), "server-state"),
            Interval::seconds(30),
            AvailDetail {
                up_pattern: Some(Regex::new("^(?:ACTIVE)$").unwrap()),
            },
        ));
        let sets = vec![TypeSet::new("main", vec![server])];
        let driver = InMemoryDriver::new()
            .with_node(loc("/"))
            .with_attribute(loc("/"), "server-state", json!("ACTIVE"));
        let service = EndpointService::new(
            EndpointDefinition::new("local", "feed"),
            Arc::new(driver.clone()),
            Arc::new(DmrLocationResolver),
            Arc::new(ResourceTypeManager::new(&sets, None, 1_000).unwrap()),
            Arc::new(Diagnostics::new()),
        );
        service.discover_resources().unwrap();

        let avails = all_avails(&service);
        let batch: Vec<&AvailInstance<DmrNodeLocation>> = avails.iter().collect();
        let consumer = CollectingConsumer::default();
        service.measure_avails(&batch, &consumer).unwrap();

        let points = consumer.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, Avail::Up);
    }

    #[test]
    fn test_metric_value_sums_multiple_nodes() {
        assert_eq!(metric_value(AttributeValue::Single(json!(2.5))), Some(2.5));
        assert_eq!(metric_value(AttributeValue::Single(json!(" 12 "))), Some(12.0));
        assert_eq!(
            metric_value(AttributeValue::Multiple(vec![json!(1), json!("2"), Value::Null])),
            Some(3.0)
        );
        assert_eq!(metric_value(AttributeValue::Single(json!("n/a"))), None);
        assert_eq!(metric_value(AttributeValue::Multiple(vec![])), None);
    }

    #[test]
    fn test_remove_and_clear_resources() {
        let driver = driver();
        let service = service(&driver);
        service.discover_resources().unwrap();

        let removed = service.remove_resources(&loc("/subsystem=datasources/data-source=*"));
        assert_eq!(removed.len(), 2);
        assert_eq!(service.find_resources(&loc("/")).len(), 1);

        assert_eq!(service.clear_resources().len(), 1);
        assert_eq!(service.resource_count(), 0);
    }
}
