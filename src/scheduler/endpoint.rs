use crate::diagnostics::Diagnostics;
use crate::error::ServiceError;
use crate::events::{AvailDataPoint, MetricDataPoint};
use crate::inventory::{AvailDetail, MetricDetail, Resource, ResourceObserver};
use crate::protocol::{EndpointService, MeasurementConsumer, NodeLocation};
use crate::scheduler::collector::{run_collector, CollectionHandler, CollectorSettings};
use crate::scheduler::queue::{
    Clock, MeasurementKind, ScheduledCollectionsQueue, ScheduledMeasurementInstance,
};
use log::{debug, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Delay before retrying discovery of an endpoint that is not ready
const NOT_READY_RETRY: Duration = Duration::from_secs(10);

/// Timing settings for one endpoint's background work
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Longest sleep of a collector loop between two looks at its queue
    pub poll_interval: Duration,
    /// Period of full rediscovery; `None` discovers once at start
    pub discovery_period: Option<Duration>,
    /// How long `stop` waits for loops before aborting them
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            discovery_period: Some(Duration::from_secs(600)),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Keeps one queue in step with the resource graph
struct QueueObserver<L: NodeLocation, D> {
    queue: Arc<ScheduledCollectionsQueue<L, D>>,
}

impl<L: NodeLocation, D: MeasurementKind> ResourceObserver<L> for QueueObserver<L, D> {
    fn resource_added(&self, resource: &Arc<Resource<L>>) {
        self.queue
            .schedule(ScheduledMeasurementInstance::for_resource(resource, self.queue.now()));
    }

    fn resource_modified(&self, resource: &Arc<Resource<L>>) {
        self.queue.unschedule(std::slice::from_ref(&resource.id));
        self.resource_added(resource);
    }

    fn resource_removed(&self, resource: &Arc<Resource<L>>) {
        self.queue.unschedule(std::slice::from_ref(&resource.id));
    }
}

struct MetricCollection<L: NodeLocation> {
    service: Arc<EndpointService<L>>,
    consumer: Arc<dyn MeasurementConsumer<MetricDataPoint>>,
}

impl<L: NodeLocation> CollectionHandler<L, MetricDetail> for MetricCollection<L> {
    fn collect(&self, batch: &[ScheduledMeasurementInstance<L, MetricDetail>]) -> Result<(), ServiceError> {
        let instances: Vec<_> = batch.iter().map(|item| &item.instance).collect();
        self.service.measure_metrics(&instances, self.consumer.as_ref())
    }
}

struct AvailCollection<L: NodeLocation> {
    service: Arc<EndpointService<L>>,
    consumer: Arc<dyn MeasurementConsumer<AvailDataPoint>>,
}

impl<L: NodeLocation> CollectionHandler<L, AvailDetail> for AvailCollection<L> {
    fn collect(&self, batch: &[ScheduledMeasurementInstance<L, AvailDetail>]) -> Result<(), ServiceError> {
        let instances: Vec<_> = batch.iter().map(|item| &item.instance).collect();
        self.service.measure_avails(&instances, self.consumer.as_ref())
    }
}

/// An endpoint the agent can start and stop without knowing its protocol
pub trait ManagedEndpoint: Send + Sync {
    fn name(&self) -> &str;

    /// Spawn the endpoint's background tasks on the current runtime
    fn start(&self);

    /// Stop all background tasks and unschedule every resource
    fn stop<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Runs discovery and both collector loops for one endpoint
pub struct EndpointScheduler<L: NodeLocation> {
    service: Arc<EndpointService<L>>,
    metrics: Arc<ScheduledCollectionsQueue<L, MetricDetail>>,
    avails: Arc<ScheduledCollectionsQueue<L, AvailDetail>>,
    metric_consumer: Arc<dyn MeasurementConsumer<MetricDataPoint>>,
    avail_consumer: Arc<dyn MeasurementConsumer<AvailDataPoint>>,
    diagnostics: Arc<Diagnostics>,
    config: SchedulerConfig,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<L: NodeLocation> EndpointScheduler<L> {
    pub fn new(
        service: Arc<EndpointService<L>>,
        metric_consumer: Arc<dyn MeasurementConsumer<MetricDataPoint>>,
        avail_consumer: Arc<dyn MeasurementConsumer<AvailDataPoint>>,
        diagnostics: Arc<Diagnostics>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let metrics = Arc::new(ScheduledCollectionsQueue::new(Arc::clone(&clock)));
        let avails = Arc::new(ScheduledCollectionsQueue::new(clock));

        service.add_resource_observer(Arc::new(QueueObserver {
            queue: Arc::clone(&metrics),
        }));
        service.add_resource_observer(Arc::new(QueueObserver {
            queue: Arc::clone(&avails),
        }));

        let (shutdown, _) = watch::channel(false);
        Self {
            service,
            metrics,
            avails,
            metric_consumer,
            avail_consumer,
            diagnostics,
            config,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn service(&self) -> &Arc<EndpointService<L>> {
        &self.service
    }

    /// Number of (scheduled metrics, scheduled avails)
    pub fn scheduled(&self) -> (usize, usize) {
        (self.metrics.len(), self.avails.len())
    }

    fn settings(&self, kind: &'static str) -> CollectorSettings {
        CollectorSettings {
            endpoint_name: self.service.name().to_string(),
            kind,
            poll_interval: self.config.poll_interval,
        }
    }

    fn spawn_discovery(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let period = self.config.discovery_period;
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                let scan = Arc::clone(&service);
                let next = match tokio::task::spawn_blocking(move || scan.discover_resources()).await {
                    Ok(Ok(outcome)) => {
                        debug!(
                            "Discovery of endpoint [{}] took [{}ms]",
                            service.name(),
                            outcome.duration.as_millis()
                        );
                        period
                    }
                    Ok(Err(ServiceError::NotReady(name))) => {
                        info!("Endpoint [{}] is not ready yet, discovery postponed", name);
                        Some(period.map_or(NOT_READY_RETRY, |p| p.min(NOT_READY_RETRY)))
                    }
                    Ok(Err(e)) => {
                        warn!("Discovery of endpoint [{}] failed: {}", service.name(), e);
                        period
                    }
                    Err(e) => {
                        warn!("Discovery task of endpoint [{}] failed: {}", service.name(), e);
                        period
                    }
                };

                let Some(wait) = next else { break };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Spawn discovery and both collector loops
    pub fn start(&self) {
        info!(
            "Starting {} endpoint [{}]",
            self.service.protocol(),
            self.service.name()
        );
        self.shutdown.send_replace(false);

        let metric_handler: Arc<dyn CollectionHandler<L, MetricDetail>> = Arc::new(MetricCollection {
            service: Arc::clone(&self.service),
            consumer: Arc::clone(&self.metric_consumer),
        });
        let avail_handler: Arc<dyn CollectionHandler<L, AvailDetail>> = Arc::new(AvailCollection {
            service: Arc::clone(&self.service),
            consumer: Arc::clone(&self.avail_consumer),
        });

        let handles = vec![
            tokio::spawn(run_collector(
                self.settings(MetricDetail::NAME),
                Arc::clone(&self.metrics),
                metric_handler,
                Arc::clone(&self.diagnostics),
                self.shutdown.subscribe(),
            )),
            tokio::spawn(run_collector(
                self.settings(AvailDetail::NAME),
                Arc::clone(&self.avails),
                avail_handler,
                Arc::clone(&self.diagnostics),
                self.shutdown.subscribe(),
            )),
            self.spawn_discovery(),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    /// Signal every loop, wait up to the shutdown timeout, then abort stragglers
    ///
    /// All resources are removed afterwards, which empties both queues.
    pub async fn stop(&self) {
        info!("Stopping endpoint [{}]", self.service.name());
        self.shutdown.send_replace(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(
                    "Task of endpoint [{}] did not stop in time, aborting it",
                    self.service.name()
                );
                handle.abort();
            }
        }

        let removed = self.service.clear_resources();
        self.metrics.clear();
        self.avails.clear();
        info!(
            "Stopped endpoint [{}], unscheduled [{}] resources",
            self.service.name(),
            removed.len()
        );
    }
}

impl<L: NodeLocation> ManagedEndpoint for EndpointScheduler<L> {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn start(&self) {
        EndpointScheduler::start(self)
    }

    fn stop<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(EndpointScheduler::stop(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Avail;
    use crate::inventory::{
        AvailType, Interval, MetricType, ResourceType, ResourceTypeManager, TypeSet,
    };
    use crate::protocol::dmr::{DmrLocationResolver, DmrNodeLocation};
    use crate::protocol::testing::{CollectingConsumer, InMemoryDriver};
    use crate::protocol::{AttributeLocation, EndpointDefinition};
    use crate::scheduler::queue::ManualClock;
    use serde_json::json;

    fn loc(path: &str) -> DmrNodeLocation {
        path.parse().unwrap()
    }

    fn service(driver: &InMemoryDriver<DmrNodeLocation>) -> Arc<EndpointService<DmrNodeLocation>> {
        let server = ResourceType::new("Server", loc("/"), "Server")
            .with_metric(MetricType::new(
                "Threads",
                AttributeLocation::new(loc("/"), "threads"),
                Interval::seconds(10),
                MetricDetail::default(),
            ))
            .with_avail(AvailType::new(
                "Up",
                AttributeLocation::new(loc("/"), "state"),
                Interval::seconds(5),
                AvailDetail::default(),
            ));
        let deployment = ResourceType::new("Deployment", loc("/deployment=*"), "%deployment%")
            .with_parents(&["Server"])
            .with_avail(AvailType::new(
                "Deployed",
                AttributeLocation::new(loc("/"), "enabled"),
                Interval::seconds(5),
                AvailDetail::default(),
            ));
        let types = ResourceTypeManager::new(&[TypeSet::new("s", vec![server, deployment])], None, 1_000)
            .unwrap();

        Arc::new(EndpointService::new(
            EndpointDefinition::new("ep", "feed"),
            Arc::new(driver.clone()),
            Arc::new(DmrLocationResolver),
            Arc::new(types),
            Arc::new(Diagnostics::new()),
        ))
    }

    fn driver() -> InMemoryDriver<DmrNodeLocation> {
        InMemoryDriver::new()
            .with_node(loc("/"))
            .with_attribute(loc("/"), "threads", json!(12))
            .with_attribute(loc("/"), "state", json!("running"))
            .with_node(loc("/deployment=a.war"))
            .with_attribute(loc("/deployment=a.war"), "enabled", json!(true))
            .with_node(loc("/deployment=b.war"))
            .with_attribute(loc("/deployment=b.war"), "enabled", json!(false))
    }

    fn scheduler(
        service: &Arc<EndpointService<DmrNodeLocation>>,
        clock: Arc<dyn Clock>,
    ) -> (
        EndpointScheduler<DmrNodeLocation>,
        Arc<CollectingConsumer<MetricDataPoint>>,
        Arc<CollectingConsumer<AvailDataPoint>>,
    ) {
        let metrics = Arc::new(CollectingConsumer::default());
        let avails = Arc::new(CollectingConsumer::default());
        let scheduler = EndpointScheduler::new(
            Arc::clone(service),
            Arc::clone(&metrics) as Arc<dyn MeasurementConsumer<MetricDataPoint>>,
            Arc::clone(&avails) as Arc<dyn MeasurementConsumer<AvailDataPoint>>,
            Arc::new(Diagnostics::new()),
            clock,
            SchedulerConfig {
                poll_interval: Duration::from_millis(20),
                discovery_period: None,
                shutdown_timeout: Duration::from_secs(2),
            },
        );
        (scheduler, metrics, avails)
    }

    #[test]
    fn test_discovery_patches_queues() {
        let driver = driver();
        let service = service(&driver);
        let (scheduler, _, _) = scheduler(&service, Arc::new(ManualClock::new(0)));

        service.discover_resources().unwrap();
        assert_eq!(scheduler.scheduled(), (1, 3));

        driver.remove_node(&loc("/deployment=b.war"));
        service.discover_resources().unwrap();
        assert_eq!(scheduler.scheduled(), (1, 2));

        service.clear_resources();
        assert_eq!(scheduler.scheduled(), (0, 0));
    }

    #[tokio::test]
    async fn test_start_collects_and_stop_unschedules() {
        let driver = driver();
        let service = service(&driver);
        let clock = Arc::new(ManualClock::new(0));
        let (scheduler, metrics, avails) = scheduler(&service, Arc::clone(&clock) as Arc<dyn Clock>);

        scheduler.start();
        let discovered = async {
            while scheduler.scheduled() != (1, 3) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), discovered).await.unwrap();

        // everything is due once the longest interval has passed
        clock.set(10_000);
        let collected = async {
            while metrics.points().is_empty() || avails.points().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), collected).await.unwrap();

        assert_eq!(metrics.points()[0].value, 12.0);
        let downs = avails.points().iter().filter(|p| p.value == Avail::Down).count();
        assert_eq!(downs, 1);

        scheduler.stop().await;
        assert_eq!(scheduler.scheduled(), (0, 0));
        assert_eq!(service.resource_count(), 0);
    }
}
