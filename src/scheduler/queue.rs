use crate::inventory::{AvailDetail, Id, MeasurementInstance, MetricDetail, Resource};
use crate::protocol::NodeLocation;
use chrono::Utc;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Round up to the next whole second; whole seconds stay as they are
pub fn round_up_to_second(millis: u64) -> u64 {
    millis.div_ceil(1_000).saturating_mul(1_000)
}

/// Selects the measurement instances of one kind from a resource
pub trait MeasurementKind: Clone + Send + Sync + 'static {
    /// Short name used in logs
    const NAME: &'static str;

    fn instances<L: NodeLocation>(resource: &Resource<L>) -> &[MeasurementInstance<L, Self>];
}

impl MeasurementKind for MetricDetail {
    const NAME: &'static str = "metric";

    fn instances<L: NodeLocation>(resource: &Resource<L>) -> &[MeasurementInstance<L, Self>] {
        &resource.metrics
    }
}

impl MeasurementKind for AvailDetail {
    const NAME: &'static str = "avail";

    fn instances<L: NodeLocation>(resource: &Resource<L>) -> &[MeasurementInstance<L, Self>] {
        &resource.avails
    }
}

/// A measurement instance waiting for its next collection
#[derive(Debug, Clone)]
pub struct ScheduledMeasurementInstance<L: NodeLocation, D> {
    pub resource: Arc<Resource<L>>,
    pub instance: MeasurementInstance<L, D>,
    /// Epoch milliseconds
    pub next_collection_time: u64,
}

type QueueKey = (u64, Id, Id);

impl<L: NodeLocation, D: Clone> ScheduledMeasurementInstance<L, D> {
    /// Schedule `instance` at exactly `next_collection_time`
    pub fn at(
        resource: Arc<Resource<L>>,
        instance: MeasurementInstance<L, D>,
        next_collection_time: u64,
    ) -> Self {
        Self {
            resource,
            instance,
            next_collection_time,
        }
    }

    /// One entry per instance of the resource, each due one interval after `now`
    pub fn for_resource(resource: &Arc<Resource<L>>, now: u64) -> Vec<Self>
    where
        D: MeasurementKind,
    {
        D::instances(resource)
            .iter()
            .map(|instance| {
                let due = round_up_to_second(now.saturating_add(instance.interval_millis()));
                Self::at(Arc::clone(resource), instance.clone(), due)
            })
            .collect()
    }

    fn key(&self) -> QueueKey {
        (
            self.next_collection_time,
            self.resource.id.clone(),
            self.instance.id.clone(),
        )
    }

    fn identity(&self) -> (Id, Id) {
        (self.resource.id.clone(), self.instance.id.clone())
    }
}

impl<L: NodeLocation, D: Clone> PartialEq for ScheduledMeasurementInstance<L, D> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<L: NodeLocation, D: Clone> Eq for ScheduledMeasurementInstance<L, D> {}

impl<L: NodeLocation, D: Clone> PartialOrd for ScheduledMeasurementInstance<L, D> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<L: NodeLocation, D: Clone> Ord for ScheduledMeasurementInstance<L, D> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

struct QueueState<L: NodeLocation, D> {
    entries: BTreeMap<QueueKey, ScheduledMeasurementInstance<L, D>>,
    due_times: HashMap<(Id, Id), u64>,
}

/// Time-ordered queue of pending collections for one endpoint and kind
///
/// Entries are ordered by due time, then resource id, then measurement id.
/// An instance is in the queue at most once; scheduling it again moves it.
pub struct ScheduledCollectionsQueue<L: NodeLocation, D> {
    state: Mutex<QueueState<L, D>>,
    clock: Arc<dyn Clock>,
    changed: Notify,
}

impl<L: NodeLocation, D: Clone> ScheduledCollectionsQueue<L, D> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: BTreeMap::new(),
                due_times: HashMap::new(),
            }),
            clock,
            changed: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<L, D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn schedule(&self, items: Vec<ScheduledMeasurementInstance<L, D>>) {
        if items.is_empty() {
            return;
        }
        {
            let mut state = self.state();
            for item in items {
                let identity = item.identity();
                if let Some(previous) = state.due_times.insert(identity.clone(), item.next_collection_time) {
                    state.entries.remove(&(previous, identity.0, identity.1));
                }
                state.entries.insert(item.key(), item);
            }
        }
        self.changed.notify_one();
    }

    /// Remove every entry belonging to one of `resource_ids`
    pub fn unschedule(&self, resource_ids: &[Id]) {
        let ids: HashSet<&Id> = resource_ids.iter().collect();
        let mut state = self.state();
        state.entries.retain(|(_, resource_id, _), _| !ids.contains(resource_id));
        state.due_times.retain(|(resource_id, _), _| !ids.contains(resource_id));
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.due_times.clear();
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Due time of the earliest entry, `None` when the queue is empty
    pub fn next_expected_collection_time(&self) -> Option<u64> {
        self.state().entries.keys().next().map(|(due, _, _)| *due)
    }

    /// Take every entry due at or before now
    ///
    /// Each popped entry is put back due at now plus its interval, rounded
    /// up to the whole second. Returns the popped entries in queue order.
    pub fn pop_next_scheduled_set(&self) -> Vec<ScheduledMeasurementInstance<L, D>> {
        let now = self.now();
        let mut state = self.state();

        let not_due = state
            .entries
            .split_off(&(now.saturating_add(1), Id::new(""), Id::new("")));
        let due = std::mem::replace(&mut state.entries, not_due);

        let mut popped = Vec::with_capacity(due.len());
        for (_, item) in due {
            let next = round_up_to_second(now.saturating_add(item.instance.interval_millis()));
            let rescheduled = ScheduledMeasurementInstance::at(
                Arc::clone(&item.resource),
                item.instance.clone(),
                next,
            );
            state.due_times.insert(rescheduled.identity(), next);
            state.entries.insert(rescheduled.key(), rescheduled);
            popped.push(item);
        }
        popped
    }

    /// Resolves after the next [`schedule`](Self::schedule) call
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{
        resource_id, Interval, MetricInstance, MetricType, ResourceType, TimeUnit,
    };
    use crate::protocol::dmr::DmrNodeLocation;
    use crate::protocol::AttributeLocation;

    fn loc(path: &str) -> DmrNodeLocation {
        path.parse().unwrap()
    }

    fn resource(name: &str, intervals: &[(&str, u64)]) -> Arc<Resource<DmrNodeLocation>> {
        let mut resource_type = ResourceType::new("Thing", loc("/thing=*"), "%thing%");
        for (metric, millis) in intervals {
            resource_type = resource_type.with_metric(MetricType::new(
                metric,
                AttributeLocation::new(loc("/"), metric),
                Interval::new(*millis, TimeUnit::Milliseconds),
                MetricDetail::default(),
            ));
        }
        let resource_type = Arc::new(resource_type);
        let location = loc(&format!("/thing={name}"));
        let id = resource_id("feed", "ep", &location);
        let mut resource = Resource::new(id, name.to_string(), location, Arc::clone(&resource_type), None);
        resource.metrics = resource_type
            .metric_types
            .iter()
            .map(|metric_type| MetricInstance {
                id: crate::inventory::metric_instance_id(&resource.id, &metric_type.name),
                name: metric_type.name.clone(),
                location: metric_type.location.clone(),
                measurement_type: Arc::clone(metric_type),
                storage_key: None,
            })
            .collect();
        Arc::new(resource)
    }

    fn queue(clock: &Arc<ManualClock>) -> ScheduledCollectionsQueue<DmrNodeLocation, MetricDetail> {
        ScheduledCollectionsQueue::new(Arc::clone(clock) as Arc<dyn Clock>)
    }

    fn names(items: &[ScheduledMeasurementInstance<DmrNodeLocation, MetricDetail>]) -> Vec<&str> {
        items.iter().map(|item| item.instance.name.as_str()).collect()
    }

    #[test]
    fn test_round_up_to_second() {
        assert_eq!(round_up_to_second(0), 0);
        assert_eq!(round_up_to_second(1), 1_000);
        assert_eq!(round_up_to_second(1_000), 1_000);
        assert_eq!(round_up_to_second(1_001), 2_000);
    }

    #[test]
    fn test_empty_queue() {
        let clock = Arc::new(ManualClock::new(5_000));
        let queue = queue(&clock);

        assert_eq!(queue.next_expected_collection_time(), None);
        assert!(queue.pop_next_scheduled_set().is_empty());
    }

    #[test]
    fn test_schedule_is_in_the_future() {
        let clock = Arc::new(ManualClock::new(10_250));
        let queue = queue(&clock);
        let r = resource("a", &[("m", 30_000)]);

        queue.schedule(ScheduledMeasurementInstance::for_resource(&r, queue.now()));

        assert_eq!(queue.next_expected_collection_time(), Some(41_000));
        clock.set(40_999);
        assert!(queue.pop_next_scheduled_set().is_empty());
        clock.set(41_000);
        assert_eq!(queue.pop_next_scheduled_set().len(), 1);
    }

    #[test]
    fn test_multiple_intervals() {
        let clock = Arc::new(ManualClock::new(10_000));
        let queue = queue(&clock);
        let r = resource("a", &[("A", 1_000), ("B", 1_000), ("C", 1_500)]);

        let items = r
            .metrics
            .iter()
            .map(|m| {
                let due = 10_000 + m.interval_millis();
                ScheduledMeasurementInstance::at(Arc::clone(&r), m.clone(), due)
            })
            .collect();
        queue.schedule(items);

        clock.advance(1_000);
        assert_eq!(names(&queue.pop_next_scheduled_set()), vec!["A", "B"]);

        clock.advance(500);
        assert_eq!(names(&queue.pop_next_scheduled_set()), vec!["C"]);

        // A and B went back at 11_000 + 1_000, C at 11_500 + 1_500 rounded up
        assert_eq!(queue.next_expected_collection_time(), Some(12_000));
        clock.set(13_000);
        assert_eq!(names(&queue.pop_next_scheduled_set()), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_ties_break_by_resource_then_measurement() {
        let clock = Arc::new(ManualClock::new(0));
        let queue = queue(&clock);
        let b = resource("b", &[("y", 1_000), ("x", 1_000)]);
        let a = resource("a", &[("z", 1_000)]);

        queue.schedule(ScheduledMeasurementInstance::for_resource(&b, 0));
        queue.schedule(ScheduledMeasurementInstance::for_resource(&a, 0));
        clock.set(1_000);

        let popped = queue.pop_next_scheduled_set();
        let order: Vec<(&str, &str)> = popped
            .iter()
            .map(|item| (item.resource.name.as_str(), item.instance.name.as_str()))
            .collect();
        assert_eq!(order, vec![("a", "z"), ("b", "x"), ("b", "y")]);
    }

    #[test]
    fn test_unschedule_removes_only_that_resource() {
        let clock = Arc::new(ManualClock::new(0));
        let queue = queue(&clock);
        let a = resource("a", &[("m1", 1_000), ("m2", 2_000), ("m3", 5_000)]);
        let b = resource("b", &[("m1", 1_000)]);

        queue.schedule(ScheduledMeasurementInstance::for_resource(&a, 0));
        queue.schedule(ScheduledMeasurementInstance::for_resource(&b, 0));
        assert_eq!(queue.len(), 4);

        queue.unschedule(&[a.id.clone()]);
        assert_eq!(queue.len(), 1);

        clock.set(10_000);
        let popped = queue.pop_next_scheduled_set();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].resource.id, b.id);

        queue.unschedule(&[b.id.clone()]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rescheduling_moves_instead_of_duplicating() {
        let clock = Arc::new(ManualClock::new(0));
        let queue = queue(&clock);
        let a = resource("a", &[("m", 1_000)]);

        queue.schedule(ScheduledMeasurementInstance::for_resource(&a, 0));
        queue.schedule(ScheduledMeasurementInstance::for_resource(&a, 5_000));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_expected_collection_time(), Some(6_000));
    }
}
