use crate::diagnostics::Diagnostics;
use crate::error::ServiceError;
use crate::protocol::NodeLocation;
use crate::scheduler::queue::{ScheduledCollectionsQueue, ScheduledMeasurementInstance};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Collections starting later than this after their due time count as delayed
pub const DELAY_TOLERANCE_MILLIS: u64 = 1_000;

/// Performs the blocking I/O for one popped batch
pub trait CollectionHandler<L: NodeLocation, D>: Send + Sync + 'static {
    fn collect(&self, batch: &[ScheduledMeasurementInstance<L, D>]) -> Result<(), ServiceError>;
}

/// Settings shared by every collector loop of an endpoint
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub endpoint_name: String,
    /// Label used in logs, e.g. "metric"
    pub kind: &'static str,
    /// Longest sleep between two looks at the queue
    pub poll_interval: Duration,
}

/// Drive one queue until `shutdown` flips to `true`
///
/// Sleeps until the earliest due time but never longer than `poll_interval`,
/// and wakes early when new entries are scheduled. Each due batch
/// is handed to `handler` on the blocking pool; its failures are logged and
/// the loop carries on.
pub async fn run_collector<L, D>(
    settings: CollectorSettings,
    queue: Arc<ScheduledCollectionsQueue<L, D>>,
    handler: Arc<dyn CollectionHandler<L, D>>,
    diagnostics: Arc<Diagnostics>,
    mut shutdown: watch::Receiver<bool>,
) where
    L: NodeLocation,
    D: Clone + Send + Sync + 'static,
{
    info!(
        "Starting {} collector for endpoint [{}]",
        settings.kind, settings.endpoint_name
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = queue.now();
        let wait = match queue.next_expected_collection_time() {
            None => settings.poll_interval,
            Some(due) => Duration::from_millis(due.saturating_sub(now)).min(settings.poll_interval),
        };

        if !wait.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = queue.changed() => continue,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
        }

        let batch = queue.pop_next_scheduled_set();
        if batch.is_empty() {
            continue;
        }

        let popped_at = queue.now();
        let delayed = batch
            .iter()
            .filter(|item| popped_at.saturating_sub(item.next_collection_time) > DELAY_TOLERANCE_MILLIS)
            .count() as u64;
        if delayed > 0 {
            diagnostics.record_delayed_collections(delayed);
        }

        debug!(
            "Collecting [{}] {}s for endpoint [{}]",
            batch.len(),
            settings.kind,
            settings.endpoint_name
        );

        let handler = Arc::clone(&handler);
        match tokio::task::spawn_blocking(move || handler.collect(&batch)).await {
            Ok(Ok(())) => {}
            Ok(Err(ServiceError::NotReady(_))) => debug!(
                "Endpoint [{}] is not ready, {} collection will be retried",
                settings.endpoint_name, settings.kind
            ),
            Ok(Err(e)) => warn!(
                "Failed to collect {}s for endpoint [{}]: {}",
                settings.kind, settings.endpoint_name, e
            ),
            Err(e) => error!(
                "{} collection task for endpoint [{}] failed: {}",
                settings.kind, settings.endpoint_name, e
            ),
        }
    }

    info!(
        "Stopped {} collector for endpoint [{}]",
        settings.kind, settings.endpoint_name
    );
}
