//! Bounded buffering between collectors and the storage adapter
//!
//! Collectors hand data points to a [`BufferedDispatcher`] without ever
//! blocking. A dedicated worker thread drains the channel into batches and
//! stores each batch once it reaches the batch size or the flush interval
//! passes. When the channel is full new points are dropped and counted.

use crate::diagnostics::Diagnostics;
use crate::protocol::MeasurementConsumer;
use crate::storage::adapter::{DataPoint, PayloadBuilder, StorageAdapter};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default buffer and batch sizes for metrics
pub const METRIC_BUFFER_SIZE: usize = 1_000;
pub const METRIC_BATCH_SIZE: usize = 100;

/// Default buffer and batch sizes for avails
pub const AVAIL_BUFFER_SIZE: usize = 500;
pub const AVAIL_BATCH_SIZE: usize = 50;

/// Drops are logged once per this many
const DROP_LOG_EVERY: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Capacity of the channel between collectors and the worker
    pub buffer_size: usize,
    /// Points per storage call
    pub batch_size: usize,
    /// Longest time a partial batch waits before being stored
    pub flush_interval: Duration,
    /// Passed through to the storage adapter
    pub store_wait_millis: u64,
}

impl DispatcherConfig {
    pub fn metrics() -> Self {
        Self {
            buffer_size: METRIC_BUFFER_SIZE,
            batch_size: METRIC_BATCH_SIZE,
            flush_interval: Duration::from_secs(1),
            store_wait_millis: 5_000,
        }
    }

    pub fn avails() -> Self {
        Self {
            buffer_size: AVAIL_BUFFER_SIZE,
            batch_size: AVAIL_BATCH_SIZE,
            flush_interval: Duration::from_secs(1),
            store_wait_millis: 5_000,
        }
    }
}

enum Command<P> {
    Store(P),
    Shutdown,
}

/// Non-blocking front of one data kind's buffer
pub struct BufferedDispatcher<P: DataPoint> {
    sender: SyncSender<Command<P>>,
    queued: Arc<AtomicUsize>,
    dropped: AtomicU64,
    diagnostics: Arc<Diagnostics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<P: DataPoint> BufferedDispatcher<P> {
    /// Start the worker thread
    pub fn spawn(
        adapter: Arc<dyn StorageAdapter>,
        config: DispatcherConfig,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let (sender, receiver) = mpsc::sync_channel(config.buffer_size.max(1));
        let queued = Arc::new(AtomicUsize::new(0));

        let mut worker = Worker {
            receiver,
            adapter,
            batch: PayloadBuilder::new(),
            last_flush: Instant::now(),
            queued: Arc::clone(&queued),
            diagnostics: Arc::clone(&diagnostics),
            config,
        };
        let handle = thread::spawn(move || worker.run());

        Self {
            sender,
            queued,
            dropped: AtomicU64::new(0),
            diagnostics,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a point without blocking
    ///
    /// # Returns
    ///
    /// `false` if the buffer was full and the point was dropped
    pub fn dispatch(&self, point: P) -> bool {
        let occupancy = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        match self.sender.try_send(Command::Store(point)) {
            Ok(()) => {
                self.diagnostics.set_buffer_occupancy(P::KIND, occupancy);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                self.diagnostics.record_dropped(P::KIND, 1);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_LOG_EVERY == 1 {
                    warn!("{:?} buffer is full, [{}] data points dropped so far", P::KIND, dropped);
                }
                false
            }
        }
    }

    /// Store everything still buffered and stop the worker
    ///
    /// # Returns
    ///
    /// `false` if the worker did not finish within `timeout`
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        let mut command = Command::Shutdown;
        loop {
            match self.sender.try_send(command) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => break,
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        warn!("{:?} buffer did not drain before shutdown", P::KIND);
                        return false;
                    }
                    command = returned;
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }

        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("{:?} dispatcher did not stop within {:?}", P::KIND, timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if handle.join().is_err() {
            error!("{:?} dispatcher worker panicked", P::KIND);
        }
        true
    }
}

impl<P: DataPoint> MeasurementConsumer<P> for BufferedDispatcher<P> {
    fn accept(&self, point: P) {
        self.dispatch(point);
    }
}

struct Worker<P: DataPoint> {
    receiver: Receiver<Command<P>>,
    adapter: Arc<dyn StorageAdapter>,
    batch: PayloadBuilder<P>,
    last_flush: Instant,
    queued: Arc<AtomicUsize>,
    diagnostics: Arc<Diagnostics>,
    config: DispatcherConfig,
}

impl<P: DataPoint> Worker<P> {
    fn run(&mut self) {
        debug!("{:?} dispatcher started", P::KIND);

        loop {
            let timeout = if self.batch.is_empty() {
                Duration::from_secs(60)
            } else {
                (self.last_flush + self.config.flush_interval).saturating_duration_since(Instant::now())
            };

            match self.receiver.recv_timeout(timeout) {
                Ok(Command::Store(point)) => {
                    let occupancy = self.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                    self.diagnostics.set_buffer_occupancy(P::KIND, occupancy);
                    if self.batch.is_empty() {
                        self.last_flush = Instant::now();
                    }
                    self.batch.add(point);
                    if self.batch.len() >= self.config.batch_size {
                        self.flush();
                    }
                }
                Ok(Command::Shutdown) => {
                    self.drain();
                    self.flush();
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.flush();
                    break;
                }
            }

            if !self.batch.is_empty() && self.last_flush.elapsed() >= self.config.flush_interval {
                self.flush();
            }
        }

        info!("{:?} dispatcher stopped", P::KIND);
    }

    /// Take whatever is still queued behind the shutdown command
    fn drain(&mut self) {
        while let Ok(Command::Store(point)) = self.receiver.try_recv() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.batch.add(point);
            if self.batch.len() >= self.config.batch_size {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        self.last_flush = Instant::now();
        if self.batch.is_empty() {
            return;
        }
        let payload = std::mem::take(&mut self.batch);
        match P::store(self.adapter.as_ref(), &payload, self.config.store_wait_millis) {
            Ok(()) => self.diagnostics.record_stored(P::KIND, payload.len() as u64),
            Err(e) => {
                error!(
                    "Failed to store [{}] {:?} data points: {}",
                    payload.len(),
                    P::KIND,
                    e
                );
                self.diagnostics.record_storage_failure(P::KIND);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::events::{Avail, AvailDataPoint, MetricDataPoint, MetricKind};
    use crate::storage::adapter::MockStorageAdapter;
    use chrono::Utc;

    fn metric(i: usize) -> MetricDataPoint {
        MetricDataPoint {
            key: format!("MI~R~[f~e~/]~MT~m{}", i % 7),
            timestamp: Utc::now(),
            value: i as f64,
            kind: MetricKind::Gauge,
            units: "none".to_string(),
        }
    }

    fn config(buffer_size: usize, batch_size: usize) -> DispatcherConfig {
        DispatcherConfig {
            buffer_size,
            batch_size,
            flush_interval: Duration::from_millis(50),
            store_wait_millis: 0,
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(DispatcherConfig::metrics().buffer_size, 1_000);
        assert_eq!(DispatcherConfig::metrics().batch_size, 100);
        assert_eq!(DispatcherConfig::avails().buffer_size, 500);
        assert_eq!(DispatcherConfig::avails().batch_size, 50);
    }

    #[test]
    fn test_batches_never_exceed_batch_size() {
        let stored = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stored);
        let mut adapter = MockStorageAdapter::new();
        adapter.expect_store_metrics().returning(move |payload, _| {
            assert!(payload.len() <= 10);
            counter.fetch_add(payload.len(), Ordering::SeqCst);
            Ok(())
        });

        let diagnostics = Arc::new(Diagnostics::new());
        let dispatcher: BufferedDispatcher<MetricDataPoint> =
            BufferedDispatcher::spawn(Arc::new(adapter), config(1_000, 10), Arc::clone(&diagnostics));

        for i in 0..95 {
            assert!(dispatcher.dispatch(metric(i)));
        }
        assert!(dispatcher.shutdown(Duration::from_secs(5)));

        assert_eq!(stored.load(Ordering::SeqCst), 95);
        assert_eq!(diagnostics.snapshot().metrics_buffer.stored, 95);
    }

    #[test]
    fn test_overload_drops_instead_of_growing() {
        let stored = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stored);
        let mut adapter = MockStorageAdapter::new();
        adapter.expect_store_metrics().returning(move |payload, _| {
            thread::sleep(Duration::from_millis(20));
            counter.fetch_add(payload.len(), Ordering::SeqCst);
            Ok(())
        });

        let diagnostics = Arc::new(Diagnostics::new());
        let dispatcher: BufferedDispatcher<MetricDataPoint> =
            BufferedDispatcher::spawn(Arc::new(adapter), config(20, 5), Arc::clone(&diagnostics));

        let total = 500;
        let mut accepted = 0;
        for i in 0..total {
            if dispatcher.dispatch(metric(i)) {
                accepted += 1;
            }
            let occupancy = diagnostics.snapshot().metrics_buffer.occupancy;
            assert!(occupancy <= 20, "occupancy {occupancy} exceeds buffer");
        }
        assert!(dispatcher.shutdown(Duration::from_secs(10)));

        let snapshot = diagnostics.snapshot().metrics_buffer;
        assert!(snapshot.dropped > 0);
        assert_eq!(accepted as u64 + snapshot.dropped, total as u64);
        assert_eq!(stored.load(Ordering::SeqCst), accepted);
    }

    #[test]
    fn test_partial_batch_flushed_by_time() {
        let stored = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stored);
        let mut adapter = MockStorageAdapter::new();
        adapter.expect_store_avails().returning(move |payload, _| {
            counter.fetch_add(payload.len(), Ordering::SeqCst);
            Ok(())
        });

        let dispatcher: BufferedDispatcher<AvailDataPoint> = BufferedDispatcher::spawn(
            Arc::new(adapter),
            config(100, 50),
            Arc::new(Diagnostics::new()),
        );
        dispatcher.accept(AvailDataPoint {
            key: "AI~R~[f~e~/]~AT~Up".to_string(),
            timestamp: Utc::now(),
            value: Avail::Up,
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while stored.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(stored.load(Ordering::SeqCst), 1);
        assert!(dispatcher.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_storage_failures_are_counted_not_propagated() {
        let mut adapter = MockStorageAdapter::new();
        adapter
            .expect_store_metrics()
            .returning(|_, _| Err(StorageError::Unreachable("connection refused".to_string())));

        let diagnostics = Arc::new(Diagnostics::new());
        let dispatcher: BufferedDispatcher<MetricDataPoint> =
            BufferedDispatcher::spawn(Arc::new(adapter), config(100, 5), Arc::clone(&diagnostics));

        for i in 0..10 {
            assert!(dispatcher.dispatch(metric(i)));
        }
        assert!(dispatcher.shutdown(Duration::from_secs(5)));

        let snapshot = diagnostics.snapshot().metrics_buffer;
        assert_eq!(snapshot.storage_failures, 2);
        assert_eq!(snapshot.stored, 0);
    }

    #[test]
    fn test_dispatch_after_shutdown_drops() {
        let adapter = MockStorageAdapter::new();
        let diagnostics = Arc::new(Diagnostics::new());
        let dispatcher: BufferedDispatcher<MetricDataPoint> =
            BufferedDispatcher::spawn(Arc::new(adapter), config(10, 5), Arc::clone(&diagnostics));

        assert!(dispatcher.shutdown(Duration::from_secs(5)));
        assert!(!dispatcher.dispatch(metric(0)));
        assert_eq!(diagnostics.snapshot().metrics_buffer.dropped, 1);
        // a second shutdown is a no-op
        assert!(dispatcher.shutdown(Duration::from_secs(1)));
    }
}
