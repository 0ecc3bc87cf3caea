use crate::diagnostics::BufferKind;
use crate::error::StorageError;
use crate::events::{AvailDataPoint, MetricDataPoint};
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// A data point the dispatcher can buffer and hand to storage
pub trait DataPoint: Clone + Send + 'static {
    const KIND: BufferKind;

    fn key(&self) -> &str;

    /// The stored form of this point, without its key
    fn sample(&self) -> Value;

    /// Hand a batch of this kind to the matching adapter method
    fn store(
        adapter: &dyn StorageAdapter,
        payload: &PayloadBuilder<Self>,
        wait_millis: u64,
    ) -> Result<(), StorageError>;
}

impl DataPoint for MetricDataPoint {
    const KIND: BufferKind = BufferKind::Metrics;

    fn key(&self) -> &str {
        &self.key
    }

    fn sample(&self) -> Value {
        json!({
            "timestamp": self.timestamp.timestamp_millis(),
            "value": self.value,
            "type": self.kind,
            "units": self.units,
        })
    }

    fn store(
        adapter: &dyn StorageAdapter,
        payload: &PayloadBuilder<Self>,
        wait_millis: u64,
    ) -> Result<(), StorageError> {
        adapter.store_metrics(payload, wait_millis)
    }
}

impl DataPoint for AvailDataPoint {
    const KIND: BufferKind = BufferKind::Avails;

    fn key(&self) -> &str {
        &self.key
    }

    fn sample(&self) -> Value {
        json!({
            "timestamp": self.timestamp.timestamp_millis(),
            "value": self.value,
        })
    }

    fn store(
        adapter: &dyn StorageAdapter,
        payload: &PayloadBuilder<Self>,
        wait_millis: u64,
    ) -> Result<(), StorageError> {
        adapter.store_avails(payload, wait_millis)
    }
}

/// One batch of data points grouped by storage key
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadBuilder<P> {
    series: BTreeMap<String, Vec<P>>,
    count: usize,
}

pub type MetricPayloadBuilder = PayloadBuilder<MetricDataPoint>;
pub type AvailPayloadBuilder = PayloadBuilder<AvailDataPoint>;

impl<P> Default for PayloadBuilder<P> {
    fn default() -> Self {
        Self {
            series: BTreeMap::new(),
            count: 0,
        }
    }
}

impl<P: DataPoint> PayloadBuilder<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, point: P) {
        self.series
            .entry(point.key().to_string())
            .or_default()
            .push(point);
        self.count += 1;
    }

    /// Number of data points
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn points(&self, key: &str) -> &[P] {
        self.series.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// `[{"id": key, "data": [sample, ...]}, ...]` ordered by key
    pub fn to_json_value(&self) -> Value {
        Value::Array(
            self.series
                .iter()
                .map(|(key, points)| {
                    json!({
                        "id": key,
                        "data": points.iter().map(DataPoint::sample).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }

    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if a sample cannot be encoded.
    pub fn to_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string(&self.to_json_value())?)
    }
}

/// Where collected data points end up
///
/// Implementations may block for up to `wait_millis` per call; the
/// dispatcher calls them from its own worker thread.
#[cfg_attr(test, mockall::automock)]
pub trait StorageAdapter: Send + Sync {
    fn store_metrics(&self, payload: &MetricPayloadBuilder, wait_millis: u64) -> Result<(), StorageError>;

    fn store_avails(&self, payload: &AvailPayloadBuilder, wait_millis: u64) -> Result<(), StorageError>;
}

/// Writes every payload to the log instead of a metrics backend
#[derive(Debug, Default)]
pub struct LoggingStorageAdapter;

impl LoggingStorageAdapter {
    fn log<P: DataPoint>(kind: &str, payload: &PayloadBuilder<P>) -> Result<(), StorageError> {
        info!(
            "Storing [{}] {} data points for [{}] keys",
            payload.len(),
            kind,
            payload.keys().count()
        );
        if log::log_enabled!(log::Level::Debug) {
            debug!("{} payload: {}", kind, payload.to_json()?);
        }
        Ok(())
    }
}

impl StorageAdapter for LoggingStorageAdapter {
    fn store_metrics(&self, payload: &MetricPayloadBuilder, _wait_millis: u64) -> Result<(), StorageError> {
        Self::log("metric", payload)
    }

    fn store_avails(&self, payload: &AvailPayloadBuilder, _wait_millis: u64) -> Result<(), StorageError> {
        Self::log("avail", payload)
    }
}
