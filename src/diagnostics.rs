//! Self-diagnostics for the collection core
//!
//! A single [`Diagnostics`] context is created at startup and handed to every
//! component that has something to report: drivers record request latency
//! and errors per protocol, collector loops record delayed collections, and
//! dispatchers record buffer occupancy, drops and storage failures. The
//! context is purely observational; nothing reads it to make decisions.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Latency samples kept per protocol
const MAX_LATENCY_SAMPLES: usize = 100;

/// Request statistics for one protocol
#[derive(Debug, Default)]
struct ProtocolStats {
    requests: u64,
    errors: u64,
    latencies: VecDeque<Duration>,
}

/// Which dispatcher buffer a counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Metrics,
    Avails,
}

#[derive(Debug, Default)]
struct BufferStats {
    occupancy: AtomicUsize,
    dropped: AtomicU64,
    stored: AtomicU64,
    storage_failures: AtomicU64,
}

/// Point-in-time view of one protocol's request statistics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProtocolSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    /// Errors as a percentage of requests (0-100)
    pub error_rate: f64,
}

/// Point-in-time view of one dispatcher buffer
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BufferSnapshot {
    pub occupancy: usize,
    pub dropped: u64,
    pub stored: u64,
    pub storage_failures: u64,
}

/// Everything diagnostics knows, ready to be logged as JSON
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub protocols: BTreeMap<String, ProtocolSnapshot>,
    pub delayed_collections: u64,
    pub metrics_buffer: BufferSnapshot,
    pub avails_buffer: BufferSnapshot,
    pub discovery_scans: u64,
    pub last_discovery_ms: u64,
}

/// Shared diagnostics context
#[derive(Debug, Default)]
pub struct Diagnostics {
    protocols: Mutex<HashMap<String, ProtocolStats>>,
    delayed_collections: AtomicU64,
    metrics_buffer: BufferStats,
    avails_buffer: BufferStats,
    discovery_scans: AtomicU64,
    last_discovery_ms: AtomicU64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn protocols(&self) -> MutexGuard<'_, HashMap<String, ProtocolStats>> {
        self.protocols.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn buffer(&self, kind: BufferKind) -> &BufferStats {
        match kind {
            BufferKind::Metrics => &self.metrics_buffer,
            BufferKind::Avails => &self.avails_buffer,
        }
    }

    /// Record a completed protocol request
    pub fn record_request(&self, protocol: &str, duration: Duration, failed: bool) {
        let mut protocols = self.protocols();
        let stats = protocols.entry(protocol.to_string()).or_default();
        stats.requests += 1;
        if failed {
            stats.errors += 1;
        }
        stats.latencies.push_back(duration);
        while stats.latencies.len() > MAX_LATENCY_SAMPLES {
            stats.latencies.pop_front();
        }
    }

    /// Record collections that started later than they were due
    pub fn record_delayed_collections(&self, count: u64) {
        if count > 0 {
            debug!("{} collections ran late", count);
            self.delayed_collections.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn set_buffer_occupancy(&self, kind: BufferKind, occupancy: usize) {
        self.buffer(kind).occupancy.store(occupancy, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, kind: BufferKind, count: u64) {
        self.buffer(kind).dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_stored(&self, kind: BufferKind, count: u64) {
        self.buffer(kind).stored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_storage_failure(&self, kind: BufferKind) {
        self.buffer(kind)
            .storage_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discovery(&self, duration: Duration) {
        self.discovery_scans.fetch_add(1, Ordering::Relaxed);
        self.last_discovery_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    fn buffer_snapshot(&self, kind: BufferKind) -> BufferSnapshot {
        let stats = self.buffer(kind);
        BufferSnapshot {
            occupancy: stats.occupancy.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            stored: stats.stored.load(Ordering::Relaxed),
            storage_failures: stats.storage_failures.load(Ordering::Relaxed),
        }
    }

    /// Take a consistent-enough copy of all counters
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let protocols = self
            .protocols()
            .iter()
            .map(|(name, stats)| {
                let avg_latency_ms = if stats.latencies.is_empty() {
                    0.0
                } else {
                    stats
                        .latencies
                        .iter()
                        .map(|d| d.as_secs_f64() * 1000.0)
                        .sum::<f64>()
                        / stats.latencies.len() as f64
                };
                let error_rate = if stats.requests == 0 {
                    0.0
                } else {
                    stats.errors as f64 / stats.requests as f64 * 100.0
                };
                (
                    name.clone(),
                    ProtocolSnapshot {
                        requests: stats.requests,
                        errors: stats.errors,
                        avg_latency_ms,
                        error_rate,
                    },
                )
            })
            .collect();

        DiagnosticsSnapshot {
            timestamp: Utc::now(),
            protocols,
            delayed_collections: self.delayed_collections.load(Ordering::Relaxed),
            metrics_buffer: self.buffer_snapshot(BufferKind::Metrics),
            avails_buffer: self.buffer_snapshot(BufferKind::Avails),
            discovery_scans: self.discovery_scans.load(Ordering::Relaxed),
            last_discovery_ms: self.last_discovery_ms.load(Ordering::Relaxed),
        }
    }

    /// Log the current snapshot at info level
    pub fn report(&self) -> DiagnosticsSnapshot {
        let snapshot = self.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!("Diagnostics: {}", json),
            Err(e) => warn!("Failed to serialize diagnostics snapshot: {}", e),
        }

        for (protocol, stats) in &snapshot.protocols {
            if stats.requests >= 10 && stats.error_rate > 50.0 {
                warn!(
                    "High {} error rate: {:.1}% of {} requests",
                    protocol, stats.error_rate, stats.requests
                );
            }
        }
        snapshot
    }
}

/// Measures one protocol request and records it when finished
pub struct RequestTimer<'a> {
    start_time: Instant,
    protocol: &'a str,
    diagnostics: &'a Diagnostics,
}

impl<'a> RequestTimer<'a> {
    pub fn start(diagnostics: &'a Diagnostics, protocol: &'a str) -> Self {
        Self {
            start_time: Instant::now(),
            protocol,
            diagnostics,
        }
    }

    /// Record the request, passing the result through
    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        self.diagnostics
            .record_request(self.protocol, self.start_time.elapsed(), result.is_err());
        result
    }
}
