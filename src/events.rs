//! Normalized data points produced by collection
//!
//! Every protocol ends up producing one of the two data point types defined
//! here. They are what the dispatcher buffers and what the storage adapter
//! serializes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Availability state of a resource
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Avail {
    /// The resource is up and running
    Up,
    /// The resource is down or could not be reached
    Down,
    /// The reported value could not be interpreted
    Unknown,
}

impl Avail {
    /// Combine two states where any DOWN wins, then UNKNOWN, then UP
    pub fn merge(self, other: Avail) -> Avail {
        match (self, other) {
            (Avail::Down, _) | (_, Avail::Down) => Avail::Down,
            (Avail::Unknown, _) | (_, Avail::Unknown) => Avail::Unknown,
            _ => Avail::Up,
        }
    }
}

impl From<bool> for Avail {
    fn from(up: bool) -> Self {
        if up {
            Avail::Up
        } else {
            Avail::Down
        }
    }
}

/// How a metric value evolves over time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time value
    #[default]
    Gauge,
    /// Monotonically increasing value
    Counter,
}

/// A single metric sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDataPoint {
    /// Storage key, the measurement instance id unless overridden
    pub key: String,
    /// When the value was read
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: Timestamp,
    /// The sampled value
    pub value: f64,
    pub kind: MetricKind,
    pub units: String,
}

/// A single availability sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailDataPoint {
    /// Storage key, the measurement instance id unless overridden
    pub key: String,
    /// When the value was read
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: Timestamp,
    pub value: Avail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avail_merge_down_wins() {
        assert_eq!(Avail::Up.merge(Avail::Down), Avail::Down);
        assert_eq!(Avail::Unknown.merge(Avail::Down), Avail::Down);
        assert_eq!(Avail::Up.merge(Avail::Unknown), Avail::Unknown);
        assert_eq!(Avail::Up.merge(Avail::Up), Avail::Up);
    }

    #[test]
    fn test_avail_serializes_uppercase() {
        let point = AvailDataPoint {
            key: "AI~R~[feed~ep~/]~AT~Server Availability".to_string(),
            timestamp: DateTime::from_timestamp_millis(1_000).unwrap(),
            value: Avail::Down,
        };

        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["value"], "DOWN");
        assert_eq!(json["timestamp"], 1_000);
    }

    #[test]
    fn test_metric_kind_defaults_to_gauge() {
        assert_eq!(MetricKind::default(), MetricKind::Gauge);
    }
}
