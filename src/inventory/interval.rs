use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unit of a collection interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    fn millis_per_unit(self) -> u64 {
        match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
        }
    }
}

/// How often a measurement is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    value: u64,
    unit: TimeUnit,
}

impl Interval {
    pub fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn seconds(value: u64) -> Self {
        Self::new(value, TimeUnit::Seconds)
    }

    pub fn millis(&self) -> u64 {
        self.value.saturating_mul(self.unit.millis_per_unit())
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.millis())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}
