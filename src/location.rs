//! Location fixes and the location source contract.
//!
//! A `Coordinate` is one fix from the provider. The `LocationSource` trait is
//! the interface the controller consumes: it hands out the last known fix and
//! streams new fixes into a `LocationSink` at the rate a `TrackingPolicy` asks for.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PolicyError;

/// A single fix from the location provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees, valid range -90..=90
    pub latitude: f64,
    /// Longitude in degrees, valid range -180..=180
    pub longitude: f64,
    /// When the fix was taken
    pub timestamp: DateTime<Utc>,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    /// Builds a coordinate from a millisecond epoch timestamp, as providers report it
    pub fn at_millis(latitude: f64, longitude: f64, millis: i64) -> Self {
        let timestamp = DateTime::from_timestamp_millis(millis).unwrap_or_default();
        Self::new(latitude, longitude, timestamp)
    }

    /// Whether latitude and longitude are inside their valid ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Accuracy/power trade-off requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    HighAccuracy,
    Balanced,
    LowPower,
    NoPower,
}

/// How often, and how accurately, fixes should be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingPolicy {
    interval: Duration,
    fastest_interval: Duration,
    priority: Priority,
}

impl TrackingPolicy {
    /// Validates and builds a policy. The fastest interval may never exceed the interval.
    pub fn new(
        interval: Duration,
        fastest_interval: Duration,
        priority: Priority,
    ) -> Result<Self, PolicyError> {
        if interval.is_zero() {
            return Err(PolicyError::ZeroInterval);
        }
        if fastest_interval > interval {
            return Err(PolicyError::FastestExceedsInterval {
                fastest: fastest_interval,
                interval,
            });
        }

        Ok(Self {
            interval,
            fastest_interval,
            priority,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn fastest_interval(&self) -> Duration {
        self.fastest_interval
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            fastest_interval: Duration::from_secs(5),
            priority: Priority::HighAccuracy,
        }
    }
}

/// Opaque handle for an active location subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Callback a location source pushes fixes into.
///
/// The controller builds one per subscription; delivering into a sink only
/// enqueues the fix, so it is safe to call from any thread.
#[derive(Clone)]
pub struct LocationSink {
    deliver: Arc<dyn Fn(Coordinate) + Send + Sync>,
}

impl LocationSink {
    pub fn new(deliver: impl Fn(Coordinate) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn deliver(&self, coordinate: Coordinate) {
        (self.deliver)(coordinate)
    }
}

impl fmt::Debug for LocationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationSink").finish_non_exhaustive()
    }
}

/// Interface for location providers
pub trait LocationSource: Send + Sync {
    /// The best fix the provider currently knows about, if any
    fn last_known(&self) -> Option<Coordinate>;

    /// Start streaming fixes into `sink` according to `policy`
    fn subscribe(&self, policy: &TrackingPolicy, sink: LocationSink) -> Result<SubscriptionHandle>;

    /// Stop a stream started by `subscribe`. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_policy_rejects_fastest_above_interval() {
        let result = TrackingPolicy::new(
            Duration::from_secs(5),
            Duration::from_secs(10),
            Priority::Balanced,
        );

        assert_eq!(
            result,
            Err(PolicyError::FastestExceedsInterval {
                fastest: Duration::from_secs(10),
                interval: Duration::from_secs(5),
            })
        );
    }

    #[test]
    fn test_policy_accepts_equal_intervals() {
        let policy = TrackingPolicy::new(
            Duration::from_secs(5),
            Duration::from_secs(5),
            Priority::LowPower,
        )
        .unwrap();

        assert_eq!(policy.interval(), policy.fastest_interval());
        assert_eq!(policy.priority(), Priority::LowPower);
    }

    #[test]
    fn test_policy_rejects_zero_interval() {
        let result = TrackingPolicy::new(Duration::ZERO, Duration::ZERO, Priority::NoPower);
        assert_eq!(result, Err(PolicyError::ZeroInterval));
    }

    #[test]
    fn test_default_policy() {
        let policy = TrackingPolicy::default();
        assert_eq!(policy.interval(), Duration::from_secs(10));
        assert_eq!(policy.fastest_interval(), Duration::from_secs(5));
        assert_eq!(policy.priority(), Priority::HighAccuracy);
    }

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::at_millis(37.4, -122.1, 100).is_valid());
        assert!(Coordinate::at_millis(-90.0, 180.0, 0).is_valid());
        assert!(!Coordinate::at_millis(200.0, 0.0, 0).is_valid());
        assert!(!Coordinate::at_millis(0.0, -180.5, 0).is_valid());
        assert!(!Coordinate::at_millis(f64::NAN, 0.0, 0).is_valid());
    }

    #[test]
    fn test_coordinate_millis_timestamp() {
        let coordinate = Coordinate::at_millis(1.0, 2.0, 100);
        assert_eq!(coordinate.timestamp.timestamp_millis(), 100);
    }

    #[test]
    fn test_sink_delivers_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = LocationSink::new(move |c| seen_clone.lock().unwrap().push(c));

        sink.deliver(Coordinate::at_millis(1.0, 2.0, 3));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].latitude, 1.0);
    }
}
