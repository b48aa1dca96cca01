//! Error taxonomy for walktrack.
//!
//! `ErrorKind` is what the observer sees. Every failure in the tracking flow is
//! reduced to one of these kinds before it leaves the controller, so nothing
//! here ever propagates as a crash.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Kinds of failure reported to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The user refused the fine location permission
    #[error("location permission denied")]
    PermissionDenied,
    /// Device settings cannot satisfy the tracking policy
    #[error("location settings cannot be satisfied")]
    SettingsUnresolvable,
    /// Network or other I/O problem in the geocoder
    #[error("geocoding service not available")]
    ProviderUnavailable,
    /// Latitude or longitude out of range
    #[error("invalid latitude or longitude used")]
    InvalidCoordinate,
    /// The geocoder returned an empty result set
    #[error("no address found")]
    NoResultFound,
}

impl ErrorKind {
    /// Whether this failure ends the current `start_tracking` attempt
    pub fn aborts_attempt(self) -> bool {
        matches!(self, ErrorKind::PermissionDenied | ErrorKind::SettingsUnresolvable)
    }
}

/// Rejected tracking policy values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("update interval must be greater than zero")]
    ZeroInterval,
    #[error("fastest interval {fastest:?} exceeds update interval {interval:?}")]
    FastestExceedsInterval {
        fastest: Duration,
        interval: Duration,
    },
}
