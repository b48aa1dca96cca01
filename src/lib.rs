//! # walktrack
//!
//! Tracks the device location and turns each fix into a human-readable address.
//!
//! The heart of the crate is the `TrackingController`, a single task that
//! checks the location permission and device settings, subscribes to a
//! location source, hands every fix to a background reverse-geocoding worker,
//! and reports the outcome to an observer exactly once per fix.
//!
//! ## Features
//!
//! - Permission and settings-resolution gates before tracking starts
//! - Off-thread reverse geocoding (offline mock or Nominatim)
//! - Stale results dropped by correlation token, so the newest fix always wins
//! - Optional place hints (school, gym, restaurant, library)
//! - Last address, timestamp, and tracking flag persisted across restarts

pub mod config;
pub mod controller;
pub mod error;
pub mod geocode;
pub mod location;
pub mod observer;
pub mod places;
pub mod settings;
pub mod sim;
pub mod state;
pub mod worker;

pub use controller::{Collaborators, Snapshot, TrackerHandle, TrackingController, TrackingState};
pub use error::ErrorKind;
pub use location::{Coordinate, Priority, TrackingPolicy};
pub use observer::{Observer, TrackingEvent};
pub use state::SavedState;
