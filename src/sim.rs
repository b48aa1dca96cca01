//! Simulated collaborators.
//!
//! Stand-ins for the platform location provider, settings checker and
//! permission gate, used by the CLI and by tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::location::{Coordinate, LocationSink, LocationSource, SubscriptionHandle, TrackingPolicy};
use crate::places::{Place, PlaceLikelihood, PlaceType, PlacesProvider};
use crate::settings::{PermissionGate, PermissionResponder, SettingsChecker, SettingsOutcome};

/// Location source that random-walks around a starting point
pub struct SimulatedLocationSource {
    position: Arc<Mutex<(f64, f64)>>,
    last: Arc<Mutex<Option<Coordinate>>>,
    step_degrees: f64,
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl SimulatedLocationSource {
    pub fn new(latitude: f64, longitude: f64, step_degrees: f64) -> Self {
        Self {
            position: Arc::new(Mutex::new((latitude, longitude))),
            last: Arc::new(Mutex::new(None)),
            step_degrees,
            next_id: AtomicU64::new(1),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one random step and returns the new fix
    fn step(position: &Mutex<(f64, f64)>, step_degrees: f64) -> Coordinate {
        let mut rng = rand::thread_rng();
        let mut position = position.lock().unwrap_or_else(|e| e.into_inner());

        if step_degrees > 0.0 {
            position.0 = (position.0 + rng.gen_range(-step_degrees..step_degrees)).clamp(-90.0, 90.0);
            position.1 = (position.1 + rng.gen_range(-step_degrees..step_degrees)).clamp(-180.0, 180.0);
        }

        Coordinate::new(position.0, position.1, Utc::now())
    }

    /// Number of streams currently running
    pub fn active_streams(&self) -> usize {
        self.streams.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl LocationSource for SimulatedLocationSource {
    fn last_known(&self) -> Option<Coordinate> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribe(&self, policy: &TrackingPolicy, sink: LocationSink) -> Result<SubscriptionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let interval = policy.interval();
        let step_degrees = self.step_degrees;
        let position = Arc::clone(&self.position);
        let last = Arc::clone(&self.last);

        debug!("Starting simulated location stream {id} every {interval:?}");
        let stream = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let fix = Self::step(&position, step_degrees);
                *last.lock().unwrap_or_else(|e| e.into_inner()) = Some(fix);
                sink.deliver(fix);
            }
        });

        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, stream);

        Ok(SubscriptionHandle::new(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let stream = self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.id());

        if let Some(stream) = stream {
            debug!("Stopping simulated location stream {}", handle.id());
            stream.abort();
        }
    }
}

/// Location source driven by hand: fixes are pushed with `push`
#[derive(Default)]
pub struct ManualLocationSource {
    last: Mutex<Option<Coordinate>>,
    sinks: Mutex<HashMap<u64, LocationSink>>,
    next_id: AtomicU64,
    subscribe_calls: AtomicU64,
    unsubscribe_calls: AtomicU64,
}

impl ManualLocationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_known(self, coordinate: Coordinate) -> Self {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(coordinate);
        self
    }

    /// Delivers a fix to every active subscription
    pub fn push(&self, coordinate: Coordinate) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(coordinate);
        let sinks: Vec<LocationSink> = self
            .sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for sink in sinks {
            sink.deliver(coordinate);
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.sinks.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::Relaxed)
    }

    pub fn unsubscribe_calls(&self) -> u64 {
        self.unsubscribe_calls.load(Ordering::Relaxed)
    }
}

impl LocationSource for ManualLocationSource {
    fn last_known(&self) -> Option<Coordinate> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribe(&self, _policy: &TrackingPolicy, sink: LocationSink) -> Result<SubscriptionHandle> {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, sink);
        Ok(SubscriptionHandle::new(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.unsubscribe_calls.fetch_add(1, Ordering::Relaxed);
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.id());
    }
}

/// Settings checker that plays back a list of outcomes, repeating the last one
pub struct ScriptedSettingsChecker {
    outcomes: Mutex<VecDeque<SettingsOutcome>>,
    last: Mutex<SettingsOutcome>,
}

impl ScriptedSettingsChecker {
    pub fn new(outcomes: impl IntoIterator<Item = SettingsOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(SettingsOutcome::Satisfied),
        }
    }

    /// Always reports the same outcome
    pub fn always(outcome: SettingsOutcome) -> Self {
        Self::new([outcome])
    }
}

#[async_trait]
impl SettingsChecker for ScriptedSettingsChecker {
    async fn check(&self, policy: &TrackingPolicy) -> SettingsOutcome {
        let next = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(outcome) = next {
            *last = outcome;
        }

        debug!("Settings check for {:?}: {:?}", policy.priority(), *last);
        last.clone()
    }
}

/// Permission gate with a fixed answer
pub struct FixedPermissionGate {
    granted: bool,
    answer: Option<bool>,
}

impl FixedPermissionGate {
    /// Permission already granted
    pub fn granted() -> Self {
        Self {
            granted: true,
            answer: None,
        }
    }

    /// Permission missing; the prompt is answered with `answer` right away
    pub fn answering(answer: bool) -> Self {
        Self {
            granted: false,
            answer: Some(answer),
        }
    }

    /// Permission missing; the prompt stays open until the caller answers
    pub fn pending() -> Self {
        Self {
            granted: false,
            answer: None,
        }
    }
}

impl PermissionGate for FixedPermissionGate {
    fn has_fine_location(&self) -> bool {
        self.granted
    }

    fn request(&self, responder: PermissionResponder) {
        if let Some(answer) = self.answer {
            responder.respond(answer);
        }
    }
}

/// Places provider with a handful of made-up places around every fix
pub struct MockPlacesProvider;

#[async_trait]
impl PlacesProvider for MockPlacesProvider {
    async fn current_place(&self, coordinate: &Coordinate) -> Result<Vec<PlaceLikelihood>> {
        if !coordinate.is_valid() {
            anyhow::bail!("no places for {coordinate}");
        }

        let place = |name: &str, likelihood: f32, types: Vec<PlaceType>| PlaceLikelihood {
            place: Place {
                name: name.to_string(),
                types,
            },
            likelihood,
        };

        // Shift the odds with the position so a walk visits different places
        let bucket = ((coordinate.latitude.abs() + coordinate.longitude.abs()) * 1000.0) as u64 % 3;
        let odds = match bucket {
            0 => [0.5, 0.3, 0.2],
            1 => [0.2, 0.5, 0.3],
            _ => [0.3, 0.2, 0.5],
        };

        Ok(vec![
            place("Hillview Elementary", odds[0], vec![PlaceType::School]),
            place("Corner Fitness", odds[1], vec![PlaceType::Gym]),
            place(
                "Public Library Cafe",
                odds[2],
                vec![PlaceType::Library, PlaceType::Restaurant],
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ResolutionHandle;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_simulated_source_streams_until_unsubscribed() {
        let source = SimulatedLocationSource::new(37.4, -122.1, 0.0001);
        let policy = TrackingPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(5),
            Default::default(),
        )
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = source
            .subscribe(&policy, LocationSink::new(move |c| {
                let _ = tx.send(c);
            }))
            .unwrap();

        let fix = rx.recv().await.unwrap();
        assert!(fix.is_valid());
        assert!((fix.latitude - 37.4).abs() < 0.001);
        assert_eq!(source.active_streams(), 1);

        source.unsubscribe(handle);
        assert_eq!(source.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_mock_places_pick_a_known_hint() {
        let candidates = MockPlacesProvider
            .current_place(&Coordinate::at_millis(37.4, -122.1, 0))
            .await
            .unwrap();
        let guess = crate::places::guess_place(&candidates);

        assert_eq!(candidates.len(), 3);
        assert_ne!(guess.hint, crate::places::PlaceHint::Unknown);
    }

    #[test]
    fn test_manual_source_tracks_subscriptions() {
        let source = ManualLocationSource::new();
        let seen = Arc::new(Mutex::new(0));
        let seen_clone = Arc::clone(&seen);

        let handle = source
            .subscribe(
                &TrackingPolicy::default(),
                LocationSink::new(move |_| *seen_clone.lock().unwrap() += 1),
            )
            .unwrap();
        source.push(Coordinate::at_millis(1.0, 1.0, 1));
        source.unsubscribe(handle);
        source.push(Coordinate::at_millis(2.0, 2.0, 2));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(source.subscribe_calls(), 1);
        assert_eq!(source.unsubscribe_calls(), 1);
        assert_eq!(source.last_known().unwrap().latitude, 2.0);
    }

    #[tokio::test]
    async fn test_scripted_checker_repeats_last_outcome() {
        let handle = ResolutionHandle::new(1, "Enable GPS");
        let checker = ScriptedSettingsChecker::new([
            SettingsOutcome::ResolvableViaUserDialog(handle.clone()),
            SettingsOutcome::Satisfied,
        ]);
        let policy = TrackingPolicy::default();

        assert_eq!(
            checker.check(&policy).await,
            SettingsOutcome::ResolvableViaUserDialog(handle)
        );
        assert_eq!(checker.check(&policy).await, SettingsOutcome::Satisfied);
        assert_eq!(checker.check(&policy).await, SettingsOutcome::Satisfied);
    }
}
