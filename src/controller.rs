//! The tracking controller.
//!
//! The controller is a single task that owns all tracking state. Commands from
//! the caller, fixes from the location source, settings-check outcomes, and
//! geocode completions all arrive as messages on one mailbox and are handled
//! one at a time, so nothing else ever touches the state.
//!
//! Each geocode request gets a fresh correlation token; only a result carrying
//! the latest token is applied. Stopping clears the token and bumps the
//! subscription epoch and attempt counters, which turns every late fix,
//! settings outcome, or geocode result from before the stop into a no-op.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ErrorKind;
use crate::geocode::ReverseGeocoder;
use crate::location::{Coordinate, LocationSink, LocationSource, SubscriptionHandle, TrackingPolicy};
use crate::observer::Observer;
use crate::places::{PlaceGuess, PlacesProvider};
use crate::settings::{
    PermissionGate, PermissionResponder, ResolutionHandle, SettingsChecker, SettingsOutcome,
};
use crate::state::SavedState;
use crate::worker::{
    CorrelationToken, GeocodeRequest, GeocodeResponse, GeocodeResult, GeocodeWorker, PlaceResponse,
};

/// Where the controller is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Idle,
    /// The caller was asked to obtain the location permission
    AwaitingPermission,
    /// A settings check is running, or the settings dialog is open
    AwaitingSettingsResolution,
    /// Subscribed and waiting for the next fix
    Tracking,
    /// Subscribed, with a geocode lookup in flight
    AwaitingGeocode,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackingState::Idle => "idle",
            TrackingState::AwaitingPermission => "awaiting permission",
            TrackingState::AwaitingSettingsResolution => "awaiting settings resolution",
            TrackingState::Tracking => "tracking",
            TrackingState::AwaitingGeocode => "awaiting geocode",
        };
        f.write_str(name)
    }
}

/// External capabilities the controller depends on
#[derive(Clone)]
pub struct Collaborators {
    pub location: Arc<dyn LocationSource>,
    pub settings: Arc<dyn SettingsChecker>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    pub permissions: Arc<dyn PermissionGate>,
    pub places: Option<Arc<dyn PlacesProvider>>,
}

/// Point-in-time copy of the controller's state
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: TrackingState,
    /// Lines of the last successfully resolved address
    pub last_address: Option<Vec<String>>,
    /// Timestamp of the fix behind `last_address`
    pub last_update: Option<DateTime<Utc>>,
    /// Timestamp of the most recent fix received
    pub last_fix: Option<DateTime<Utc>>,
    /// Most recent failure, kept alongside the last good address
    pub last_error: Option<(ErrorKind, String)>,
    pub last_place: Option<PlaceGuess>,
}

impl Snapshot {
    pub fn is_tracking(&self) -> bool {
        self.state != TrackingState::Idle
    }

    /// The restorable subset of this snapshot
    pub fn saved_state(&self) -> SavedState {
        SavedState {
            last_address: self.last_address.as_ref().map(|lines| lines.join("\n")),
            last_update: self.last_update,
            tracking: self.is_tracking(),
        }
    }

    /// Address panel text, when tracking
    pub fn display_text(&self) -> Option<String> {
        self.saved_state().display_text()
    }

    /// Address panel text, or the start hint when idle
    pub fn screen_text(&self) -> String {
        self.saved_state().screen_text()
    }
}

enum Command {
    StartTracking,
    StopTracking,
    PermissionResult {
        attempt: Option<u64>,
        granted: bool,
    },
    SettingsChecked {
        attempt: u64,
        outcome: SettingsOutcome,
    },
    SettingsResolved(bool),
    SettingsResolutionFailed(String),
    LocationUpdate {
        epoch: Option<u64>,
        coordinate: Coordinate,
    },
    GeocodeComplete(GeocodeResponse),
    PlaceComplete(PlaceResponse),
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown(oneshot::Sender<SavedState>),
}

/// Cloneable handle for sending commands to a running controller
#[derive(Clone)]
pub struct TrackerHandle {
    tx: UnboundedSender<Command>,
}

impl TrackerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("Tracking controller is no longer running"))
    }

    /// Begin a tracking attempt. Ignored unless idle.
    pub fn start_tracking(&self) -> Result<()> {
        self.send(Command::StartTracking)
    }

    /// Stop tracking. A no-op when idle.
    pub fn stop_tracking(&self) -> Result<()> {
        self.send(Command::StopTracking)
    }

    /// The user's answer to the permission prompt
    pub fn on_permission_result(&self, granted: bool) -> Result<()> {
        self.send(Command::PermissionResult {
            attempt: None,
            granted,
        })
    }

    /// The user's answer to the settings dialog
    pub fn on_settings_resolved(&self, accepted: bool) -> Result<()> {
        self.send(Command::SettingsResolved(accepted))
    }

    /// The settings dialog could not be shown
    pub fn settings_resolution_failed(&self, message: impl Into<String>) -> Result<()> {
        self.send(Command::SettingsResolutionFailed(message.into()))
    }

    /// Inject a fix as if it came from the location source
    pub fn on_location_update(&self, coordinate: Coordinate) -> Result<()> {
        self.send(Command::LocationUpdate {
            epoch: None,
            coordinate,
        })
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.context("Tracking controller stopped before answering")
    }

    /// Stop the controller and return the state to persist
    pub async fn shutdown(&self) -> Result<SavedState> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.context("Tracking controller stopped before answering")
    }
}

/// Owns the tracking lifecycle. Runs as its own task; talk to it through a `TrackerHandle`.
pub struct TrackingController {
    collaborators: Collaborators,
    policy: TrackingPolicy,
    observer: Arc<dyn Observer>,
    worker: GeocodeWorker,
    mailbox: WeakUnboundedSender<Command>,

    state: TrackingState,
    subscription: Option<SubscriptionHandle>,
    /// Bumped on every subscribe and stop; fixes from older subscriptions are dropped
    subscription_epoch: u64,
    /// Bumped on every start and stop; late permission and settings answers are dropped
    attempt: u64,
    pending_resolution: Option<ResolutionHandle>,
    latest_token: Option<CorrelationToken>,

    last_address: Option<Vec<String>>,
    last_update: Option<DateTime<Utc>>,
    last_fix: Option<DateTime<Utc>>,
    last_error: Option<(ErrorKind, String)>,
    last_place: Option<PlaceGuess>,
}

impl TrackingController {
    /// Spawns a controller with no prior state
    pub fn spawn(
        collaborators: Collaborators,
        policy: TrackingPolicy,
        observer: Arc<dyn Observer>,
    ) -> (TrackerHandle, JoinHandle<SavedState>) {
        Self::spawn_restored(collaborators, policy, observer, SavedState::default())
    }

    /// Spawns a controller from persisted state. If tracking was on, it starts again.
    pub fn spawn_restored(
        collaborators: Collaborators,
        policy: TrackingPolicy,
        observer: Arc<dyn Observer>,
        saved: SavedState,
    ) -> (TrackerHandle, JoinHandle<SavedState>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut worker = GeocodeWorker::new(Arc::clone(&collaborators.geocoder));
        if let Some(ref places) = collaborators.places {
            worker = worker.with_places(Arc::clone(places));
        }

        let controller = Self {
            collaborators,
            policy,
            observer,
            worker,
            mailbox: tx.downgrade(),
            state: TrackingState::Idle,
            subscription: None,
            subscription_epoch: 0,
            attempt: 0,
            pending_resolution: None,
            latest_token: None,
            last_address: saved
                .last_address
                .as_ref()
                .map(|address| address.lines().map(String::from).collect()),
            last_update: saved.last_update,
            last_fix: None,
            last_error: None,
            last_place: None,
        };

        let resume = saved.tracking;
        let task = tokio::spawn(controller.run(rx, resume));

        (TrackerHandle { tx }, task)
    }

    async fn run(mut self, mut rx: UnboundedReceiver<Command>, resume: bool) -> SavedState {
        if resume {
            info!("Resuming location tracking from saved state");
            self.start_tracking();
        }

        while let Some(command) = rx.recv().await {
            match command {
                Command::StartTracking => self.start_tracking(),
                Command::StopTracking => self.stop_tracking(),
                Command::PermissionResult { attempt, granted } => {
                    self.on_permission_result(attempt, granted)
                }
                Command::SettingsChecked { attempt, outcome } => {
                    self.on_settings_checked(attempt, outcome)
                }
                Command::SettingsResolved(accepted) => self.on_settings_resolved(accepted),
                Command::SettingsResolutionFailed(message) => {
                    self.on_settings_resolution_failed(message)
                }
                Command::LocationUpdate { epoch, coordinate } => {
                    self.on_location_update(epoch, coordinate)
                }
                Command::GeocodeComplete(response) => self.on_geocode_complete(response),
                Command::PlaceComplete(response) => self.on_place_complete(response),
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown(reply) => {
                    let saved = self.finish();
                    let _ = reply.send(saved.clone());
                    return saved;
                }
            }
        }

        self.finish()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            last_address: self.last_address.clone(),
            last_update: self.last_update,
            last_fix: self.last_fix,
            last_error: self.last_error.clone(),
            last_place: self.last_place.clone(),
        }
    }

    /// Releases the subscription; the tracking flag is kept so a restart resumes
    fn finish(&mut self) -> SavedState {
        let saved = self.snapshot().saved_state();
        if let Some(handle) = self.subscription.take() {
            self.collaborators.location.unsubscribe(handle);
        }
        self.subscription_epoch += 1;
        self.latest_token = None;
        debug!("Tracking controller finished in state {}", self.state);
        saved
    }

    fn transition(&mut self, next: TrackingState) {
        if self.state != next {
            debug!("Tracking state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn start_tracking(&mut self) {
        if self.state != TrackingState::Idle {
            debug!("Ignoring start request while {}", self.state);
            return;
        }

        self.attempt += 1;
        self.last_error = None;
        self.observer.on_loading();

        if !self.collaborators.permissions.has_fine_location() {
            self.transition(TrackingState::AwaitingPermission);
            self.observer.on_permission_needed();

            let attempt = self.attempt;
            let mailbox = self.mailbox.clone();
            self.collaborators
                .permissions
                .request(PermissionResponder::new(move |granted| {
                    if let Some(tx) = mailbox.upgrade() {
                        let _ = tx.send(Command::PermissionResult {
                            attempt: Some(attempt),
                            granted,
                        });
                    }
                }));
            return;
        }

        self.check_settings();
    }

    fn check_settings(&mut self) {
        self.transition(TrackingState::AwaitingSettingsResolution);
        self.pending_resolution = None;

        let Some(tx) = self.mailbox.upgrade() else {
            return;
        };
        let settings = Arc::clone(&self.collaborators.settings);
        let policy = self.policy;
        let attempt = self.attempt;

        tokio::spawn(async move {
            let outcome = settings.check(&policy).await;
            let _ = tx.send(Command::SettingsChecked { attempt, outcome });
        });
    }

    fn on_permission_result(&mut self, attempt: Option<u64>, granted: bool) {
        if self.state != TrackingState::AwaitingPermission
            || attempt.is_some_and(|a| a != self.attempt)
        {
            debug!("Ignoring permission result while {}", self.state);
            return;
        }

        if granted {
            info!("Location permission granted");
            self.check_settings();
        } else {
            self.abort(ErrorKind::PermissionDenied, "Location permission denied");
        }
    }

    fn on_settings_checked(&mut self, attempt: u64, outcome: SettingsOutcome) {
        if attempt != self.attempt
            || self.state != TrackingState::AwaitingSettingsResolution
            || self.pending_resolution.is_some()
        {
            debug!("Discarding settings outcome from attempt {attempt}");
            return;
        }

        match outcome {
            SettingsOutcome::Satisfied => self.begin_updates(),
            SettingsOutcome::ResolvableViaUserDialog(handle) => {
                info!("Location settings need a change: {}", handle.description);
                self.observer.on_settings_resolution_needed(&handle);
                self.pending_resolution = Some(handle);
            }
            SettingsOutcome::Unresolvable => self.abort(
                ErrorKind::SettingsUnresolvable,
                "Location settings are not satisfied and cannot be changed",
            ),
        }
    }

    fn on_settings_resolved(&mut self, accepted: bool) {
        if self.state != TrackingState::AwaitingSettingsResolution {
            debug!("Ignoring settings answer while {}", self.state);
            return;
        }
        let Some(handle) = self.pending_resolution.take() else {
            debug!("Ignoring settings answer with no dialog open");
            return;
        };

        if accepted {
            info!("Settings change {} accepted, checking again", handle.id());
            self.check_settings();
        } else {
            self.abort(
                ErrorKind::SettingsUnresolvable,
                "Location settings change was declined",
            );
        }
    }

    fn on_settings_resolution_failed(&mut self, message: String) {
        if self.state != TrackingState::AwaitingSettingsResolution
            || self.pending_resolution.is_none()
        {
            debug!("Ignoring settings dialog failure while {}", self.state);
            return;
        }

        self.pending_resolution = None;
        self.abort(
            ErrorKind::SettingsUnresolvable,
            &format!("Could not show the location settings dialog: {message}"),
        );
    }

    fn begin_updates(&mut self) {
        if let Some(handle) = self.subscription {
            error!(
                "Location subscription {} is already active, not subscribing again",
                handle.id()
            );
            self.transition(TrackingState::Tracking);
            return;
        }

        self.subscription_epoch += 1;
        let epoch = self.subscription_epoch;
        let mailbox = self.mailbox.clone();
        let sink = LocationSink::new(move |coordinate| {
            if let Some(tx) = mailbox.upgrade() {
                let _ = tx.send(Command::LocationUpdate {
                    epoch: Some(epoch),
                    coordinate,
                });
            }
        });

        match self.collaborators.location.subscribe(&self.policy, sink) {
            Ok(handle) => {
                info!(
                    "Tracking location every {:?} ({:?})",
                    self.policy.interval(),
                    self.policy.priority()
                );
                self.subscription = Some(handle);
                self.transition(TrackingState::Tracking);

                if let Some(last) = self.collaborators.location.last_known() {
                    debug!("Using last known fix {last}");
                    self.on_location_update(Some(epoch), last);
                }
            }
            Err(e) => self.abort(
                ErrorKind::ProviderUnavailable,
                &format!("Failed to request location updates: {e:#}"),
            ),
        }
    }

    fn stop_tracking(&mut self) {
        if self.state == TrackingState::Idle {
            debug!("Stop requested while idle");
            return;
        }

        if let Some(handle) = self.subscription.take() {
            self.collaborators.location.unsubscribe(handle);
        }
        self.subscription_epoch += 1;
        self.attempt += 1;
        self.latest_token = None;
        self.pending_resolution = None;
        self.transition(TrackingState::Idle);
        info!("Stopped tracking location");
    }

    /// Ends the current attempt and reports why
    fn abort(&mut self, kind: ErrorKind, message: &str) {
        info!("Tracking not started: {message}");
        if let Some(handle) = self.subscription.take() {
            self.collaborators.location.unsubscribe(handle);
        }
        self.pending_resolution = None;
        self.transition(TrackingState::Idle);
        self.last_error = Some((kind, message.to_string()));
        self.observer.on_error(kind, message);
    }

    fn on_location_update(&mut self, epoch: Option<u64>, coordinate: Coordinate) {
        if epoch.is_some_and(|e| e != self.subscription_epoch) {
            debug!("Dropping fix {coordinate} from a cancelled subscription");
            return;
        }
        if !matches!(
            self.state,
            TrackingState::Tracking | TrackingState::AwaitingGeocode
        ) {
            debug!("Dropping fix {coordinate} while {}", self.state);
            return;
        }

        self.last_fix = Some(coordinate.timestamp);

        let request = GeocodeRequest::new(coordinate);
        self.latest_token = Some(request.token);
        if self.state == TrackingState::Tracking {
            self.transition(TrackingState::AwaitingGeocode);
            self.observer.on_loading();
        }
        debug!("Geocoding {coordinate} as {}", request.token);

        let Some(tx) = self.mailbox.upgrade() else {
            return;
        };

        let geocode = self.worker.submit(request);
        let geocode_tx = tx.clone();
        tokio::spawn(async move {
            if let Ok(response) = geocode.await {
                let _ = geocode_tx.send(Command::GeocodeComplete(response));
            }
        });

        if let Some(place) = self.worker.submit_place(&request) {
            tokio::spawn(async move {
                if let Ok(response) = place.await {
                    let _ = tx.send(Command::PlaceComplete(response));
                }
            });
        }
    }

    fn on_geocode_complete(&mut self, response: GeocodeResponse) {
        let token = response.request.token;
        if self.state != TrackingState::AwaitingGeocode || self.latest_token != Some(token) {
            debug!("Discarding stale geocode result {token}");
            return;
        }

        self.transition(TrackingState::Tracking);
        let timestamp = response.request.coordinate.timestamp;

        match response.result {
            GeocodeResult::Success(lines) => {
                info!("Resolved address: {}", lines.join(", "));
                self.observer.on_address_resolved(&lines, timestamp);
                self.last_address = Some(lines);
                self.last_update = Some(timestamp);
                self.last_error = None;
            }
            GeocodeResult::Failure(kind, message) => {
                self.observer.on_error(kind, &message);
                self.last_error = Some((kind, message));
            }
        }
    }

    fn on_place_complete(&mut self, response: PlaceResponse) {
        if self.state == TrackingState::Idle || self.latest_token != Some(response.token) {
            debug!("Discarding stale place guess {}", response.token);
            return;
        }

        self.observer.on_place_hint(&response.guess);
        self.last_place = Some(response.guess);
    }
}
