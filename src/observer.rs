//! Events the tracking controller publishes to its caller.

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::mpsc;

use crate::error::ErrorKind;
use crate::places::PlaceGuess;
use crate::settings::ResolutionHandle;

/// Receives tracking events. Every method defaults to doing nothing.
///
/// Calls are made from the controller's task, one at a time, in the order the
/// controller decided them.
pub trait Observer: Send + Sync {
    /// A request cycle started; show a loading indicator
    fn on_loading(&self) {}

    fn on_address_resolved(&self, _lines: &[String], _timestamp: DateTime<Utc>) {}

    fn on_error(&self, _kind: ErrorKind, _message: &str) {}

    /// The caller should ask the user for the location permission
    fn on_permission_needed(&self) {}

    /// The caller should show the settings dialog behind `handle`
    fn on_settings_resolution_needed(&self, _handle: &ResolutionHandle) {}

    fn on_place_hint(&self, _guess: &PlaceGuess) {}
}

/// Owned copy of an observer callback
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    Loading,
    AddressResolved {
        lines: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    PermissionNeeded,
    SettingsResolutionNeeded(ResolutionHandle),
    PlaceHint(PlaceGuess),
}

/// Observer that forwards every event into a channel
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TrackingEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrackingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: TrackingEvent) {
        // A closed receiver means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl Observer for ChannelObserver {
    fn on_loading(&self) {
        self.send(TrackingEvent::Loading);
    }

    fn on_address_resolved(&self, lines: &[String], timestamp: DateTime<Utc>) {
        self.send(TrackingEvent::AddressResolved {
            lines: lines.to_vec(),
            timestamp,
        });
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.send(TrackingEvent::Error {
            kind,
            message: message.to_string(),
        });
    }

    fn on_permission_needed(&self) {
        self.send(TrackingEvent::PermissionNeeded);
    }

    fn on_settings_resolution_needed(&self, handle: &ResolutionHandle) {
        self.send(TrackingEvent::SettingsResolutionNeeded(handle.clone()));
    }

    fn on_place_hint(&self, guess: &PlaceGuess) {
        self.send(TrackingEvent::PlaceHint(guess.clone()));
    }
}

/// Observer that writes every event to the log
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_loading(&self) {
        info!("Loading...");
    }

    fn on_address_resolved(&self, lines: &[String], timestamp: DateTime<Utc>) {
        info!("Address at {}: {}", timestamp.to_rfc3339(), lines.join(" / "));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        warn!("{kind}: {message}");
    }

    fn on_permission_needed(&self) {
        info!("Location permission needed");
    }

    fn on_settings_resolution_needed(&self, handle: &ResolutionHandle) {
        info!("Settings change needed: {}", handle.description);
    }

    fn on_place_hint(&self, guess: &PlaceGuess) {
        info!(
            "Place: {} ({})",
            guess.name.as_deref().unwrap_or("unknown"),
            guess.hint
        );
    }
}

/// Fans every event out to several observers
#[derive(Default)]
pub struct Observers {
    observers: Vec<Box<dyn Observer>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl Observer + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }
}

impl Observer for Observers {
    fn on_loading(&self) {
        self.observers.iter().for_each(|o| o.on_loading());
    }

    fn on_address_resolved(&self, lines: &[String], timestamp: DateTime<Utc>) {
        self.observers
            .iter()
            .for_each(|o| o.on_address_resolved(lines, timestamp));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.observers.iter().for_each(|o| o.on_error(kind, message));
    }

    fn on_permission_needed(&self) {
        self.observers.iter().for_each(|o| o.on_permission_needed());
    }

    fn on_settings_resolution_needed(&self, handle: &ResolutionHandle) {
        self.observers
            .iter()
            .for_each(|o| o.on_settings_resolution_needed(handle));
    }

    fn on_place_hint(&self, guess: &PlaceGuess) {
        self.observers.iter().for_each(|o| o.on_place_hint(guess));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_events() {
        let (observer, mut rx) = ChannelObserver::new();

        observer.on_loading();
        observer.on_error(ErrorKind::NoResultFound, "no address found");

        assert_eq!(rx.try_recv().unwrap(), TrackingEvent::Loading);
        assert_eq!(
            rx.try_recv().unwrap(),
            TrackingEvent::Error {
                kind: ErrorKind::NoResultFound,
                message: "no address found".to_string(),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fan_out_reaches_every_observer() {
        let (first, mut first_rx) = ChannelObserver::new();
        let (second, mut second_rx) = ChannelObserver::new();
        let observers = Observers::new().with(first).with(second).with(LogObserver);

        observers.on_permission_needed();

        assert_eq!(first_rx.try_recv().unwrap(), TrackingEvent::PermissionNeeded);
        assert_eq!(second_rx.try_recv().unwrap(), TrackingEvent::PermissionNeeded);
    }
}
