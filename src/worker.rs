//! Off-thread reverse geocoding.
//!
//! The `GeocodeWorker` runs one lookup per `GeocodeRequest` on the blocking
//! pool and answers through a single-use `oneshot` channel. Every failure,
//! including a panicking geocoder, comes back as `GeocodeResult::Failure`.
//! Results carry the request's correlation token; the worker makes no ordering
//! promise between concurrent requests.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::geocode::{GeocodeError, ReverseGeocoder};
use crate::location::Coordinate;
use crate::places::{self, PlaceGuess, PlacesProvider};

/// Opaque identifier binding a request to its eventual result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fix waiting to be geocoded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeocodeRequest {
    pub coordinate: Coordinate,
    pub token: CorrelationToken,
}

impl GeocodeRequest {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            token: CorrelationToken::new(),
        }
    }
}

/// Outcome of one lookup
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeResult {
    /// Address lines, in display order
    Success(Vec<String>),
    Failure(ErrorKind, String),
}

impl From<GeocodeError> for GeocodeResult {
    fn from(error: GeocodeError) -> Self {
        GeocodeResult::Failure(error.kind(), error.to_string())
    }
}

/// A result tagged with the request it answers
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResponse {
    pub request: GeocodeRequest,
    pub result: GeocodeResult,
}

/// A place guess tagged with the token of the fix it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceResponse {
    pub token: CorrelationToken,
    pub guess: PlaceGuess,
}

/// Runs reverse geocode lookups without blocking the caller
#[derive(Clone)]
pub struct GeocodeWorker {
    geocoder: Arc<dyn ReverseGeocoder>,
    places: Option<Arc<dyn PlacesProvider>>,
}

impl GeocodeWorker {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        Self {
            geocoder,
            places: None,
        }
    }

    /// Also produce a place guess for every fix
    pub fn with_places(mut self, places: Arc<dyn PlacesProvider>) -> Self {
        self.places = Some(places);
        self
    }

    pub fn has_places(&self) -> bool {
        self.places.is_some()
    }

    /// Starts a lookup. The receiver yields exactly one response for `request`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: GeocodeRequest) -> oneshot::Receiver<GeocodeResponse> {
        let (tx, rx) = oneshot::channel();
        let geocoder = Arc::clone(&self.geocoder);

        tokio::spawn(async move {
            let result = Self::lookup(geocoder, request.coordinate).await;
            if tx.send(GeocodeResponse { request, result }).is_err() {
                debug!("Nobody waiting for geocode result {}", request.token);
            }
        });

        rx
    }

    /// Submits and waits for the response
    pub async fn resolve(&self, request: GeocodeRequest) -> GeocodeResponse {
        match self.submit(request).await {
            Ok(response) => response,
            Err(_) => GeocodeResponse {
                request,
                result: GeocodeResult::Failure(
                    ErrorKind::ProviderUnavailable,
                    "geocode worker dropped the request".to_string(),
                ),
            },
        }
    }

    /// Starts a place lookup for the same fix, if a places provider is configured
    pub fn submit_place(&self, request: &GeocodeRequest) -> Option<oneshot::Receiver<PlaceResponse>> {
        let provider = Arc::clone(self.places.as_ref()?);
        let (tx, rx) = oneshot::channel();
        let token = request.token;
        let coordinate = request.coordinate;

        tokio::spawn(async move {
            let guess = places::resolve_place(provider.as_ref(), &coordinate).await;
            let _ = tx.send(PlaceResponse { token, guess });
        });

        Some(rx)
    }

    async fn lookup(geocoder: Arc<dyn ReverseGeocoder>, coordinate: Coordinate) -> GeocodeResult {
        if !coordinate.is_valid() {
            let error = GeocodeError::invalid(&coordinate);
            warn!("{error}");
            return error.into();
        }

        let outcome = task::spawn_blocking(move || geocoder.resolve(&coordinate)).await;

        match outcome {
            Ok(Ok(lines)) if lines.is_empty() => {
                warn!("Geocoder returned an empty address for {coordinate}");
                GeocodeError::NoResultFound.into()
            }
            Ok(Ok(lines)) => GeocodeResult::Success(lines),
            Ok(Err(error)) => {
                warn!("Failed to geocode {coordinate}: {error}");
                error.into()
            }
            Err(join_error) => {
                warn!("Geocoder task for {coordinate} failed: {join_error}");
                GeocodeResult::Failure(
                    ErrorKind::ProviderUnavailable,
                    format!("geocoder task failed: {join_error}"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::MockGeocoder;

    struct EmptyGeocoder;

    impl ReverseGeocoder for EmptyGeocoder {
        fn resolve(&self, _coordinate: &Coordinate) -> Result<Vec<String>, GeocodeError> {
            Ok(Vec::new())
        }
    }

    struct PanickingGeocoder;

    impl ReverseGeocoder for PanickingGeocoder {
        fn resolve(&self, _coordinate: &Coordinate) -> Result<Vec<String>, GeocodeError> {
            panic!("geocoder exploded")
        }
    }

    struct OfflineGeocoder;

    impl ReverseGeocoder for OfflineGeocoder {
        fn resolve(&self, _coordinate: &Coordinate) -> Result<Vec<String>, GeocodeError> {
            Err(GeocodeError::ProviderUnavailable("network down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_success_is_tagged_with_token() {
        let worker = GeocodeWorker::new(Arc::new(MockGeocoder));
        let request = GeocodeRequest::new(Coordinate::at_millis(37.4, -122.1, 100));

        let response = worker.resolve(request).await;

        assert_eq!(response.request.token, request.token);
        assert_eq!(
            response.result,
            GeocodeResult::Success(vec![
                "1600 Amphitheatre Pkwy".to_string(),
                "Mountain View, CA".to_string()
            ])
        );
    }

    #[tokio::test]
    async fn test_invalid_coordinate_never_reaches_geocoder() {
        let worker = GeocodeWorker::new(Arc::new(PanickingGeocoder));
        let request = GeocodeRequest::new(Coordinate::at_millis(200.0, 0.0, 0));

        let response = worker.resolve(request).await;

        assert!(matches!(
            response.result,
            GeocodeResult::Failure(ErrorKind::InvalidCoordinate, _)
        ));
    }

    #[tokio::test]
    async fn test_empty_address_is_no_result() {
        let worker = GeocodeWorker::new(Arc::new(EmptyGeocoder));
        let response = worker
            .resolve(GeocodeRequest::new(Coordinate::at_millis(1.0, 1.0, 0)))
            .await;

        assert!(matches!(
            response.result,
            GeocodeResult::Failure(ErrorKind::NoResultFound, _)
        ));
    }

    #[tokio::test]
    async fn test_provider_errors_are_converted() {
        let worker = GeocodeWorker::new(Arc::new(OfflineGeocoder));
        let response = worker
            .resolve(GeocodeRequest::new(Coordinate::at_millis(1.0, 1.0, 0)))
            .await;

        match response.result {
            GeocodeResult::Failure(kind, message) => {
                assert_eq!(kind, ErrorKind::ProviderUnavailable);
                assert!(message.contains("network down"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_geocoder_becomes_failure() {
        let worker = GeocodeWorker::new(Arc::new(PanickingGeocoder));
        let response = worker
            .resolve(GeocodeRequest::new(Coordinate::at_millis(1.0, 1.0, 0)))
            .await;

        assert!(matches!(
            response.result,
            GeocodeResult::Failure(ErrorKind::ProviderUnavailable, _)
        ));
    }

    #[tokio::test]
    async fn test_no_place_lookup_without_provider() {
        let worker = GeocodeWorker::new(Arc::new(MockGeocoder));
        let request = GeocodeRequest::new(Coordinate::at_millis(1.0, 1.0, 0));
        assert!(!worker.has_places());
        assert!(worker.submit_place(&request).is_none());
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(CorrelationToken::new(), CorrelationToken::new());
    }
}
