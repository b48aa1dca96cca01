//! Reverse geocoding for walktrack.
//!
//! This module converts a `Coordinate` into the ordered address lines of a
//! single human-readable address.
//!
//! It defines the `ReverseGeocoder` trait as the interface for different
//! geocoding implementations, a `MockGeocoder` that returns predefined
//! addresses for certain coordinate ranges (used offline and in tests), and a
//! `NominatimGeocoder` that queries an OpenStreetMap Nominatim server.

use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::{GeocoderConfig, GeocoderProvider};
use crate::error::ErrorKind;
use crate::location::Coordinate;

/// Ways a reverse geocode lookup can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeocodeError {
    /// Network or other I/O problem
    #[error("geocoding service not available: {0}")]
    ProviderUnavailable(String),
    /// Latitude or longitude outside the valid range
    #[error("invalid latitude or longitude used. Latitude = {latitude}, Longitude = {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
    /// The provider knows no address for this location
    #[error("no address found")]
    NoResultFound,
}

impl GeocodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeocodeError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            GeocodeError::InvalidCoordinate { .. } => ErrorKind::InvalidCoordinate,
            GeocodeError::NoResultFound => ErrorKind::NoResultFound,
        }
    }

    pub(crate) fn invalid(coordinate: &Coordinate) -> Self {
        GeocodeError::InvalidCoordinate {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
        }
    }
}

/// Interface for reverse geocoding services.
///
/// Implementations may block; the `GeocodeWorker` always calls them off the
/// controller's context.
pub trait ReverseGeocoder: Send + Sync {
    /// Convert a coordinate into the ordered lines of one address
    fn resolve(&self, coordinate: &Coordinate) -> Result<Vec<String>, GeocodeError>;
}

fn address(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

/// Mock geocoding service for testing and offline use
pub struct MockGeocoder;

impl ReverseGeocoder for MockGeocoder {
    fn resolve(&self, coordinate: &Coordinate) -> Result<Vec<String>, GeocodeError> {
        if !coordinate.is_valid() {
            return Err(GeocodeError::invalid(coordinate));
        }

        let (latitude, longitude) = (coordinate.latitude, coordinate.longitude);

        // Mountain View (roughly)
        if latitude > 37.3 && latitude < 37.5 && longitude > -122.2 && longitude < -122.0 {
            return Ok(address(&["1600 Amphitheatre Pkwy", "Mountain View, CA"]));
        }

        // San Francisco (roughly)
        if latitude > 37.5 && latitude < 38.0 && longitude > -123.0 && longitude < -122.0 {
            return Ok(address(&["Market St", "San Francisco, CA"]));
        }

        // Chicago (roughly)
        if latitude > 41.5 && latitude < 42.0 && longitude > -88.0 && longitude < -87.5 {
            return Ok(address(&["233 S Wacker Dr", "Chicago, IL"]));
        }

        // New York (roughly)
        if latitude > 40.5 && latitude < 41.0 && longitude > -74.5 && longitude < -73.5 {
            return Ok(address(&["350 5th Ave", "New York, NY"]));
        }

        // London (roughly)
        if latitude > 51.0 && latitude < 52.0 && longitude > -0.5 && longitude < 0.5 {
            return Ok(address(&["Trafalgar Square", "London WC2N 5DN", "United Kingdom"]));
        }

        // Anything else gets a generic line based on the quadrant
        let ns = if latitude >= 0.0 { "North" } else { "South" };
        let ew = if longitude >= 0.0 { "East" } else { "West" };

        Ok(vec![format!("{ns} {ew} at {latitude:.4}, {longitude:.4}")])
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
    error: Option<String>,
}

/// Reverse geocoder backed by a Nominatim server
pub struct NominatimGeocoder {
    base_url: String,
    user_agent: String,
    language: Option<String>,
    timeout: Duration,
}

impl NominatimGeocoder {
    pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: user_agent.into(),
            language: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    fn request_url(&self, coordinate: &Coordinate) -> Result<Url, GeocodeError> {
        let endpoint = format!("{}/reverse", self.base_url.trim_end_matches('/'));
        Url::parse_with_params(
            &endpoint,
            &[
                ("format", "jsonv2".to_string()),
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
                ("zoom", "18".to_string()),
            ],
        )
        .map_err(|e| GeocodeError::ProviderUnavailable(format!("bad geocoder URL {endpoint}: {e}")))
    }

    fn fetch(&self, url: Url) -> reqwest::Result<NominatimResponse> {
        // Built per lookup: the blocking client must be created and dropped off the async runtime
        let client = Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout)
            .build()?;

        let mut request = client.get(url);
        if let Some(ref language) = self.language {
            request = request.header(reqwest::header::ACCEPT_LANGUAGE, language);
        }

        request.send()?.error_for_status()?.json()
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    fn resolve(&self, coordinate: &Coordinate) -> Result<Vec<String>, GeocodeError> {
        if !coordinate.is_valid() {
            return Err(GeocodeError::invalid(coordinate));
        }

        let url = self.request_url(coordinate)?;
        debug!("Reverse geocoding {coordinate} via {url}");

        let response = self
            .fetch(url)
            .map_err(|e| GeocodeError::ProviderUnavailable(e.to_string()))?;

        if let Some(error) = response.error {
            debug!("Geocoder returned no address for {coordinate}: {error}");
            return Err(GeocodeError::NoResultFound);
        }

        let lines: Vec<String> = response
            .display_name
            .unwrap_or_default()
            .split(", ")
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        if lines.is_empty() {
            return Err(GeocodeError::NoResultFound);
        }

        Ok(lines)
    }
}

/// Factory function to create the configured geocoding service
pub fn create_geocoding_service(config: &GeocoderConfig) -> Arc<dyn ReverseGeocoder> {
    match config.provider {
        GeocoderProvider::Mock => Arc::new(MockGeocoder),
        GeocoderProvider::Nominatim => Arc::new(
            NominatimGeocoder::new(config.base_url.clone(), config.user_agent.clone())
                .with_language(config.language.clone()),
        ),
    }
}
