//! Place-hint enrichment.
//!
//! A places provider returns candidate places around a fix, each with a
//! likelihood. We pick the most likely one and reduce its type set to a coarse
//! `PlaceHint`. The hint is a guess: a failed or empty lookup simply yields
//! `PlaceHint::Unknown`.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::location::Coordinate;

/// Place categories reported by a places provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceType {
    School,
    Gym,
    Restaurant,
    Library,
    Other(String),
}

/// A candidate place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub types: Vec<PlaceType>,
}

/// A candidate place and how likely the device is there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceLikelihood {
    pub place: Place,
    pub likelihood: f32,
}

/// Coarse guess at what kind of place the device is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceHint {
    School,
    Gym,
    Restaurant,
    Library,
    #[default]
    Unknown,
}

impl fmt::Display for PlaceHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaceHint::School => "school",
            PlaceHint::Gym => "gym",
            PlaceHint::Restaurant => "restaurant",
            PlaceHint::Library => "library",
            PlaceHint::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl PlaceHint {
    /// Maps a type set to a hint. School beats Gym beats Restaurant beats Library.
    pub fn from_types(types: &[PlaceType]) -> Self {
        const PRIORITY: [(PlaceType, PlaceHint); 4] = [
            (PlaceType::School, PlaceHint::School),
            (PlaceType::Gym, PlaceHint::Gym),
            (PlaceType::Restaurant, PlaceHint::Restaurant),
            (PlaceType::Library, PlaceHint::Library),
        ];

        PRIORITY
            .iter()
            .find(|(place_type, _)| types.contains(place_type))
            .map(|(_, hint)| *hint)
            .unwrap_or(PlaceHint::Unknown)
    }
}

/// Best place guess for one fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceGuess {
    /// Name of the winning place, if there was one
    pub name: Option<String>,
    pub hint: PlaceHint,
}

impl PlaceGuess {
    pub fn unknown() -> Self {
        Self {
            name: None,
            hint: PlaceHint::Unknown,
        }
    }
}

/// Picks the place with the strictly greatest likelihood.
///
/// Ties keep the first one seen, since an equal likelihood never replaces the
/// current best.
pub fn most_likely(candidates: &[PlaceLikelihood]) -> Option<&PlaceLikelihood> {
    let mut best: Option<&PlaceLikelihood> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.likelihood <= current.likelihood => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Reduces a likelihood list to a guess
pub fn guess_place(candidates: &[PlaceLikelihood]) -> PlaceGuess {
    match most_likely(candidates) {
        Some(winner) => PlaceGuess {
            name: Some(winner.place.name.clone()),
            hint: PlaceHint::from_types(&winner.place.types),
        },
        None => PlaceGuess::unknown(),
    }
}

/// Interface for services that know which places are near a fix
#[async_trait]
pub trait PlacesProvider: Send + Sync {
    async fn current_place(&self, coordinate: &Coordinate) -> Result<Vec<PlaceLikelihood>>;
}

/// Looks up the current place, turning any failure into an unknown guess
pub async fn resolve_place(provider: &dyn PlacesProvider, coordinate: &Coordinate) -> PlaceGuess {
    match provider.current_place(coordinate).await {
        Ok(candidates) => {
            let guess = guess_place(&candidates);
            debug!(
                "Place guess for {coordinate}: {} ({})",
                guess.name.as_deref().unwrap_or("none"),
                guess.hint
            );
            guess
        }
        Err(e) => {
            warn!("Place lookup failed for {coordinate}: {e:#}");
            PlaceGuess::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, likelihood: f32, types: Vec<PlaceType>) -> PlaceLikelihood {
        PlaceLikelihood {
            place: Place {
                name: name.to_string(),
                types,
            },
            likelihood,
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl PlacesProvider for FailingProvider {
        async fn current_place(&self, _coordinate: &Coordinate) -> Result<Vec<PlaceLikelihood>> {
            anyhow::bail!("places service offline")
        }
    }

    #[test]
    fn test_first_seen_maximum_wins() {
        let candidates = vec![
            candidate("A", 0.4, vec![]),
            candidate("B", 0.9, vec![]),
            candidate("C", 0.9, vec![]),
        ];

        let winner = most_likely(&candidates).unwrap();
        assert_eq!(winner.place.name, "B");
    }

    #[test]
    fn test_strictly_greater_replaces() {
        let candidates = vec![candidate("A", 0.2, vec![]), candidate("B", 0.3, vec![])];
        assert_eq!(most_likely(&candidates).unwrap().place.name, "B");
    }

    #[test]
    fn test_empty_candidates_have_no_winner() {
        assert!(most_likely(&[]).is_none());
        assert_eq!(guess_place(&[]), PlaceGuess::unknown());
    }

    #[test]
    fn test_type_priority() {
        assert_eq!(
            PlaceHint::from_types(&[PlaceType::Library, PlaceType::Gym]),
            PlaceHint::Gym
        );
        assert_eq!(
            PlaceHint::from_types(&[PlaceType::Restaurant, PlaceType::School]),
            PlaceHint::School
        );
        assert_eq!(
            PlaceHint::from_types(&[PlaceType::Other("cafe".to_string())]),
            PlaceHint::Unknown
        );
        assert_eq!(PlaceHint::from_types(&[]), PlaceHint::Unknown);
    }

    #[test]
    fn test_guess_uses_winner_types() {
        let candidates = vec![
            candidate("Main Library", 0.7, vec![PlaceType::Library]),
            candidate("Diner", 0.1, vec![PlaceType::Restaurant]),
        ];

        let guess = guess_place(&candidates);
        assert_eq!(guess.name.as_deref(), Some("Main Library"));
        assert_eq!(guess.hint, PlaceHint::Library);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_unknown() {
        let guess = resolve_place(&FailingProvider, &Coordinate::at_millis(1.0, 1.0, 0)).await;
        assert_eq!(guess, PlaceGuess::unknown());
    }
}
