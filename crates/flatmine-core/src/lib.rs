use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod currency;
pub mod db;
pub mod fetcher;
pub mod geo;
pub mod pipeline;
pub mod ranger;
pub mod source;
pub mod stats;
pub mod validator;
pub mod worker;

pub use db::{Database, FlatRepository};
pub use fetcher::{FetchConfig, Fetcher};
pub use geo::{Address, AddressMapper, Locator};
pub use pipeline::{Keep, Pipeline};
pub use source::{Offer, SourceConfig, SourceParser};
pub use stats::Tally;
pub use worker::{CleanupWorker, ScrapeWorker, Worker};

pub type Result<T> = std::result::Result<T, FlatmineError>;

#[derive(Debug, thiserror::Error)]
pub enum FlatmineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("scraping error: {0}")]
    Scraping(String),
    #[error("exchange rates unavailable: {0}")]
    Rates(String),
}

/// Where a listing stands in the geolocation workflow: parsers emit `Raw`
/// coordinates or a free-text address, the geocoder turns that into a
/// provider `Candidate` payload, and the address mapper distils the payload
/// into a canonical `Resolved` breakdown. Only resolved listings are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Location {
    Raw {
        point: Option<(f64, f64)>,
        address: Option<String>,
    },
    Candidate(serde_json::Value),
    Resolved(geo::Address),
}

impl Location {
    pub fn from_point(lon: f64, lat: f64) -> Self {
        Location::Raw {
            point: Some((lon, lat)),
            address: None,
        }
    }

    pub fn from_address(address: impl Into<String>) -> Self {
        Location::Raw {
            point: None,
            address: Some(address.into()),
        }
    }

    /// Best known coordinate pair, `(lon, lat)`.
    pub fn point(&self) -> Option<(f64, f64)> {
        match self {
            Location::Raw { point, .. } => *point,
            Location::Candidate(_) => None,
            Location::Resolved(address) => Some(address.point),
        }
    }

    pub fn resolved(&self) -> Option<&geo::Address> {
        match self {
            Location::Resolved(address) => Some(address),
            _ => None,
        }
    }
}

/// Canonical normalized listing, mutable until persisted. One `Flat` is
/// owned by exactly one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flat {
    pub url: String,
    pub avatar: Option<String>,
    pub published: Option<NaiveDate>,
    pub location: Location,
    pub price: Option<Decimal>,
    pub rate: Option<Decimal>,
    pub currency: String,
    pub area: Option<f64>,
    pub living_area: Option<f64>,
    pub kitchen_area: Option<f64>,
    pub rooms: Option<i64>,
    pub floor: Option<i64>,
    pub total_floor: Option<i64>,
    pub ceiling_height: Option<f64>,
    pub details: Vec<String>,
}

impl Flat {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            avatar: None,
            published: None,
            location: Location::Raw {
                point: None,
                address: None,
            },
            price: None,
            rate: None,
            currency: "$".to_string(),
            area: None,
            living_area: None,
            kitchen_area: None,
            rooms: None,
            floor: None,
            total_floor: None,
            ceiling_height: None,
            details: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_serialization_round_trip() {
        let mut flat = Flat::new("https://example.com/offers/1.html");
        flat.published = NaiveDate::from_ymd_opt(2024, 3, 21);
        flat.location = Location::from_point(30.5234, 50.4501);
        flat.price = Some(Decimal::from(45000));
        flat.area = Some(45.8);
        flat.rooms = Some(2);
        flat.details = vec!["цегла".to_string()];

        let json = serde_json::to_string(&flat).unwrap();
        let back: Flat = serde_json::from_str(&json).unwrap();

        assert_eq!(back.url, flat.url);
        assert_eq!(back.price, flat.price);
        assert_eq!(back.location.point(), Some((30.5234, 50.4501)));
        assert_eq!(back.details, flat.details);
    }

    #[test]
    fn location_point_progression() {
        let raw = Location::from_address("Київ, вул. Хрещатик 1");
        assert_eq!(raw.point(), None);

        let resolved = Location::Resolved(Address {
            point: (30.52, 50.45),
            state: None,
            locality: Some("Київ".to_string()),
            county: None,
            neighbourhood: None,
            road: None,
            house_number: None,
        });
        assert_eq!(resolved.point(), Some((30.52, 50.45)));
        assert!(resolved.resolved().is_some());
    }

    #[test]
    fn error_display() {
        let err = FlatmineError::Rates("no cache and no response".to_string());
        assert!(err.to_string().contains("exchange rates unavailable"));

        let db = FlatmineError::Database(sqlx::Error::RowNotFound);
        assert!(db.to_string().contains("database error"));
    }
}
