//! Geolocation: geocoding calls and provider-payload mapping.
//!
//! [`Locator`] speaks to Nominatim: reverse geocoding when the listing
//! already carries a coordinate pair, forward geocoding (first candidate)
//! when it only carries a free-text address. The provider tolerates very
//! little load, hence a dedicated single-permit fetcher.
//!
//! [`AddressMapper`] distils a raw Nominatim payload into the canonical
//! address breakdown, rejecting results outside the expected territory.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fetcher::{FetchConfig, Fetcher};
use crate::{Location, Result};

const GEOCODING_URL: &str = "https://nominatim.openstreetmap.org/search";
const REVERSING_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const EXPECTED_COUNTRY: &str = "Україна";

/// Canonical resolved address; `point` is `(lon, lat)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub point: (f64, f64),
    pub state: Option<String>,
    pub locality: Option<String>,
    pub county: Option<String>,
    pub neighbourhood: Option<String>,
    pub road: Option<String>,
    pub house_number: Option<String>,
}

pub struct Locator {
    fetcher: Fetcher,
}

impl Locator {
    /// Provider etiquette allows one request at a time, so the locator gets
    /// its own fetcher instead of sharing the source's.
    pub fn nominatim() -> Result<Self> {
        let fetcher = Fetcher::new(FetchConfig {
            limit: 1,
            timeout: Duration::from_millis(4500),
            ..FetchConfig::default()
        })?;
        Ok(Self { fetcher })
    }

    /// Raw point or address into a provider payload; `None` when the
    /// provider has no answer.
    pub async fn locate(&self, location: &Location) -> Option<Value> {
        match location {
            Location::Raw {
                point: Some((lon, lat)),
                ..
            } => self.reverse(*lon, *lat).await,
            Location::Raw {
                point: None,
                address: Some(address),
            } => self.geocode(address).await,
            _ => None,
        }
    }

    async fn geocode(&self, address: &str) -> Option<Value> {
        let url = reqwest::Url::parse_with_params(
            GEOCODING_URL,
            &[
                ("format", "json"),
                ("q", address),
                ("addressdetails", "1"),
                ("limit", "1"),
            ],
        )
        .ok()?;
        let candidates: Vec<Value> = self.fetcher.get_json(url.as_str()).await?;
        candidates.into_iter().next()
    }

    async fn reverse(&self, lon: f64, lat: f64) -> Option<Value> {
        let url = reqwest::Url::parse_with_params(
            REVERSING_URL,
            &[
                ("format", "json"),
                ("lat", lat.to_string().as_str()),
                ("lon", lon.to_string().as_str()),
                ("addressdetails", "1"),
            ],
        )
        .ok()?;
        self.fetcher.get_json(url.as_str()).await
    }
}

pub struct AddressMapper {
    county_pattern: Regex,
}

impl AddressMapper {
    pub fn new() -> Result<Self> {
        Ok(Self {
            county_pattern: Regex::new(r"([\w\-’']+ район)")?,
        })
    }

    /// Provider payload into the canonical breakdown; `None` when the
    /// result lies outside the expected territory or carries no point.
    pub fn map(&self, payload: &Value) -> Option<Address> {
        let address = payload.get("address")?;
        if address.get("country").and_then(Value::as_str) != Some(EXPECTED_COUNTRY) {
            return None;
        }
        Some(Address {
            point: (coordinate(payload.get("lon")?)?, coordinate(payload.get("lat")?)?),
            state: capped(address.get("state"), 30),
            locality: self.locality(address),
            county: self.county(payload, address),
            neighbourhood: capped(address.get("neighbourhood"), 90)
                .or_else(|| capped(address.get("suburb"), 90)),
            road: capped(address.get("road"), 80).or_else(|| capped(address.get("pedestrian"), 80)),
            house_number: capped(address.get("house_number"), 20),
        })
    }

    /// City over town over village; council and district pseudo-localities
    /// are not localities.
    fn locality(&self, address: &Value) -> Option<String> {
        ["city", "town", "village"]
            .iter()
            .filter_map(|key| address.get(*key).and_then(Value::as_str))
            .find(|name| !name.ends_with(" рада") && !name.ends_with(" район"))
            .and_then(|name| fit(name, 40))
    }

    fn county(&self, payload: &Value, address: &Value) -> Option<String> {
        address
            .get("county")
            .and_then(Value::as_str)
            .and_then(|text| self.search_county(text))
            .or_else(|| {
                payload
                    .get("display_name")
                    .and_then(Value::as_str)
                    .and_then(|text| self.search_county(text))
            })
    }

    /// The captured token must start uppercase; lowercase matches are
    /// stray words, not district names.
    fn search_county(&self, text: &str) -> Option<String> {
        let county = self.county_pattern.captures(text)?.get(1)?.as_str();
        county
            .chars()
            .next()
            .filter(|first| first.is_uppercase())
            .and_then(|_| fit(county, 40))
    }
}

fn capped(value: Option<&Value>, max_chars: usize) -> Option<String> {
    value
        .and_then(Value::as_str)
        .and_then(|text| fit(text, max_chars))
}

fn fit(text: &str, max_chars: usize) -> Option<String> {
    (text.chars().count() <= max_chars).then(|| text.to_string())
}

/// Nominatim serializes coordinates as strings; tolerate numbers too.
fn coordinate(value: &Value) -> Option<f64> {
    value
        .as_str()
        .and_then(|text| text.parse().ok())
        .or_else(|| value.as_f64())
}

/// Great-circle distance in meters between two `(lon, lat)` points.
pub fn distance_meters(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat_a, lat_b) = (a.1.to_radians(), b.1.to_radians());
    let d_lat = (b.1 - a.1).to_radians();
    let d_lon = (b.0 - a.0).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}
