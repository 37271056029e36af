//! DOM.RIA listing parser.
//!
//! Offer pages ship their data as a `window.__INITIAL_STATE__` JSON blob,
//! so extraction is mostly a matter of walking that payload.

use chrono::NaiveDate;
use flatmine_core::{Flat, FlatmineError, Location, Offer, Result, SourceParser};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

const BASE_URL: &str = "https://dom.ria.com/";
const PHOTO_CDN: &str = "https://cdn.riastatic.com/photos/";

pub struct DomRiaParser {
    catalog_link: Selector,
    state_pattern: Regex,
    page_count_pattern: Regex,
}

fn number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|text| text.parse().ok()))
}

fn integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|text| text.parse().ok()))
}

impl DomRiaParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            catalog_link: Selector::parse("a.realtyPhoto")
                .map_err(|e| FlatmineError::Scraping(e.to_string()))?,
            state_pattern: Regex::new(r"window\.__INITIAL_STATE__\s*=\s*(\{.*\});")?,
            page_count_pattern: Regex::new(r#""pageCount"\s*:\s*(\d+)"#)?,
        })
    }

    fn initial_state(&self, markup: &str) -> Option<Value> {
        let captures = self.state_pattern.captures(markup)?;
        serde_json::from_str(&captures[1]).ok()
    }

    fn location(realty: &Value) -> Location {
        let point = realty
            .get("longitude")
            .and_then(number)
            .zip(realty.get("latitude").and_then(number));
        if let Some((lon, lat)) = point {
            return Location::from_point(lon, lat);
        }
        let written: Vec<&str> = ["city_name_uk", "street_name_uk", "building_number_str"]
            .iter()
            .filter_map(|key| realty.get(*key).and_then(Value::as_str))
            .collect();
        if written.is_empty() {
            Location::Raw {
                point: None,
                address: None,
            }
        } else {
            Location::from_address(written.join(", "))
        }
    }
}

impl SourceParser for DomRiaParser {
    fn parse_stop(&self, markup: &str) -> Option<u32> {
        self.page_count_pattern
            .captures(markup)
            .and_then(|captures| captures[1].parse().ok())
    }

    fn parse_page(&self, markup: &str) -> Vec<String> {
        let document = Html::parse_document(markup);
        let base = match Url::parse(BASE_URL) {
            Ok(base) => base,
            Err(_) => return Vec::new(),
        };
        document
            .select(&self.catalog_link)
            .filter_map(|link| link.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(String::from)
            .collect()
    }

    fn parse_offer(&self, offer: &Offer) -> Option<Flat> {
        let Some(state) = self.initial_state(&offer.markup) else {
            debug!(url = %offer.url, "offer page carries no state blob");
            return None;
        };
        let realty = state.pointer("/dataForFinalPage/realty")?;
        let mut flat = Flat::new(offer.url.clone());

        let price = realty
            .get("price")
            .and_then(number)
            .and_then(Decimal::from_f64_retain)?;
        flat.price = Some(price);
        flat.currency = realty
            .get("currency_type")
            .and_then(Value::as_str)
            .unwrap_or("$")
            .to_string();
        flat.area = realty.get("total_square_meters").and_then(number);
        flat.living_area = realty.get("living_square_meters").and_then(number);
        flat.kitchen_area = realty.get("kitchen_square_meters").and_then(number);
        flat.rooms = realty.get("rooms_count").and_then(integer);
        flat.floor = realty.get("floor").and_then(integer);
        flat.total_floor = realty.get("floors_count").and_then(integer);
        flat.published = realty
            .get("publishing_date")
            .and_then(Value::as_str)
            .and_then(|stamp| NaiveDate::parse_from_str(stamp.get(..10)?, "%Y-%m-%d").ok());
        flat.avatar = realty
            .get("main_photo")
            .and_then(Value::as_str)
            .map(|path| format!("{PHOTO_CDN}{path}"));
        for key in ["wall_type_uk", "heating_uk"] {
            if let Some(value) = realty.get(key).and_then(Value::as_str) {
                flat.details.push(value.to_string());
            }
        }
        flat.location = Self::location(realty);

        Some(flat)
    }

    fn is_gone(&self, markup: &str) -> bool {
        if markup.contains("Оголошення знято з публікації") {
            return true;
        }
        self.initial_state(markup)
            .and_then(|state| {
                state
                    .pointer("/dataForFinalPage/realty/is_archived")
                    .map(|flag| flag.as_bool() == Some(true) || flag.as_i64() == Some(1))
            })
            .unwrap_or(false)
    }
}
