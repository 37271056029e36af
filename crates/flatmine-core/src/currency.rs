//! Currency conversion backed by the National Bank of Ukraine daily listing.
//!
//! Rates are quoted in UAH per unit; the converter derives the pairs it
//! needs for pricing listings in dollars and caches the listing on disk so
//! one download covers the whole day across worker runs.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fetcher::Fetcher;
use crate::{FlatmineError, Result};

const RATES_URL: &str = "https://bank.gov.ua/NBUStatService/v1/statdirectory/exchange?json";

#[derive(Debug, Serialize, Deserialize)]
struct QuotedRate {
    cc: String,
    rate: f64,
}

pub struct Converter {
    rates: HashMap<(&'static str, &'static str), Decimal>,
}

impl Converter {
    /// Loads today's listing from the cache file, downloading it first if
    /// this is the day's first run. Fails when no listing can be had at
    /// all; converting with stale rates silently corrupts prices.
    pub async fn prepare(fetcher: &Fetcher, cache_dir: &Path) -> Result<Self> {
        let stamp = Utc::now().format("%Y%m%d");
        let path = cache_dir.join(format!("nbu-rates-{stamp}.json"));
        let listing: Vec<QuotedRate> = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            let listing = fetcher
                .get_json(RATES_URL)
                .await
                .ok_or_else(|| FlatmineError::Rates("rate service is unreachable".into()))?;
            std::fs::write(&path, serde_json::to_string(&listing)?)?;
            debug!(path = %path.display(), "cached today's exchange listing");
            listing
        };
        Self::from_listing(&listing)
    }

    fn from_listing(listing: &[QuotedRate]) -> Result<Self> {
        let quoted = |code: &str| {
            listing
                .iter()
                .find(|rate| rate.cc == code)
                .and_then(|rate| Decimal::from_f64_retain(rate.rate))
                .ok_or_else(|| FlatmineError::Rates(format!("no {code} quote in the listing")))
        };
        Self::from_rates(quoted("USD")?, quoted("EUR")?)
    }

    /// Builds the pair table from UAH-per-unit quotes.
    pub fn from_rates(usd_in_uah: Decimal, eur_in_uah: Decimal) -> Result<Self> {
        if usd_in_uah.is_zero() {
            return Err(FlatmineError::Rates("zero USD quote".into()));
        }
        let mut rates = HashMap::new();
        rates.insert(("UAH", "USD"), decimalize(Decimal::ONE / usd_in_uah));
        rates.insert(("EUR", "USD"), decimalize(eur_in_uah / usd_in_uah));
        Ok(Self { rates })
    }

    /// `None` means the pair is unknown; identity conversions pass the
    /// amount through untouched.
    pub fn convert(&self, amount: Decimal, from: &str, to: &str) -> Option<Decimal> {
        let from = canonical(from)?;
        let to = canonical(to)?;
        if from == to {
            return Some(amount);
        }
        let rate = self.rates.get(&(from, to))?;
        Some(decimalize(amount * rate))
    }
}

/// Listing markup spells currencies as symbols as often as ISO codes.
fn canonical(symbol: &str) -> Option<&'static str> {
    match symbol {
        "грн." | "грн" | "UAH" => Some("UAH"),
        "$" | "USD" => Some("USD"),
        "€" | "EUR" => Some("EUR"),
        _ => None,
    }
}

/// Monetary precision used throughout: three places, banker's rounding.
pub fn decimalize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(3, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn converter() -> Converter {
        Converter::from_rates(dec!(26.619328), dec!(29.608679)).unwrap()
    }

    #[test]
    fn hryvnia_price_lands_in_dollars() {
        let dollars = converter().convert(dec!(200000), "грн.", "$").unwrap();
        assert_eq!(dollars, dec!(7600));
    }

    #[test]
    fn euro_price_lands_in_dollars() {
        let dollars = converter().convert(dec!(1000), "€", "$").unwrap();
        assert_eq!(dollars, dec!(1112));
    }

    #[test]
    fn identity_conversion_is_untouched() {
        let amount = dec!(45000.5);
        assert_eq!(converter().convert(amount, "$", "USD").unwrap(), amount);
    }

    #[test]
    fn unknown_symbol_converts_to_nothing() {
        assert!(converter().convert(dec!(100), "£", "$").is_none());
        assert!(converter().convert(dec!(100), "$", "£").is_none());
    }

    #[test]
    fn reversed_pair_is_not_quoted() {
        assert!(converter().convert(dec!(100), "$", "грн.").is_none());
    }

    #[test]
    fn decimalize_rounds_half_to_even() {
        assert_eq!(decimalize(dec!(1.1125)), dec!(1.112));
        assert_eq!(decimalize(dec!(1.1135)), dec!(1.114));
    }

    #[test]
    fn listing_without_a_quote_is_refused() {
        let listing = [QuotedRate {
            cc: "USD".into(),
            rate: 26.619328,
        }];
        assert!(Converter::from_listing(&listing).is_err());
    }
}
