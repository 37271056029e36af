//! Per-source configuration and the parsing contract.
//!
//! A source is described by one plain value object plus an injected parser
//! pair instead of a per-site class hierarchy; the scraping worker is generic
//! over both.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Flat;

/// Everything the orchestration needs to know about one listing site.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: &'static str,
    /// Result-page URL template with a `{}` pagination-index placeholder.
    pub page_url: &'static str,
    /// Page fetched once per run to discover the current pagination maximum.
    pub stop_url: &'static str,
    /// URL prefix owned by this source, used by the junk sweep.
    pub url_prefix: &'static str,
    pub fetch_limit: usize,
    pub timeout: Duration,
    /// How many result pages one tact advances the cursor by.
    pub step: u32,
    /// Publication-age window enforced by the validator; `None` disables
    /// the rule.
    pub max_age_days: Option<u16>,
}

/// An offer page pulled from the source, markup included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub url: String,
    pub markup: String,
}

/// Site-specific HTML field extraction. Implementations live outside the
/// core: they are pure data mapping, tolerant by contract. A page that
/// cannot be understood yields an absence, never an error.
pub trait SourceParser: Send + Sync {
    /// Last pagination index advertised by the stop page, if discoverable.
    fn parse_stop(&self, markup: &str) -> Option<u32>;

    /// Offer URLs listed on one result page.
    fn parse_page(&self, markup: &str) -> Vec<String>;

    /// Full listing extraction from one offer page.
    fn parse_offer(&self, offer: &Offer) -> Option<Flat>;

    /// Whether the offer page carries the source's "listing closed" marker.
    fn is_gone(&self, markup: &str) -> bool;
}
