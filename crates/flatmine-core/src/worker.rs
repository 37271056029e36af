//! Worker lifecycle: one tact per invocation.
//!
//! A tact acquires its resources, runs the subsystem-specific `work` and
//! always leaves one row in the statistics trail behind, whether the work
//! finished, failed or was interrupted. Failures are logged and swallowed
//! so a scheduled invocation exits normally and the next one retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::currency::{decimalize, Converter};
use crate::db::{CreateOutcome, Database, FlatRepository, Reconciliation};
use crate::fetcher::{FetchConfig, Fetcher};
use crate::geo::{AddressMapper, Locator};
use crate::pipeline::Pipeline;
use crate::ranger::Ranger;
use crate::source::{SourceConfig, SourceParser};
use crate::stats::{Tally, REAPER_FIELDS, SWEEPER_FIELDS};
use crate::validator::FlatValidator;
use crate::{Flat, Location, Result};

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    fn tally(&self) -> &Arc<Tally>;

    async fn work(&self) -> Result<()>;

    /// One tact: run `work` until it finishes or the process is asked to
    /// stop, then record the statistics row no matter what.
    async fn run(&self) {
        info!(worker = self.name(), "tact started");
        let started = Instant::now();
        tokio::select! {
            outcome = self.work() => {
                if let Err(error) = outcome {
                    error!(worker = self.name(), %error, "tact failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(worker = self.name(), "early termination");
            }
        }
        if let Err(error) = self.tally().write() {
            error!(worker = self.name(), %error, "statistics row not written");
        }
        info!(worker = self.name(), elapsed = ?started.elapsed(), "tact finished");
    }
}

/// Mines one source: pages to offers to stored listings.
pub struct ScrapeWorker {
    name: String,
    config: SourceConfig,
    parser: Arc<dyn SourceParser>,
    fetcher: Arc<Fetcher>,
    repository: FlatRepository,
    locator: Arc<Locator>,
    mapper: Arc<AddressMapper>,
    validator: Arc<FlatValidator>,
    data_dir: PathBuf,
    tally: Arc<Tally>,
}

impl ScrapeWorker {
    pub fn new(
        config: SourceConfig,
        parser: Arc<dyn SourceParser>,
        database: &Database,
        data_dir: &Path,
    ) -> Result<Self> {
        let name = format!("{}-scraper", config.name);
        let fetcher = Arc::new(Fetcher::new(FetchConfig {
            limit: config.fetch_limit,
            timeout: config.timeout,
            ..FetchConfig::default()
        })?);
        let validator = Arc::new(FlatValidator::new(
            config.max_age_days.map(|days| Duration::days(days.into())),
        ));
        let tally = Arc::new(Tally::new(data_dir, &name, REAPER_FIELDS));
        Ok(Self {
            name,
            config,
            parser,
            fetcher,
            repository: FlatRepository::new(database.pool().clone()),
            locator: Arc::new(Locator::nominatim()?),
            mapper: Arc::new(AddressMapper::new()?),
            validator,
            data_dir: data_dir.to_path_buf(),
            tally,
        })
    }
}

#[async_trait]
impl Worker for ScrapeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn tally(&self) -> &Arc<Tally> {
        &self.tally
    }

    async fn work(&self) -> Result<()> {
        let converter = Arc::new(Converter::prepare(&self.fetcher, &self.data_dir).await?);
        let ranger = Ranger::new(
            self.fetcher.clone(),
            self.parser.clone(),
            &self.config,
            &self.data_dir,
        );
        let range = ranger.range().await?;

        let template = self.config.page_url;
        let fetcher = self.fetcher.clone();
        let parser = self.parser.clone();
        let locator = self.locator.clone();
        let mapper = self.mapper.clone();
        let validator = self.validator.clone();
        let repository = self.repository.clone();
        let tally = self.tally.clone();

        let pages = {
            let fetcher = fetcher.clone();
            let tally = tally.clone();
            move |index: u32| {
                let fetcher = fetcher.clone();
                let tally = tally.clone();
                async move {
                    match fetcher.get_page(template, index).await {
                        Some(markup) => Ok(Some(markup)),
                        None => {
                            tally.bump("unresponded");
                            Ok(None)
                        }
                    }
                }
            }
        };
        let offers = {
            let fetcher = fetcher.clone();
            let tally = tally.clone();
            move |url: String| {
                let fetcher = fetcher.clone();
                let tally = tally.clone();
                async move {
                    match fetcher.get_offer(url).await {
                        Some(offer) => Ok(Some(offer)),
                        None => {
                            tally.bump("unresponded");
                            Ok(None)
                        }
                    }
                }
            }
        };
        let extract = {
            let parser = parser.clone();
            let tally = tally.clone();
            move |offer| {
                let flat = parser.parse_offer(&offer);
                if flat.is_none() {
                    tally.bump("unparsed");
                }
                flat
            }
        };
        let price_in_dollars = {
            let converter = converter.clone();
            let tally = tally.clone();
            move |mut flat: Flat| {
                let converter = converter.clone();
                let tally = tally.clone();
                async move {
                    let dollars = flat
                        .price
                        .and_then(|price| converter.convert(price, &flat.currency, "$"));
                    match dollars {
                        Some(dollars) => {
                            flat.price = Some(dollars);
                            flat.currency = "$".to_string();
                            Ok(Some(flat))
                        }
                        None => {
                            tally.bump("invalidated");
                            Ok(None)
                        }
                    }
                }
            }
        };
        let rate_and_check = {
            let validator = validator.clone();
            let tally = tally.clone();
            move |mut flat: Flat| {
                if let (Some(price), Some(area)) = (flat.price, flat.area) {
                    flat.rate = Decimal::from_f64_retain(area)
                        .filter(|area| !area.is_zero())
                        .map(|area| decimalize(price / area));
                }
                if validator.validate(&flat) {
                    Some(flat)
                } else {
                    tally.bump("invalidated");
                    None
                }
            }
        };
        let reconcile = {
            let repository = repository.clone();
            let tally = tally.clone();
            move |flat: Flat| {
                let repository = repository.clone();
                let tally = tally.clone();
                async move {
                    match repository.distinct(flat).await? {
                        Reconciliation::Fresh(flat) => Ok(Some(flat)),
                        Reconciliation::Updated => {
                            tally.bump("updated");
                            Ok(None)
                        }
                        Reconciliation::Duplicated => {
                            tally.bump("duplicated");
                            Ok(None)
                        }
                    }
                }
            }
        };
        let locate = {
            let locator = locator.clone();
            let tally = tally.clone();
            move |mut flat: Flat| {
                let locator = locator.clone();
                let tally = tally.clone();
                async move {
                    match locator.locate(&flat.location).await {
                        Some(payload) => {
                            flat.location = Location::Candidate(payload);
                            Ok(Some(flat))
                        }
                        None => {
                            tally.bump("unlocated");
                            Ok(None)
                        }
                    }
                }
            }
        };
        let resolve = {
            let mapper = mapper.clone();
            let tally = tally.clone();
            move |mut flat: Flat| {
                let address = match &flat.location {
                    Location::Candidate(payload) => mapper.map(payload),
                    _ => None,
                };
                match address {
                    Some(address) => {
                        flat.location = Location::Resolved(address);
                        Some(flat)
                    }
                    None => {
                        tally.bump("unlocated");
                        None
                    }
                }
            }
        };
        let store = {
            let repository = repository.clone();
            let tally = tally.clone();
            move |flat: Flat| {
                let repository = repository.clone();
                let tally = tally.clone();
                async move {
                    match repository.create(&flat).await? {
                        CreateOutcome::Inserted => tally.bump("inserted"),
                        CreateOutcome::Duplicated => tally.bump("duplicated"),
                        CreateOutcome::Unresolved => tally.bump("unlocated"),
                    }
                    Ok(())
                }
            }
        };

        Pipeline::new(move || async move { Ok(range.collect::<Vec<u32>>()) })
            .reform(pages)
            .map(move |markup: String| parser.parse_page(&markup))
            .flatten()
            .distinct(|url: &String| url.clone())
            .reform(offers)
            .sieve(extract, |flat: &Flat| {
                flat.price.is_some() && flat.area.is_some()
            })
            .reform(price_in_dollars)
            .sieve(rate_and_check, |_| true)
            .reform(reconcile)
            .reform(locate)
            .sieve(resolve, |flat: &Flat| flat.location.resolved().is_some())
            .apply(store)
            .await?;
        Ok(())
    }
}

/// Retires a source's listings that expired or vanished.
pub struct CleanupWorker {
    name: String,
    config: SourceConfig,
    parser: Arc<dyn SourceParser>,
    fetcher: Arc<Fetcher>,
    repository: FlatRepository,
    tally: Arc<Tally>,
}

impl CleanupWorker {
    pub fn new(
        config: SourceConfig,
        parser: Arc<dyn SourceParser>,
        database: &Database,
        data_dir: &Path,
    ) -> Result<Self> {
        let name = format!("{}-sweeper", config.name);
        let fetcher = Arc::new(Fetcher::new(FetchConfig {
            limit: config.fetch_limit,
            timeout: config.timeout,
            ..FetchConfig::default()
        })?);
        let tally = Arc::new(Tally::new(data_dir, &name, SWEEPER_FIELDS));
        Ok(Self {
            name,
            config,
            parser,
            fetcher,
            repository: FlatRepository::new(database.pool().clone()),
            tally,
        })
    }
}

#[async_trait]
impl Worker for CleanupWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn tally(&self) -> &Arc<Tally> {
        &self.tally
    }

    async fn work(&self) -> Result<()> {
        if let Some(days) = self.config.max_age_days {
            let expired = self
                .repository
                .delete_expired(Duration::days(days.into()))
                .await?;
            self.tally.add("deleted", expired);
        }

        let fetcher = self.fetcher.clone();
        let parser = self.parser.clone();
        let (deleted, unresponded) = self
            .repository
            .delete_junk(self.config.url_prefix, move |url| {
                let fetcher = fetcher.clone();
                let parser = parser.clone();
                async move {
                    let markup = fetcher.get_text(&url).await?;
                    Some(parser.is_gone(&markup))
                }
            })
            .await?;
        self.tally.add("deleted", deleted);
        self.tally.add("unresponded", unresponded);
        Ok(())
    }
}
