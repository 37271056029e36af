//! Site-specific configurations and parsers, plus the worker registry.
//!
//! The orchestration in `flatmine-core` is generic; everything that knows
//! one site's markup lives here.

pub mod domria;
pub mod olx;

pub use domria::DomRiaParser;
pub use olx::OlxParser;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flatmine_core::{
    CleanupWorker, Database, Result, ScrapeWorker, SourceConfig, Worker,
};

pub fn olx_config() -> SourceConfig {
    SourceConfig {
        name: "olx",
        page_url: "https://www.olx.ua/uk/nedvizhimost/kvartiry/prodazha-kvartir/?page={}",
        stop_url: "https://www.olx.ua/uk/nedvizhimost/kvartiry/prodazha-kvartir/",
        url_prefix: "https://www.olx.ua/",
        fetch_limit: 80,
        timeout: Duration::from_secs(10),
        step: 5,
        max_age_days: Some(210),
    }
}

pub fn domria_config() -> SourceConfig {
    SourceConfig {
        name: "domria",
        page_url: "https://dom.ria.com/uk/prodazha-kvartir/?page={}",
        stop_url: "https://dom.ria.com/uk/prodazha-kvartir/",
        url_prefix: "https://dom.ria.com/",
        fetch_limit: 190,
        timeout: Duration::from_secs(13),
        step: 15,
        max_age_days: Some(210),
    }
}

pub const WORKER_NAMES: &[&str] = &[
    "olx-scraper",
    "olx-sweeper",
    "domria-scraper",
    "domria-sweeper",
];

/// Builds the named worker, or `None` for a name the registry does not
/// carry.
pub fn worker(
    name: &str,
    database: &Database,
    data_dir: &Path,
) -> Result<Option<Box<dyn Worker>>> {
    let worker: Box<dyn Worker> = match name {
        "olx-scraper" => Box::new(ScrapeWorker::new(
            olx_config(),
            Arc::new(OlxParser::new()?),
            database,
            data_dir,
        )?),
        "olx-sweeper" => Box::new(CleanupWorker::new(
            olx_config(),
            Arc::new(OlxParser::new()?),
            database,
            data_dir,
        )?),
        "domria-scraper" => Box::new(ScrapeWorker::new(
            domria_config(),
            Arc::new(DomRiaParser::new()?),
            database,
            data_dir,
        )?),
        "domria-sweeper" => Box::new(CleanupWorker::new(
            domria_config(),
            Arc::new(DomRiaParser::new()?),
            database,
            data_dir,
        )?),
        _ => return Ok(None),
    };
    Ok(Some(worker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_knows_every_advertised_name() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("flats.db")).await.unwrap();
        for name in WORKER_NAMES {
            let worker = worker(name, &db, dir.path()).unwrap();
            assert!(worker.is_some(), "{name} missing from the registry");
            assert_eq!(worker.unwrap().name(), *name);
        }
        assert!(worker("tarot-reader", &db, dir.path()).unwrap().is_none());
    }
}
