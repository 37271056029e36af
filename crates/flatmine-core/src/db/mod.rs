//! SQLite storage: schema migrations and the reconciling repository.

pub mod migrations;

pub use migrations::{apply_migrations, rollback_migration};

use std::future::Future;
use std::path::Path;
use std::str::FromStr;

use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tracing::{info, warn};

use crate::geo::distance_meters;
use crate::{Flat, Result};

/// One stored record may differ in area by this much and still be the same
/// physical unit.
const AREA_TOLERANCE: f64 = 1.5;
/// Geocoding jitter allowance when matching by attributes, in meters.
const DISTANCE_TOLERANCE_M: f64 = 4500.0;
/// Bulk sweeps page and delete this many rows per transaction.
const SWEEP_PORTION: i64 = 200;

#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database file and brings the schema
    /// up to date.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite:{}",
            db_path.as_ref().display()
        ))?
        .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        apply_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// How an incoming listing reconciled against storage.
#[derive(Debug)]
pub enum Reconciliation {
    /// No stored counterpart; carry on towards `create`.
    Fresh(Flat),
    /// Cheaper than its stored counterpart, which was overwritten.
    Updated,
    /// Same unit at the same or a higher price; storage untouched.
    Duplicated,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Inserted,
    Duplicated,
    /// The listing arrived without a resolved geolocation; nothing stored.
    Unresolved,
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    id: i64,
    url: String,
    price: Option<f64>,
    lon: f64,
    lat: f64,
}

#[derive(Clone)]
pub struct FlatRepository {
    pool: SqlitePool,
}

impl FlatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored counterpart of a listing: exact URL, or the same
    /// rooms/floor/total-floor layout within the area tolerance and within
    /// geocoding jitter of the same point. The URL alternative stands on
    /// its own; a listing that never got a point can only match by URL.
    async fn find_match(&self, flat: &Flat) -> Result<Option<MatchRow>> {
        let Some(point) = flat.location.point() else {
            let row = sqlx::query_as::<_, MatchRow>(
                "SELECT f.id, f.url, f.price, g.lon, g.lat
                 FROM flats f JOIN geolocations g ON g.id = f.geolocation_id
                 WHERE f.url = ?",
            )
            .bind(&flat.url)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(row);
        };
        let candidates = sqlx::query_as::<_, MatchRow>(
            "SELECT f.id, f.url, f.price, g.lon, g.lat
             FROM flats f JOIN geolocations g ON g.id = f.geolocation_id
             WHERE f.url = ?1
                OR (f.rooms = ?2 AND f.floor = ?3 AND f.total_floor = ?4
                    AND abs(f.area - ?5) <= ?6)",
        )
        .bind(&flat.url)
        .bind(flat.rooms)
        .bind(flat.floor)
        .bind(flat.total_floor)
        .bind(flat.area)
        .bind(AREA_TOLERANCE)
        .fetch_all(&self.pool)
        .await?;
        Ok(candidates.into_iter().find(|row| {
            row.url == flat.url
                || distance_meters((row.lon, row.lat), point) <= DISTANCE_TOLERANCE_M
        }))
    }

    /// Pipeline pre-check: a listing with no stored counterpart passes
    /// through untouched; otherwise the lower price wins in place.
    pub async fn distinct(&self, flat: Flat) -> Result<Reconciliation> {
        let Some(existing) = self.find_match(&flat).await? else {
            return Ok(Reconciliation::Fresh(flat));
        };
        let incoming = flat.price.as_ref().and_then(Decimal::to_f64);
        let cheaper = match (incoming, existing.price) {
            (Some(new), Some(old)) => new < old,
            (Some(_), None) => true,
            _ => false,
        };
        if !cheaper {
            return Ok(Reconciliation::Duplicated);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE flats SET url = ?, avatar = ?, published = ?, price = ?, rate = ?,
                 area = ?, living_area = ?, kitchen_area = ?, ceiling_height = ?
             WHERE id = ?",
        )
        .bind(&flat.url)
        .bind(&flat.avatar)
        .bind(flat.published)
        .bind(incoming)
        .bind(flat.rate.as_ref().and_then(Decimal::to_f64))
        .bind(flat.area)
        .bind(flat.living_area)
        .bind(flat.kitchen_area)
        .bind(flat.ceiling_height)
        .bind(existing.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM flats_details WHERE flat_id = ?")
            .bind(existing.id)
            .execute(&mut *tx)
            .await?;
        link_details(&mut tx, existing.id, &flat.details).await?;
        tx.commit().await?;
        info!(url = %flat.url, "took over a stored listing at a lower price");
        Ok(Reconciliation::Updated)
    }

    /// Stores a resolved listing: geolocation get-or-insert, then the flat
    /// row, then vocabulary-checked detail associations.
    pub async fn create(&self, flat: &Flat) -> Result<CreateOutcome> {
        let Some(address) = flat.location.resolved() else {
            warn!(url = %flat.url, "refusing to store a listing without a resolved address");
            return Ok(CreateOutcome::Unresolved);
        };

        let mut tx = self.pool.begin().await?;
        let insert = sqlx::query(
            "INSERT INTO geolocations
                 (state, locality, county, neighbourhood, road, house_number, lon, lat)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&address.state)
        .bind(&address.locality)
        .bind(&address.county)
        .bind(&address.neighbourhood)
        .bind(&address.road)
        .bind(&address.house_number)
        .bind(address.point.0)
        .bind(address.point.1)
        .execute(&mut *tx)
        .await;
        let geolocation_id = match insert {
            Ok(done) => done.last_insert_rowid(),
            // Lost the insertion race; the point already has a row.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                sqlx::query_scalar("SELECT id FROM geolocations WHERE lon = ? AND lat = ?")
                    .bind(address.point.0)
                    .bind(address.point.1)
                    .fetch_one(&mut *tx)
                    .await?
            }
            Err(source) => return Err(source.into()),
        };

        let inserted = sqlx::query(
            "INSERT INTO flats
                 (url, avatar, published, price, rate, area, living_area, kitchen_area,
                  rooms, floor, total_floor, ceiling_height, geolocation_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&flat.url)
        .bind(&flat.avatar)
        .bind(flat.published)
        .bind(flat.price.as_ref().and_then(Decimal::to_f64))
        .bind(flat.rate.as_ref().and_then(Decimal::to_f64))
        .bind(flat.area)
        .bind(flat.living_area)
        .bind(flat.kitchen_area)
        .bind(flat.rooms)
        .bind(flat.floor)
        .bind(flat.total_floor)
        .bind(flat.ceiling_height)
        .bind(geolocation_id)
        .execute(&mut *tx)
        .await;
        let flat_id = match inserted {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // Someone stored the same unit since the pre-check ran;
                // keep the geolocation row either way.
                tx.commit().await?;
                return Ok(CreateOutcome::Duplicated);
            }
            Err(source) => return Err(source.into()),
        };
        link_details(&mut tx, flat_id, &flat.details).await?;
        tx.commit().await?;
        Ok(CreateOutcome::Inserted)
    }

    /// Batched removal of stale listings nobody saved. Returns the number
    /// of rows gone.
    pub async fn delete_expired(&self, max_age: Duration) -> Result<u64> {
        let threshold = Utc::now().date_naive() - max_age;
        let mut deleted = 0u64;
        let mut last_id = 0i64;
        loop {
            let ids: Vec<i64> = sqlx::query_scalar(
                "SELECT id FROM flats
                 WHERE published < ? AND id > ?
                   AND id NOT IN (SELECT flat_id FROM saved_flats)
                 ORDER BY id LIMIT ?",
            )
            .bind(threshold)
            .bind(last_id)
            .bind(SWEEP_PORTION)
            .fetch_all(&self.pool)
            .await?;
            let Some(tail) = ids.last() else { break };
            last_id = *tail;
            deleted += self.delete_batch(&ids).await?;
        }
        Ok(deleted)
    }

    /// Batched removal of unsaved listings under a URL prefix, each first
    /// confirmed gone by `verifier`. A verifier answer of `None` means the
    /// source did not respond; such rows are kept and counted.
    pub async fn delete_junk<F, Fut>(&self, url_prefix: &str, verifier: F) -> Result<(u64, u64)>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Option<bool>>,
    {
        let pattern = format!("{url_prefix}%");
        let mut deleted = 0u64;
        let mut unresponded = 0u64;
        let mut last_id = 0i64;
        loop {
            let rows: Vec<(i64, String)> = sqlx::query_as(
                "SELECT id, url FROM flats
                 WHERE url LIKE ? AND id > ?
                   AND id NOT IN (SELECT flat_id FROM saved_flats)
                 ORDER BY id LIMIT ?",
            )
            .bind(&pattern)
            .bind(last_id)
            .bind(SWEEP_PORTION)
            .fetch_all(&self.pool)
            .await?;
            let Some((tail, _)) = rows.last() else { break };
            last_id = *tail;

            let mut gone = Vec::new();
            for (id, url) in rows {
                match verifier(url).await {
                    Some(true) => gone.push(id),
                    Some(false) => {}
                    None => unresponded += 1,
                }
            }
            if !gone.is_empty() {
                deleted += self.delete_batch(&gone).await?;
            }
        }
        Ok((deleted, unresponded))
    }

    async fn delete_batch(&self, ids: &[i64]) -> Result<u64> {
        let marks = vec!["?"; ids.len()].join(", ");
        let mut tx = self.pool.begin().await?;
        let associations = format!("DELETE FROM flats_details WHERE flat_id IN ({marks})");
        let mut query = sqlx::query(&associations);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&mut *tx).await?;
        let flats = format!("DELETE FROM flats WHERE id IN ({marks})");
        let mut query = sqlx::query(&flats);
        for id in ids {
            query = query.bind(id);
        }
        let done = query.execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(done.rows_affected())
    }
}

async fn link_details(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    flat_id: i64,
    details: &[String],
) -> Result<()> {
    for value in details {
        let detail_id: Option<i64> = sqlx::query_scalar("SELECT id FROM details WHERE value = ?")
            .bind(value)
            .fetch_optional(&mut **tx)
            .await?;
        match detail_id {
            Some(detail_id) => {
                sqlx::query("INSERT OR IGNORE INTO flats_details (flat_id, detail_id) VALUES (?, ?)")
                    .bind(flat_id)
                    .bind(detail_id)
                    .execute(&mut **tx)
                    .await?;
            }
            None => warn!(value, "detail tag missing from the vocabulary, dropped"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Address;
    use crate::Location;
    use rust_decimal_macros::dec;

    async fn database() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("flats.db")).await.unwrap();
        (dir, db)
    }

    fn address(point: (f64, f64)) -> Address {
        Address {
            point,
            state: Some("Київська область".into()),
            locality: Some("Київ".into()),
            county: None,
            neighbourhood: None,
            road: Some("вулиця Хрещатик".into()),
            house_number: None,
        }
    }

    fn listing(url: &str, point: (f64, f64)) -> Flat {
        let mut flat = Flat::new(url);
        flat.price = Some(dec!(50000));
        flat.area = Some(45.8);
        flat.rooms = Some(2);
        flat.floor = Some(6);
        flat.total_floor = Some(9);
        flat.published = Some(Utc::now().date_naive());
        flat.location = Location::Resolved(address(point));
        flat
    }

    async fn flats_count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT count(*) FROM flats")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        let flat = listing("https://example.com/offer/1", (30.5234, 50.4501));

        assert_eq!(repo.create(&flat).await.unwrap(), CreateOutcome::Inserted);
        assert_eq!(repo.create(&flat).await.unwrap(), CreateOutcome::Duplicated);
        assert_eq!(flats_count(&db).await, 1);
    }

    #[tokio::test]
    async fn unresolved_listing_is_not_stored() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        let mut flat = listing("https://example.com/offer/1", (30.5, 50.4));
        flat.location = Location::from_address("Київ, Хрещатик 1");

        assert_eq!(repo.create(&flat).await.unwrap(), CreateOutcome::Unresolved);
        assert_eq!(flats_count(&db).await, 0);
    }

    #[tokio::test]
    async fn lower_priced_lookalike_takes_over() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        let mut stored = listing("https://example.com/offer/1", (30.5234, 50.4501));
        stored.details = vec!["цегла".into()];
        repo.create(&stored).await.unwrap();

        // Same layout, area within tolerance, a street away, cheaper.
        let mut incoming = listing("https://example.com/offer/2", (30.5244, 50.4501));
        incoming.area = Some(45.0);
        incoming.price = Some(dec!(45000));
        incoming.details = vec!["панель".into()];
        assert!(matches!(
            repo.distinct(incoming).await.unwrap(),
            Reconciliation::Updated
        ));

        let (price, url): (f64, String) = sqlx::query_as("SELECT price, url FROM flats")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(price, 45000.0);
        assert_eq!(url, "https://example.com/offer/2");

        let tags: Vec<String> = sqlx::query_scalar(
            "SELECT d.value FROM flats_details fd JOIN details d ON d.id = fd.detail_id",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(tags, vec!["панель".to_string()]);
    }

    #[tokio::test]
    async fn higher_priced_lookalike_changes_nothing() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        repo.create(&listing("https://example.com/offer/1", (30.5234, 50.4501)))
            .await
            .unwrap();

        let mut incoming = listing("https://example.com/offer/2", (30.5244, 50.4501));
        incoming.price = Some(dec!(52000));
        assert!(matches!(
            repo.distinct(incoming).await.unwrap(),
            Reconciliation::Duplicated
        ));

        let price: f64 = sqlx::query_scalar("SELECT price FROM flats")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(price, 50000.0);
    }

    #[tokio::test]
    async fn url_match_needs_no_layout_agreement() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        repo.create(&listing("https://example.com/offer/1", (30.5234, 50.4501)))
            .await
            .unwrap();

        let mut incoming = listing("https://example.com/offer/1", (30.9, 50.9));
        incoming.rooms = Some(3);
        incoming.price = Some(dec!(60000));
        assert!(matches!(
            repo.distinct(incoming).await.unwrap(),
            Reconciliation::Duplicated
        ));
    }

    #[tokio::test]
    async fn distant_lookalike_is_a_different_unit() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        repo.create(&listing("https://example.com/offer/1", (30.5234, 50.4501)))
            .await
            .unwrap();

        // Same layout but ~7 km away.
        let incoming = listing("https://example.com/offer/2", (30.62, 50.4501));
        assert!(matches!(
            repo.distinct(incoming).await.unwrap(),
            Reconciliation::Fresh(_)
        ));
    }

    #[tokio::test]
    async fn one_point_one_geolocation_row() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        repo.create(&listing("https://example.com/offer/1", (30.5234, 50.4501)))
            .await
            .unwrap();
        let mut second = listing("https://example.com/offer/2", (30.5234, 50.4501));
        second.rooms = Some(3);
        repo.create(&second).await.unwrap();

        let geolocations: i64 = sqlx::query_scalar("SELECT count(*) FROM geolocations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(geolocations, 1);
        assert_eq!(flats_count(&db).await, 2);
    }

    #[tokio::test]
    async fn unknown_detail_tags_are_dropped_quietly() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        let mut flat = listing("https://example.com/offer/1", (30.5234, 50.4501));
        flat.details = vec!["цегла".into(), "золотий унітаз".into()];
        assert_eq!(repo.create(&flat).await.unwrap(), CreateOutcome::Inserted);

        let associations: i64 = sqlx::query_scalar("SELECT count(*) FROM flats_details")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(associations, 1);
    }

    #[tokio::test]
    async fn expiry_sweep_spares_saved_listings() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        let mut stale = listing("https://example.com/offer/1", (30.5234, 50.4501));
        stale.published = Some(Utc::now().date_naive() - Duration::days(300));
        repo.create(&stale).await.unwrap();
        let mut saved = listing("https://example.com/offer/2", (30.6, 50.5));
        saved.published = Some(Utc::now().date_naive() - Duration::days(300));
        repo.create(&saved).await.unwrap();

        let saved_id: i64 = sqlx::query_scalar("SELECT id FROM flats WHERE url = ?")
            .bind("https://example.com/offer/2")
            .fetch_one(db.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO saved_flats (user_id, flat_id) VALUES (1, ?)")
            .bind(saved_id)
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(repo.delete_expired(Duration::days(210)).await.unwrap(), 1);
        let survivor: String = sqlx::query_scalar("SELECT url FROM flats")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(survivor, "https://example.com/offer/2");
    }

    #[tokio::test]
    async fn junk_sweep_deletes_only_confirmed_gone() {
        let (_dir, db) = database().await;
        let repo = FlatRepository::new(db.pool().clone());
        for (suffix, lon) in [("gone", 30.51), ("alive", 30.52), ("silent", 30.53)] {
            let flat = listing(&format!("https://example.com/offer/{suffix}"), (lon, 50.4));
            repo.create(&flat).await.unwrap();
        }

        let (deleted, unresponded) = repo
            .delete_junk("https://example.com/", |url: String| async move {
                if url.ends_with("gone") {
                    Some(true)
                } else if url.ends_with("alive") {
                    Some(false)
                } else {
                    None
                }
            })
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(unresponded, 1);
        assert_eq!(flats_count(&db).await, 2);
    }
}
