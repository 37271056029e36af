use std::fmt;

use sqlx::sqlite::SqlitePool;

use crate::Result;

#[derive(Clone, Debug)]
pub struct Migration {
    version: i32,
    up: &'static str,
    down: &'static str,
}

impl Migration {
    pub const fn new(version: i32, up: &'static str, down: &'static str) -> Self {
        Self { version, up, down }
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Migration {}", self.version)
    }
}

pub const MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        r#"
        CREATE TABLE IF NOT EXISTS geolocations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            state TEXT,
            locality TEXT,
            county TEXT,
            neighbourhood TEXT,
            road TEXT,
            house_number TEXT,
            lon REAL NOT NULL,
            lat REAL NOT NULL,
            UNIQUE(lon, lat)
        )
        "#,
        "DROP TABLE IF EXISTS geolocations",
    ),
    Migration::new(
        2,
        r#"
        CREATE TABLE IF NOT EXISTS details (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            feature TEXT NOT NULL,
            value TEXT NOT NULL UNIQUE,
            "group" TEXT
        )
        "#,
        "DROP TABLE IF EXISTS details",
    ),
    Migration::new(
        3,
        r#"
        CREATE TABLE IF NOT EXISTS flats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            avatar TEXT,
            published DATE,
            price REAL,
            rate REAL,
            area REAL,
            living_area REAL,
            kitchen_area REAL,
            rooms INTEGER,
            floor INTEGER,
            total_floor INTEGER,
            ceiling_height REAL,
            geolocation_id INTEGER NOT NULL,
            is_visible INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(geolocation_id) REFERENCES geolocations(id),
            UNIQUE(geolocation_id, rooms, floor, total_floor)
        )
        "#,
        "DROP TABLE IF EXISTS flats",
    ),
    Migration::new(
        4,
        r#"
        CREATE TABLE IF NOT EXISTS flats_details (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            flat_id INTEGER NOT NULL,
            detail_id INTEGER NOT NULL,
            FOREIGN KEY(flat_id) REFERENCES flats(id),
            FOREIGN KEY(detail_id) REFERENCES details(id),
            UNIQUE(flat_id, detail_id)
        )
        "#,
        "DROP TABLE IF EXISTS flats_details",
    ),
    Migration::new(
        5,
        r#"
        CREATE TABLE IF NOT EXISTS saved_flats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            flat_id INTEGER NOT NULL,
            FOREIGN KEY(flat_id) REFERENCES flats(id),
            UNIQUE(user_id, flat_id)
        )
        "#,
        "DROP TABLE IF EXISTS saved_flats",
    ),
    Migration::new(
        6,
        "CREATE INDEX idx_flats_published ON flats(published)",
        "DROP INDEX IF EXISTS idx_flats_published",
    ),
    // Detail vocabulary the sources are known to emit; parsed tags outside
    // this list are dropped at persistence time.
    Migration::new(
        7,
        r#"
        INSERT INTO details (feature, value, "group") VALUES
            ('walls', 'цегла', 'construction'),
            ('walls', 'панель', 'construction'),
            ('walls', 'моноліт', 'construction'),
            ('walls', 'піноблок', 'construction'),
            ('walls', 'газоблок', 'construction'),
            ('bathroom', 'суміжний санвузол', 'interior'),
            ('bathroom', 'роздільний санвузол', 'interior'),
            ('bathroom', '2 санвузли', 'interior'),
            ('heating', 'централізоване опалення', 'utilities'),
            ('heating', 'індивідуальне опалення', 'utilities'),
            ('condition', 'євроремонт', 'interior'),
            ('condition', 'житловий стан', 'interior'),
            ('condition', 'без ремонту', 'interior')
        "#,
        "DELETE FROM details",
    ),
];

pub async fn apply_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at DATETIME NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let applied_versions: Vec<i32> =
        sqlx::query_scalar("SELECT version FROM migrations ORDER BY version")
            .fetch_all(pool)
            .await?;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            sqlx::query(migration.up).execute(pool).await?;

            sqlx::query("INSERT INTO migrations (version, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(chrono::Utc::now())
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}

pub async fn rollback_migration(pool: &SqlitePool, version: i32) -> Result<()> {
    let migration = MIGRATIONS
        .iter()
        .find(|m| m.version == version)
        .ok_or_else(|| sqlx::Error::Decode("Migration not found".into()))?;

    sqlx::query(migration.down).execute(pool).await?;

    sqlx::query("DELETE FROM migrations WHERE version = ?")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}
