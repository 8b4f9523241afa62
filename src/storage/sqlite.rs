use crate::model::{DimensionIds, Listing, ListingId, StorageError, WriteOutcome};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;

pub struct SqliteStorage {
    pub(crate) conn: Connection,
}

pub(crate) const LISTING_COLUMNS: &str = "external_id, manufacturer_id, model_id, series_id, trim_id,
    engine_type_id, drive_type_id, color_id, mileage, price_source, price_converted,
    release_date, published_at, verified_at, ownership_changes, accidents_total,
    accidents_own, accidents_other, repair_cost_own, repair_cost_other,
    theft, flood, total_loss, url, category, created_at";

impl SqliteStorage {
    /// Opens the database file and brings the schema up to date.
    pub fn new(db_path: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS listings (
                external_id INTEGER PRIMARY KEY,
                manufacturer_id INTEGER NOT NULL REFERENCES dimensions(id),
                model_id INTEGER NOT NULL REFERENCES dimensions(id),
                series_id INTEGER NOT NULL REFERENCES dimensions(id),
                trim_id INTEGER REFERENCES dimensions(id),
                engine_type_id INTEGER REFERENCES dimensions(id),
                drive_type_id INTEGER REFERENCES dimensions(id),
                color_id INTEGER REFERENCES dimensions(id),
                mileage INTEGER,
                price_source INTEGER NOT NULL,
                price_converted INTEGER,
                release_date TEXT,
                published_at TEXT,
                verified_at TEXT,
                ownership_changes INTEGER,
                accidents_total INTEGER,
                accidents_own INTEGER,
                accidents_other INTEGER,
                repair_cost_own REAL,
                repair_cost_other REAL,
                theft INTEGER NOT NULL DEFAULT 0,
                flood INTEGER NOT NULL DEFAULT 0,
                total_loss INTEGER NOT NULL DEFAULT 0,
                url TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dimensions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                parent_id INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                translated TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (kind, parent_id, name)
            );

            CREATE TABLE IF NOT EXISTS filters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                manufacturer_id INTEGER,
                model_id INTEGER,
                series_id INTEGER,
                trim_id INTEGER,
                engine_type_id INTEGER,
                drive_type_id INTEGER,
                color_id INTEGER,
                mileage_from INTEGER,
                mileage_to INTEGER,
                price_from INTEGER,
                price_to INTEGER,
                release_from TEXT,
                release_to TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS viewed_listings (
                user_id INTEGER NOT NULL,
                filter_id INTEGER NOT NULL,
                listing_id INTEGER NOT NULL,
                viewed_at TEXT NOT NULL,
                PRIMARY KEY (user_id, filter_id, listing_id)
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id INTEGER PRIMARY KEY,
                expires_at TEXT NOT NULL,
                filter_quota INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_listings_created ON listings(created_at);
            CREATE INDEX IF NOT EXISTS idx_filters_user ON filters(user_id);
            ",
        )?;

        Ok(Self { conn })
    }

    pub fn listing_exists(&self, id: ListingId) -> Result<bool, StorageError> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM listings WHERE external_id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        Ok(rows.next()?.is_some())
    }

    /// Returns the subset of `ids` already in the catalog.
    pub fn existing_ids(&self, ids: &[ListingId]) -> Result<HashSet<ListingId>, StorageError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT external_id FROM listings WHERE external_id IN ({})",
            placeholders
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let found = stmt
            .query_map(params_from_iter(ids.iter()), |row| row.get::<_, ListingId>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(found)
    }

    /// Appends a listing; an existing external id is left untouched.
    pub fn insert_listing(&self, listing: &Listing) -> Result<WriteOutcome, StorageError> {
        let d = &listing.dimensions;
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO listings ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
                 ON CONFLICT(external_id) DO NOTHING",
                LISTING_COLUMNS
            ),
            params![
                listing.external_id,
                d.manufacturer,
                d.model,
                d.series,
                d.trim,
                d.engine_type,
                d.drive_type,
                d.color,
                listing.mileage,
                listing.price_source,
                listing.price_converted,
                listing.release_date,
                listing.published_at,
                listing.verified_at,
                listing.ownership_changes,
                listing.accidents_total,
                listing.accidents_own,
                listing.accidents_other,
                listing.repair_cost_own,
                listing.repair_cost_other,
                listing.theft,
                listing.flood,
                listing.total_loss,
                listing.url,
                listing.category,
                listing.created_at,
            ],
        )?;
        Ok(if changed == 1 {
            WriteOutcome::Inserted
        } else {
            WriteOutcome::AlreadyPresent
        })
    }

    pub fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, StorageError> {
        let sql = format!("SELECT {} FROM listings WHERE external_id = ?1", LISTING_COLUMNS);
        let listing = self
            .conn
            .query_row(&sql, params![id], Self::map_listing)
            .optional()?;
        Ok(listing)
    }

    pub fn count_listings(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?)
    }

    pub fn get_all_listings(&self) -> Result<Vec<Listing>, StorageError> {
        let sql = format!("SELECT {} FROM listings ORDER BY external_id", LISTING_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let listings = stmt
            .query_map([], Self::map_listing)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings)
    }

    /// Maps a row selected with `LISTING_COLUMNS` into a `Listing`.
    pub(crate) fn map_listing(row: &Row) -> Result<Listing, rusqlite::Error> {
        Ok(Listing {
            external_id: row.get("external_id")?,
            dimensions: DimensionIds {
                manufacturer: row.get("manufacturer_id")?,
                model: row.get("model_id")?,
                series: row.get("series_id")?,
                trim: row.get("trim_id")?,
                engine_type: row.get("engine_type_id")?,
                drive_type: row.get("drive_type_id")?,
                color: row.get("color_id")?,
            },
            mileage: row.get("mileage")?,
            price_source: row.get("price_source")?,
            price_converted: row.get("price_converted")?,
            release_date: row.get("release_date")?,
            published_at: row.get("published_at")?,
            verified_at: row.get("verified_at")?,
            ownership_changes: row.get("ownership_changes")?,
            accidents_total: row.get("accidents_total")?,
            accidents_own: row.get("accidents_own")?,
            accidents_other: row.get("accidents_other")?,
            repair_cost_own: row.get("repair_cost_own")?,
            repair_cost_other: row.get("repair_cost_other")?,
            theft: row.get("theft")?,
            flood: row.get("flood")?,
            total_loss: row.get("total_loss")?,
            url: row.get("url")?,
            category: row.get("category")?,
            created_at: row.get("created_at")?,
        })
    }
}
