use super::sqlite::LISTING_COLUMNS;
use super::SqliteStorage;
use crate::model::{
    DeliveryMode, Filter, FilterId, FilterPredicates, FilterUpdate, Listing, StorageError,
    Subscription, UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::{named_params, params, OptionalExtension, Row};

const FILTER_COLUMNS: &str = "id, user_id, manufacturer_id, model_id, series_id, trim_id,
    engine_type_id, drive_type_id, color_id, mileage_from, mileage_to, price_from, price_to,
    release_from, release_to, created_at";

// Unset predicates bind NULL and turn into wildcards.
const MATCH_SQL_WHERE: &str = "
    WHERE (:manufacturer_id IS NULL OR l.manufacturer_id = :manufacturer_id)
      AND (:model_id IS NULL OR l.model_id = :model_id)
      AND (:series_id IS NULL OR l.series_id = :series_id)
      AND (:trim_id IS NULL OR l.trim_id = :trim_id)
      AND (:engine_type_id IS NULL OR l.engine_type_id = :engine_type_id)
      AND (:drive_type_id IS NULL OR l.drive_type_id = :drive_type_id)
      AND (:color_id IS NULL OR l.color_id = :color_id)
      AND (:mileage_from IS NULL OR l.mileage >= :mileage_from)
      AND (:mileage_to IS NULL OR l.mileage <= :mileage_to)
      AND (:price_from IS NULL OR l.price_converted >= :price_from)
      AND (:price_to IS NULL OR l.price_converted <= :price_to)
      AND (:release_from IS NULL OR l.release_date >= :release_from)
      AND (:release_to IS NULL OR l.release_date <= :release_to)
      AND (:created_after IS NULL OR l.created_at > :created_after)
      AND NOT EXISTS (
          SELECT 1 FROM viewed_listings v
          WHERE v.user_id = :user_id AND v.filter_id = :filter_id
            AND v.listing_id = l.external_id
      )
    ORDER BY l.created_at DESC, l.external_id DESC
    LIMIT :limit";

impl SqliteStorage {
    /// Creates a filter if the owner holds an active subscription with free quota.
    pub fn create_filter(
        &self,
        user_id: UserId,
        predicates: &FilterPredicates,
        now: DateTime<Utc>,
    ) -> Result<Filter, StorageError> {
        let subscription = self
            .get_subscription(user_id)?
            .filter(|s| s.expires_at > now)
            .ok_or(StorageError::QuotaExceeded(user_id))?;
        if self.count_filters_by_user(user_id)? >= subscription.filter_quota {
            return Err(StorageError::QuotaExceeded(user_id));
        }

        let p = predicates;
        self.conn.execute(
            "INSERT INTO filters (user_id, manufacturer_id, model_id, series_id, trim_id,
                engine_type_id, drive_type_id, color_id, mileage_from, mileage_to,
                price_from, price_to, release_from, release_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                user_id,
                p.manufacturer_id,
                p.model_id,
                p.series_id,
                p.trim_id,
                p.engine_type_id,
                p.drive_type_id,
                p.color_id,
                p.mileage_from,
                p.mileage_to,
                p.price_from,
                p.price_to,
                p.release_from,
                p.release_to,
                now,
            ],
        )?;

        Ok(Filter {
            id: self.conn.last_insert_rowid(),
            user_id,
            predicates: predicates.clone(),
            created_at: now,
        })
    }

    pub fn get_filter(&self, filter_id: FilterId) -> Result<Option<Filter>, StorageError> {
        let sql = format!("SELECT {} FROM filters WHERE id = ?1", FILTER_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![filter_id], map_filter)
            .optional()?)
    }

    pub fn get_all_filters(&self) -> Result<Vec<Filter>, StorageError> {
        let sql = format!("SELECT {} FROM filters ORDER BY id", FILTER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let filters = stmt
            .query_map([], map_filter)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(filters)
    }

    pub fn get_filters_by_user(&self, user_id: UserId) -> Result<Vec<Filter>, StorageError> {
        let sql = format!(
            "SELECT {} FROM filters WHERE user_id = ?1 ORDER BY id",
            FILTER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let filters = stmt
            .query_map(params![user_id], map_filter)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(filters)
    }

    pub fn count_filters_by_user(&self, user_id: UserId) -> Result<i64, StorageError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM filters WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?)
    }

    /// Applies a typed partial update and returns the stored result.
    pub fn update_filter(
        &self,
        filter_id: FilterId,
        update: &FilterUpdate,
    ) -> Result<Filter, StorageError> {
        let mut filter = self.get_filter(filter_id)?.ok_or(StorageError::NotFound)?;
        update.apply(&mut filter.predicates);

        let p = &filter.predicates;
        self.conn.execute(
            "UPDATE filters SET manufacturer_id = ?2, model_id = ?3, series_id = ?4,
                trim_id = ?5, engine_type_id = ?6, drive_type_id = ?7, color_id = ?8,
                mileage_from = ?9, mileage_to = ?10, price_from = ?11, price_to = ?12,
                release_from = ?13, release_to = ?14
             WHERE id = ?1",
            params![
                filter_id,
                p.manufacturer_id,
                p.model_id,
                p.series_id,
                p.trim_id,
                p.engine_type_id,
                p.drive_type_id,
                p.color_id,
                p.mileage_from,
                p.mileage_to,
                p.price_from,
                p.price_to,
                p.release_from,
                p.release_to,
            ],
        )?;
        Ok(filter)
    }

    pub fn delete_filter(&self, filter_id: FilterId) -> Result<bool, StorageError> {
        let deleted = self
            .conn
            .execute("DELETE FROM filters WHERE id = ?1", params![filter_id])?;
        Ok(deleted > 0)
    }

    /// Selects up to `limit` matching, unviewed listings and marks each one
    /// viewed in the same transaction. Rows whose mark already exists are
    /// dropped from the result.
    pub fn deliver(
        &mut self,
        filter: &Filter,
        mode: DeliveryMode,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Listing>, StorageError> {
        let tx = self.conn.transaction()?;

        let candidates = {
            let sql = format!(
                "SELECT {} FROM listings l {}",
                LISTING_COLUMNS, MATCH_SQL_WHERE
            );
            let created_after = match mode {
                DeliveryMode::Unviewed => None,
                DeliveryMode::NewSinceFilter => Some(filter.created_at),
            };
            let p = &filter.predicates;
            let limit = limit as i64;
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(
                named_params! {
                    ":manufacturer_id": p.manufacturer_id,
                    ":model_id": p.model_id,
                    ":series_id": p.series_id,
                    ":trim_id": p.trim_id,
                    ":engine_type_id": p.engine_type_id,
                    ":drive_type_id": p.drive_type_id,
                    ":color_id": p.color_id,
                    ":mileage_from": p.mileage_from,
                    ":mileage_to": p.mileage_to,
                    ":price_from": p.price_from,
                    ":price_to": p.price_to,
                    ":release_from": p.release_from,
                    ":release_to": p.release_to,
                    ":created_after": created_after,
                    ":user_id": filter.user_id,
                    ":filter_id": filter.id,
                    ":limit": limit,
                },
                SqliteStorage::map_listing,
            )?
            .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut delivered = Vec::with_capacity(candidates.len());
        for listing in candidates {
            let marked = tx.execute(
                "INSERT OR IGNORE INTO viewed_listings (user_id, filter_id, listing_id, viewed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![filter.user_id, filter.id, listing.external_id, now],
            )?;
            if marked == 1 {
                delivered.push(listing);
            }
        }

        tx.commit()?;
        Ok(delivered)
    }

    pub fn is_viewed(
        &self,
        user_id: UserId,
        filter_id: FilterId,
        listing_id: i64,
    ) -> Result<bool, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT 1 FROM viewed_listings WHERE user_id = ?1 AND filter_id = ?2 AND listing_id = ?3",
        )?;
        let mut rows = stmt.query(params![user_id, filter_id, listing_id])?;
        Ok(rows.next()?.is_some())
    }

    pub fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO subscriptions (user_id, expires_at, filter_quota)
             VALUES (?1, ?2, ?3)",
            params![
                subscription.user_id,
                subscription.expires_at,
                subscription.filter_quota,
            ],
        )?;
        Ok(())
    }

    pub fn get_subscription(&self, user_id: UserId) -> Result<Option<Subscription>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT user_id, expires_at, filter_quota FROM subscriptions WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Subscription {
                        user_id: row.get(0)?,
                        expires_at: row.get(1)?,
                        filter_quota: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Subscriptions ending in `(from, until]`, soonest first.
    pub fn expiring_subscriptions(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, expires_at, filter_quota FROM subscriptions
             WHERE expires_at > :from AND expires_at <= :until
             ORDER BY expires_at",
        )?;
        let rows = stmt
            .query_map(named_params! { ":from": from, ":until": until }, |row| {
                Ok(Subscription {
                    user_id: row.get(0)?,
                    expires_at: row.get(1)?,
                    filter_quota: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Drops every filter of users without an active subscription and the
    /// oldest surplus filters of users above their quota. Returns the number
    /// of deleted filters.
    pub fn prune_filters(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let users: Vec<UserId> = {
            let mut stmt = self.conn.prepare("SELECT DISTINCT user_id FROM filters")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            rows
        };

        let mut deleted = 0;
        for user_id in users {
            let active = self.get_subscription(user_id)?.filter(|s| s.expires_at > now);
            deleted += match active {
                None => self
                    .conn
                    .execute("DELETE FROM filters WHERE user_id = ?1", params![user_id])?,
                Some(sub) => {
                    let excess = self.count_filters_by_user(user_id)? - sub.filter_quota.max(0);
                    if excess > 0 {
                        self.conn.execute(
                            "DELETE FROM filters WHERE id IN (
                                SELECT id FROM filters WHERE user_id = ?1 ORDER BY id ASC LIMIT ?2
                             )",
                            params![user_id, excess],
                        )?
                    } else {
                        0
                    }
                }
            };
        }
        Ok(deleted)
    }
}

fn map_filter(row: &Row) -> Result<Filter, rusqlite::Error> {
    Ok(Filter {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        predicates: FilterPredicates {
            manufacturer_id: row.get("manufacturer_id")?,
            model_id: row.get("model_id")?,
            series_id: row.get("series_id")?,
            trim_id: row.get("trim_id")?,
            engine_type_id: row.get("engine_type_id")?,
            drive_type_id: row.get("drive_type_id")?,
            color_id: row.get("color_id")?,
            mileage_from: row.get("mileage_from")?,
            mileage_to: row.get("mileage_to")?,
            price_from: row.get("price_from")?,
            price_to: row.get("price_to")?,
            release_from: row.get("release_from")?,
            release_to: row.get("release_to")?,
        },
        created_at: row.get("created_at")?,
    })
}
