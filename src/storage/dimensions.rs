use super::SqliteStorage;
use crate::model::{Dimension, DimensionId, DimensionIds, DimensionKind, StorageError};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

const DIMENSION_COLUMNS: &str = "id, kind, parent_id, name, translated";

impl SqliteStorage {
    /// Looks up a dimension by its normalized original label within a scope.
    pub fn find_dimension(
        &self,
        kind: DimensionKind,
        parent_id: DimensionId,
        name: &str,
    ) -> Result<Option<Dimension>, StorageError> {
        let sql = format!(
            "SELECT {} FROM dimensions WHERE kind = ?1 AND parent_id = ?2 AND name = ?3",
            DIMENSION_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![kind.as_str(), parent_id, name], map_dimension)
            .optional()?)
    }

    /// Looks up by the (original, translated) pair within a scope.
    pub fn find_dimension_pair(
        &self,
        kind: DimensionKind,
        parent_id: DimensionId,
        name: &str,
        translated: &str,
    ) -> Result<Option<Dimension>, StorageError> {
        let sql = format!(
            "SELECT {} FROM dimensions
             WHERE kind = ?1 AND parent_id = ?2 AND name = ?3 AND translated = ?4",
            DIMENSION_COLUMNS
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                params![kind.as_str(), parent_id, name, translated],
                map_dimension,
            )
            .optional()?)
    }

    /// Inserts a dimension unless the scope already holds this label, then
    /// returns whichever row owns the label.
    pub fn insert_dimension(
        &self,
        kind: DimensionKind,
        parent_id: DimensionId,
        name: &str,
        translated: &str,
    ) -> Result<Dimension, StorageError> {
        self.conn.execute(
            "INSERT INTO dimensions (kind, parent_id, name, translated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kind, parent_id, name) DO NOTHING",
            params![kind.as_str(), parent_id, name, translated, Utc::now()],
        )?;
        self.find_dimension(kind, parent_id, name)?
            .ok_or(StorageError::NotFound)
    }

    pub fn get_dimension(&self, id: DimensionId) -> Result<Option<Dimension>, StorageError> {
        let sql = format!("SELECT {} FROM dimensions WHERE id = ?1", DIMENSION_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], map_dimension).optional()?)
    }

    /// Human-readable title built from the translated vehicle chain.
    pub fn listing_title(&self, ids: &DimensionIds) -> Result<String, StorageError> {
        let chain = [Some(ids.manufacturer), Some(ids.model), Some(ids.series), ids.trim];
        let mut parts = Vec::with_capacity(chain.len());
        for id in chain.into_iter().flatten() {
            if let Some(dimension) = self.get_dimension(id)? {
                parts.push(dimension.translated);
            }
        }
        Ok(parts.join(" "))
    }

    pub fn dimensions_of_kind(&self, kind: DimensionKind) -> Result<Vec<Dimension>, StorageError> {
        let sql = format!(
            "SELECT {} FROM dimensions WHERE kind = ?1 ORDER BY id",
            DIMENSION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![kind.as_str()], map_dimension)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_dimension(row: &Row) -> Result<Dimension, rusqlite::Error> {
    let kind_str: String = row.get(1)?;
    let kind = DimensionKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown dimension kind '{}'", kind_str).into(),
        )
    })?;
    Ok(Dimension {
        id: row.get(0)?,
        kind,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        translated: row.get(4)?,
    })
}
