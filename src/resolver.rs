// Maps raw catalog labels to stable dimension ids, translating new ones
use crate::model::{
    DimensionId, DimensionIds, DimensionKind, ItemFailure, ListingSummary, StorageError,
    VehicleDetail, ROOT_SCOPE,
};
use crate::normalizer::{capitalize, first_label, normalize_label};
use crate::storage::SqliteStorage;
use crate::translate::TranslationProvider;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const UNKNOWN_LABEL: &str = "Unknown";

pub struct EntityResolver {
    storage: Arc<Mutex<SqliteStorage>>,
    translator: Arc<dyn TranslationProvider>,
}

impl EntityResolver {
    pub fn new(storage: Arc<Mutex<SqliteStorage>>, translator: Arc<dyn TranslationProvider>) -> Self {
        Self { storage, translator }
    }

    /// Returns the id for `raw` within the parent scope, creating the
    /// dimension on first sight. The store lock is not held while the
    /// translator runs.
    pub async fn resolve(
        &self,
        kind: DimensionKind,
        raw: &str,
        parent_id: Option<DimensionId>,
    ) -> Result<DimensionId, StorageError> {
        let name = normalize_label(raw);
        let name = if name.is_empty() { UNKNOWN_LABEL.to_string() } else { name };
        let scope = match (kind.parent(), parent_id) {
            (Some(_), Some(parent)) => parent,
            (Some(parent_kind), None) => {
                warn!("{} '{}' resolved without a {} scope", kind.as_str(), name, parent_kind.as_str());
                ROOT_SCOPE
            }
            // flat kinds are shared across the whole catalog
            (None, _) => ROOT_SCOPE,
        };

        let known = self.storage.lock().await.find_dimension(kind, scope, &name)?;
        if let Some(dimension) = known {
            return Ok(dimension.id);
        }

        let translated = self.translate(kind, &name).await;

        let storage = self.storage.lock().await;
        if let Some(dimension) = storage.find_dimension_pair(kind, scope, &name, &translated)? {
            return Ok(dimension.id);
        }
        let dimension = storage.insert_dimension(kind, scope, &name, &translated)?;
        info!("🆕 {} '{}' -> '{}' (id {})", kind.as_str(), name, dimension.translated, dimension.id);
        Ok(dimension.id)
    }

    /// Never fails: provider errors and empty output fall back to the
    /// capitalized original.
    async fn translate(&self, kind: DimensionKind, name: &str) -> String {
        if name.is_ascii() {
            return capitalize(name);
        }
        match self.translator.translate(name, kind.as_str()).await {
            Ok(text) if !text.trim().is_empty() => capitalize(&normalize_label(&text)),
            Ok(_) => {
                debug!("Empty translation for {} '{}'", kind.as_str(), name);
                capitalize(name)
            }
            Err(e) => {
                warn!("Translation of {} '{}' failed: {}", kind.as_str(), name, e);
                capitalize(name)
            }
        }
    }

    async fn resolve_optional(
        &self,
        kind: DimensionKind,
        raw: Option<String>,
        parent_id: Option<DimensionId>,
    ) -> Result<Option<DimensionId>, StorageError> {
        match raw {
            Some(label) => Ok(Some(self.resolve(kind, &label, parent_id).await?)),
            None => Ok(None),
        }
    }

    /// Resolves every dimension of a listing, walking the
    /// manufacturer > model > series > trim chain top-down.
    pub async fn resolve_all(
        &self,
        summary: &ListingSummary,
        detail: &VehicleDetail,
    ) -> Result<DimensionIds, ItemFailure> {
        let manufacturer_label = first_label([
            summary.manufacturer.as_deref(),
            detail.manufacturer_name.as_deref(),
        ])
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        let manufacturer = self
            .resolve(DimensionKind::Manufacturer, &manufacturer_label, None)
            .await?;

        let model_label = first_label([summary.model_group.as_deref(), detail.model_name.as_deref()])
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        let model = self
            .resolve(DimensionKind::Model, &model_label, Some(manufacturer))
            .await?;

        let series_label = first_label([summary.model.as_deref(), detail.grade_name.as_deref()])
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
        let series = self
            .resolve(DimensionKind::Series, &series_label, Some(model))
            .await?;

        let trim = self
            .resolve_optional(
                DimensionKind::Trim,
                first_label([summary.badge.as_deref()]),
                Some(series),
            )
            .await?;
        let engine_type = self
            .resolve_optional(
                DimensionKind::EngineType,
                first_label([summary.fuel_type.as_deref(), detail.fuel_name.as_deref()]),
                None,
            )
            .await?;
        let drive_type = self
            .resolve_optional(
                DimensionKind::DriveType,
                first_label([summary.transmission.as_deref()]),
                None,
            )
            .await?;
        let color = self
            .resolve_optional(
                DimensionKind::Color,
                first_label([summary.color.as_deref(), detail.color_name.as_deref()]),
                None,
            )
            .await?;

        Ok(DimensionIds {
            manufacturer,
            model,
            series,
            trim,
            engine_type,
            drive_type,
            color,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::TranslationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Dictionary {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TranslationProvider for Dictionary {
        async fn translate(&self, text: &str, _context: &str) -> Result<String, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match text {
                "현대" => Ok("hyundai".into()),
                "아반떼" => Ok("Avante".into()),
                "흰색" => Ok("   ".into()),
                _ => Err(TranslationError::Http("HTTP 500".into())),
            }
        }
    }

    fn resolver() -> (EntityResolver, Arc<Mutex<SqliteStorage>>, Arc<Dictionary>) {
        let storage = Arc::new(Mutex::new(SqliteStorage::in_memory().unwrap()));
        let dictionary = Arc::new(Dictionary {
            calls: AtomicUsize::new(0),
        });
        (
            EntityResolver::new(storage.clone(), dictionary.clone()),
            storage,
            dictionary,
        )
    }

    #[tokio::test]
    async fn same_label_resolves_to_same_id_and_translates_once() {
        let (resolver, storage, dictionary) = resolver();
        let a = resolver.resolve(DimensionKind::Manufacturer, "현대", None).await.unwrap();
        let b = resolver
            .resolve(DimensionKind::Manufacturer, "  현대 ", None)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(dictionary.calls.load(Ordering::SeqCst), 1);

        let stored = storage.lock().await.get_dimension(a).unwrap().unwrap();
        assert_eq!(stored.name, "현대");
        assert_eq!(stored.translated, "Hyundai");
    }

    #[tokio::test]
    async fn provider_failure_keeps_capitalized_original() {
        let (resolver, storage, _) = resolver();
        let id = resolver.resolve(DimensionKind::EngineType, "가솔린", None).await.unwrap();
        let blank = resolver.resolve(DimensionKind::Color, "흰색", None).await.unwrap();

        let storage = storage.lock().await;
        assert_eq!(storage.get_dimension(id).unwrap().unwrap().translated, "가솔린");
        assert_eq!(storage.get_dimension(blank).unwrap().unwrap().translated, "흰색");
    }

    #[tokio::test]
    async fn ascii_labels_skip_the_provider() {
        let (resolver, storage, dictionary) = resolver();
        let id = resolver.resolve(DimensionKind::Series, "gv80", None).await.unwrap();
        assert_eq!(dictionary.calls.load(Ordering::SeqCst), 0);
        assert_eq!(storage.lock().await.get_dimension(id).unwrap().unwrap().translated, "Gv80");
    }

    #[tokio::test]
    async fn flat_kinds_ignore_parent_scope() {
        let (resolver, storage, _) = resolver();
        let plain = resolver.resolve(DimensionKind::Color, "흰색", None).await.unwrap();
        let scoped = resolver.resolve(DimensionKind::Color, "흰색", Some(42)).await.unwrap();
        assert_eq!(plain, scoped);
        assert_eq!(storage.lock().await.get_dimension(scoped).unwrap().unwrap().parent_id, ROOT_SCOPE);

        let model_a = resolver.resolve(DimensionKind::Model, "K5", Some(1)).await.unwrap();
        let model_b = resolver.resolve(DimensionKind::Model, "K5", Some(2)).await.unwrap();
        assert_ne!(model_a, model_b);
    }

    #[tokio::test]
    async fn resolve_all_builds_parent_chain() {
        let (resolver, storage, _) = resolver();
        let summary = ListingSummary {
            id: 1,
            manufacturer: Some("현대".into()),
            model_group: Some("아반떼".into()),
            model: Some("아반떼 (CN7)".into()),
            badge: Some("1.6 Smart".into()),
            fuel_type: None,
            transmission: Some("오토".into()),
            ..Default::default()
        };
        let detail = VehicleDetail {
            vehicle_no: "12가3456".into(),
            fuel_name: Some("가솔린".into()),
            ..Default::default()
        };

        let ids = resolver.resolve_all(&summary, &detail).await.unwrap();
        assert!(ids.engine_type.is_some());
        assert!(ids.color.is_none());

        let storage = storage.lock().await;
        let model = storage.get_dimension(ids.model).unwrap().unwrap();
        let series = storage.get_dimension(ids.series).unwrap().unwrap();
        let trim = storage.get_dimension(ids.trim.unwrap()).unwrap().unwrap();
        assert_eq!(model.parent_id, ids.manufacturer);
        assert_eq!(series.parent_id, ids.model);
        assert_eq!(trim.parent_id, ids.series);
        assert_eq!(trim.translated, "1.6 Smart");
    }

    #[tokio::test]
    async fn missing_manufacturer_becomes_unknown() {
        let (resolver, storage, _) = resolver();
        let ids = resolver
            .resolve_all(
                &ListingSummary {
                    id: 2,
                    ..Default::default()
                },
                &VehicleDetail::default(),
            )
            .await
            .unwrap();
        let manufacturer = storage
            .lock()
            .await
            .get_dimension(ids.manufacturer)
            .unwrap()
            .unwrap();
        assert_eq!(manufacturer.name, "Unknown");
    }
}
