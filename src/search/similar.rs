use serde::Deserialize;
use serde_json::Value;

use super::{dedupe_by_id, SearchService};
use crate::{
    app::AppError,
    catalog::{value_text, Metadata, SearchHit},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    #[default]
    Text,
    Image,
}

/// Query text for "more like this": title, brand and categories joined by
/// " | ", or the bare title when that comes out blank.
pub fn composite_query(metadata: &Metadata) -> String {
    let mut parts = vec![
        value_text(metadata.get("title")).unwrap_or_default(),
        value_text(metadata.get("brand")).unwrap_or_default(),
    ];
    if let Some(Value::Array(categories)) = metadata.get("categories") {
        parts.extend(categories.iter().filter_map(|c| value_text(Some(c))));
    }

    let query = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");

    if query.trim().is_empty() {
        value_text(metadata.get("title")).unwrap_or_default()
    } else {
        query
    }
}

impl SearchService {
    /// Items similar to a stored one, never including the item itself.
    ///
    /// Image identity lookups go through the image probe endpoint instead.
    pub fn similar_by_id(
        &self,
        uniq_id: &str,
        modality: Modality,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        if modality == Modality::Image {
            self.image_backend()?;
            return Err(AppError::BadRequest(
                "Use POST /api/similar/image for image probes.".to_string(),
            ));
        }

        let mut fetched = self.text_index.fetch(&[uniq_id])?;
        let metadata = fetched
            .remove(uniq_id)
            .filter(|metadata| !metadata.is_empty())
            .ok_or_else(|| AppError::NotFound("Item not found in text index".to_string()))?;

        let query = composite_query(&metadata);
        log::debug!("similar to {uniq_id}: {query:?}");

        let vector = self.text_embedder.embed_text(&query)?;
        let hits = self.text_index.query(&vector, top_k + 1, None)?;

        Ok(dedupe_by_id(hits)
            .into_iter()
            .filter(|hit| hit.id != uniq_id)
            .take(top_k)
            .collect())
    }
}
