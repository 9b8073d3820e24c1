//! Query orchestration for product search.
//!
//! Turns a text prompt, an image, or an existing item id into a ranked,
//! deduplicated hit list:
//!
//! - `search_text`: embed → query a widened candidate pool → optional rerank → trim
//! - `probe`: URL/upload/base64 image probes and the threshold decision
//! - `similar`: "more like this" from a stored item

mod probe;
mod similar;

pub use probe::{ImageBackend, ImageSearch, ImageSource, ProbeOutcome, DEFAULT_SIMILARITY_THRESHOLD};
pub use similar::Modality;

use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    app::AppError,
    catalog::{FilterPredicate, SearchHit},
    providers::{IndexClient, ProviderError, Reranker, Reranking, TextEmbedder},
};

/// Result count used when a text search asks for none.
pub const DEFAULT_TEXT_TOP_K: usize = 12;

/// Lower bound on candidates fetched before reranking and trimming.
pub const MIN_CANDIDATE_POOL: usize = 10;

/// A text search request after transport-level parsing.
#[derive(Debug, Clone, Default)]
pub struct TextQuery {
    pub prompt: String,
    pub top_k: usize,
    pub filter: Option<FilterPredicate>,
    /// Overrides the configured reranking default when set.
    pub use_reranker: Option<bool>,
}

/// Request-scoped orchestration over long-lived provider handles.
pub struct SearchService {
    text_embedder: Arc<dyn TextEmbedder>,
    text_index: Arc<dyn IndexClient>,
    image: ImageSearch,
    reranking: Reranking,
    rerank_by_default: bool,
}

impl SearchService {
    pub fn new(
        text_embedder: Arc<dyn TextEmbedder>,
        text_index: Arc<dyn IndexClient>,
        image: ImageSearch,
        reranking: Reranking,
        rerank_by_default: bool,
    ) -> Self {
        Self {
            text_embedder,
            text_index,
            image,
            reranking,
            rerank_by_default,
        }
    }

    /// Semantic text search.
    ///
    /// Fetches at least `MIN_CANDIDATE_POOL` candidates so reranking can
    /// reorder within a wider pool, then trims to `top_k`.
    pub fn search_text(&self, query: &TextQuery) -> Result<Vec<SearchHit>, AppError> {
        let top_k = if query.top_k == 0 {
            DEFAULT_TEXT_TOP_K
        } else {
            query.top_k
        };

        let vector = self.text_embedder.embed_text(&query.prompt)?;
        let pool = top_k.max(MIN_CANDIDATE_POOL);
        let candidates = dedupe_by_id(self.text_index.query(&vector, pool, query.filter.as_ref())?);

        let wants_rerank = query.use_reranker.unwrap_or(self.rerank_by_default);
        let mut hits = match &self.reranking {
            Reranking::Enabled(reranker) if wants_rerank => {
                rerank_hits(reranker.as_ref(), &query.prompt, candidates)?
            }
            Reranking::Enabled(_) => candidates,
            Reranking::Disabled => {
                if wants_rerank {
                    log::debug!("reranking requested but no reranker is loaded");
                }
                candidates
            }
        };

        hits.truncate(top_k);
        log::debug!("text search returned {} hits (pool {pool})", hits.len());
        Ok(hits)
    }
}

/// Reorder `hits` by cross-encoder relevance of their titles, best first.
///
/// Index scores are kept as-is. Ties keep index order.
pub fn rerank_hits(
    reranker: &dyn Reranker,
    query: &str,
    hits: Vec<SearchHit>,
) -> Result<Vec<SearchHit>, ProviderError> {
    if hits.is_empty() {
        return Ok(hits);
    }

    let titles: Vec<&str> = hits.iter().map(SearchHit::title).collect();
    let scores = reranker.score(query, &titles)?;
    if scores.len() != hits.len() {
        return Err(ProviderError::Rerank(format!(
            "reranker returned {} scores for {} candidates",
            scores.len(),
            hits.len()
        )));
    }

    let mut scored: Vec<(f32, SearchHit)> = scores.into_iter().zip(hits).collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    Ok(scored.into_iter().map(|(_, hit)| hit).collect())
}

/// Keep the first occurrence of every id.
pub fn dedupe_by_id(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.id.clone()))
        .collect()
}
