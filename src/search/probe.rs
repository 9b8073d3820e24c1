use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::Serialize;

use super::{dedupe_by_id, SearchService};
use crate::{
    app::AppError,
    catalog::{FilterPredicate, SearchHit},
    images::{self, ImageFetcher, THUMBNAIL_MAX_SIDE},
    providers::{ImageEmbedder, IndexClient},
};

/// Result count used when an image search asks for none.
pub const DEFAULT_IMAGE_TOP_K: usize = 8;

/// Cosine similarity at or above which a probe counts as "found".
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;

/// Everything image search needs. Only built when an image index is configured.
#[derive(Clone)]
pub struct ImageBackend {
    pub embedder: Arc<dyn ImageEmbedder>,
    pub index: Arc<dyn IndexClient>,
    pub fetcher: Arc<dyn ImageFetcher>,
}

/// Image search capability, decided once at startup.
#[derive(Clone)]
pub enum ImageSearch {
    Available(ImageBackend),
    Unavailable,
}

pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
    Base64(String),
}

impl Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Url(url) => write!(f, "Url({url:?})"),
            ImageSource::Bytes(bytes) => write!(f, "Bytes([{} bytes])", bytes.len()),
            ImageSource::Base64(_) => write!(f, "Base64([REDACTED])"),
        }
    }
}

/// Per-stage wall time in milliseconds, rounded to 0.1 ms.
#[derive(Debug, Clone, Serialize)]
pub struct StageTimings {
    pub total: f64,
    pub open_resize: f64,
    pub embed: f64,
    pub pinecone_query: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub found_similar: bool,
    pub threshold: f64,
    pub best_match: Option<SearchHit>,
    pub items: Vec<SearchHit>,
    pub timings_ms: StageTimings,
}

/// True iff there is a best hit and its score reaches `threshold`.
pub fn is_similar(hits: &[SearchHit], threshold: f64) -> bool {
    hits.first().is_some_and(|best| best.score >= threshold)
}

impl SearchService {
    /// The image side, or the client error every image entry point shares.
    pub fn image_backend(&self) -> Result<&ImageBackend, AppError> {
        match &self.image {
            ImageSearch::Available(backend) => Ok(backend),
            ImageSearch::Unavailable => Err(AppError::image_index_unavailable()),
        }
    }

    /// Visual search from a URL, an upload or a base64 payload.
    pub fn search_image(&self, source: ImageSource, top_k: usize) -> Result<Vec<SearchHit>, AppError> {
        let backend = self.image_backend()?;
        let top_k = if top_k == 0 { DEFAULT_IMAGE_TOP_K } else { top_k };

        log::debug!("image search: {source:?}, top_k={top_k}");

        let image = load_probe(backend, source)?;
        let vector = backend.embedder.embed_image(&image)?;

        let mut hits = dedupe_by_id(backend.index.query(&vector, top_k, None)?);
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Visual search with a metadata filter and a similarity verdict.
    ///
    /// `filters` is the raw JSON form field; it must be an object when present.
    pub fn probe_image(
        &self,
        data: &[u8],
        top_k: usize,
        threshold: f64,
        filters: Option<&str>,
    ) -> Result<ProbeOutcome, AppError> {
        let started = Instant::now();
        let backend = self.image_backend()?;
        let top_k = if top_k == 0 { DEFAULT_IMAGE_TOP_K } else { top_k };

        let image = decode_probe(data)?;
        let filter = match filters {
            Some(raw) => FilterPredicate::parse(raw)?,
            None => None,
        };
        let prepared = Instant::now();

        let vector = backend.embedder.embed_image(&image)?;
        let embedded = Instant::now();

        let mut items = dedupe_by_id(backend.index.query(&vector, top_k, filter.as_ref())?);
        items.truncate(top_k);
        let found_similar = is_similar(&items, threshold);
        let finished = Instant::now();

        log::debug!(
            "image probe: {} hits, found_similar={found_similar} at threshold {threshold}",
            items.len()
        );

        Ok(ProbeOutcome {
            found_similar,
            threshold,
            best_match: items.first().cloned(),
            items,
            timings_ms: StageTimings {
                total: millis(started, finished),
                open_resize: millis(started, prepared),
                embed: millis(prepared, embedded),
                pinecone_query: millis(embedded, finished),
            },
        })
    }
}

fn load_probe(backend: &ImageBackend, source: ImageSource) -> Result<DynamicImage, AppError> {
    let bytes = match source {
        ImageSource::Url(raw) => {
            let url = images::parse_image_url(&raw).map_err(AppError::Unprocessable)?;
            backend.fetcher.fetch(&url)?
        }
        ImageSource::Bytes(bytes) => bytes,
        ImageSource::Base64(encoded) => STANDARD.decode(encoded.trim())?,
    };

    decode_probe(&bytes)
}

fn decode_probe(bytes: &[u8]) -> Result<DynamicImage, AppError> {
    images::load_thumbnail(bytes, THUMBNAIL_MAX_SIDE).map_err(|err| {
        log::debug!("probe image rejected: {err}");
        AppError::Unprocessable("Invalid image file.".to_string())
    })
}

fn millis(from: Instant, to: Instant) -> f64 {
    (to.duration_since(from).as_secs_f64() * 10_000.0).round() / 10.0
}
