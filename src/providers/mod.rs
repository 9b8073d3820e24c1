//! Narrow interfaces over the external collaborators the service depends on.
//!
//! Every provider is built once at startup and shared read-only across
//! requests. Implementations:
//!
//! - `embeddings`: fastembed text and image embedding models
//! - `rerank`: fastembed cross-encoder reranker
//! - `pinecone`: Pinecone data-plane client (REST)
//! - `generation`: text-generation server client (REST)

pub mod embeddings;
pub mod generation;
pub mod pinecone;
pub mod rerank;

use std::collections::HashMap;
use std::sync::Arc;

use image::DynamicImage;

use crate::catalog::{FilterPredicate, Metadata, SearchHit};

pub use embeddings::{FastImageEmbedder, FastTextEmbedder};
pub use generation::TgiGenerator;
pub use pinecone::{PineconeClient, PineconeIndex};
pub use rerank::FastReranker;

/// Errors raised by external providers. These always surface as server errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index request failed: {0}")]
    Index(String),

    #[error("rerank failed: {0}")]
    Rerank(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("image_url failed: {0}")]
    ImageFetch(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0} is not available")]
    Unavailable(&'static str),
}

/// Turns text into an L2-normalized vector.
pub trait TextEmbedder: Send + Sync {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Turns a decoded image into an L2-normalized vector.
pub trait ImageEmbedder: Send + Sync {
    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>, ProviderError>;
}

/// Nearest-neighbour index bound to a single namespace.
pub trait IndexClient: Send + Sync {
    /// Stored metadata by id. Ids absent from the index are absent from the map.
    fn fetch(&self, ids: &[&str]) -> Result<HashMap<String, Metadata>, ProviderError>;

    /// Up to `top_k` matches, best first.
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> Result<Vec<SearchHit>, ProviderError>;

    /// Merge `patch` into the stored metadata of `id`.
    fn update(&self, id: &str, patch: Metadata) -> Result<(), ProviderError>;
}

/// Second-pass relevance scoring. Returns one score per candidate, in input order.
pub trait Reranker: Send + Sync {
    fn score(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>, ProviderError>;
}

/// Sampling controls forwarded to the generation model.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: Option<u64>,
}

pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String, ProviderError>;
}

/// Reranking capability, decided once at startup.
#[derive(Clone)]
pub enum Reranking {
    Enabled(Arc<dyn Reranker>),
    Disabled,
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}
