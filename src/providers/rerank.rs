//! Cross-encoder reranker backed by fastembed's TextRerank.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

use super::embeddings::EmbeddingError;
use super::{ProviderError, Reranker};

pub struct FastReranker {
    model: Mutex<TextRerank>,
}

impl FastReranker {
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = parse_reranker_model(model_name)?;
        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = RerankInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let model =
            TextRerank::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        log::info!("loaded reranker '{model_name}'");

        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Reranker for FastReranker {
    fn score(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>, ProviderError> {
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self
            .model
            .lock()
            .map_err(|e| ProviderError::Rerank(format!("Failed to acquire model lock: {}", e)))?;

        let results = model
            .rerank(query, candidates, false, None)
            .map_err(|e| ProviderError::Rerank(e.to_string()))?;

        // fastembed returns results sorted by score; put them back in input order.
        let mut scores = vec![f32::NEG_INFINITY; candidates.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(scores)
    }
}

fn parse_reranker_model(name: &str) -> Result<RerankerModel, EmbeddingError> {
    let lowered = name.trim().to_lowercase();
    let bare = lowered.rsplit('/').next().unwrap_or_default();
    match bare {
        "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        _ => Err(EmbeddingError::InvalidModel(format!(
            "Unknown reranker: {}. Supported models: bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
            name
        ))),
    }
}
