//! Embedding model wrappers for fastembed.
//!
//! - Text models for the product text index
//! - CLIP-style image models for the product image index
//!
//! Both return L2-normalized vectors. fastembed's embed calls need `&mut self`,
//! so each model sits behind a Mutex.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{ImageEmbedding, ImageInitOptions, InitOptions, TextEmbedding};
use image::{DynamicImage, ImageFormat};

use super::{normalize, ImageEmbedder, ProviderError, TextEmbedder};

/// Error type for model initialization
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Wrapper around fastembed's TextEmbedding model.
pub struct FastTextEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastTextEmbedder {
    /// Load (downloading on first use) the named text model.
    ///
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = parse_text_model(model_name)?;
        let models_dir = ensure_models_dir(cache_dir)?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))?;

        log::info!("loaded text model '{model_name}' ({dimensions} dims)");

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl TextEmbedder for FastTextEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut model = self.model.lock().map_err(|e| {
            ProviderError::Embedding(format!("Failed to acquire model lock: {}", e))
        })?;

        let mut embedding = model
            .embed(vec![text], None)
            .map_err(|e| ProviderError::Embedding(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Embedding("No embedding returned".to_string()))?;

        normalize(&mut embedding);
        Ok(embedding)
    }
}

/// Wrapper around fastembed's ImageEmbedding model.
pub struct FastImageEmbedder {
    model: Mutex<ImageEmbedding>,
    model_name: String,
}

impl FastImageEmbedder {
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = parse_image_model(model_name)?;
        let models_dir = ensure_models_dir(cache_dir)?;

        let options = ImageInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let model = ImageEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        log::info!("loaded image model '{model_name}'");

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }
}

impl ImageEmbedder for FastImageEmbedder {
    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>, ProviderError> {
        // fastembed decodes from encoded bytes; PNG keeps the thumbnail lossless.
        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|e| ProviderError::Embedding(format!("Failed to encode image: {}", e)))?;

        let mut model = self.model.lock().map_err(|e| {
            ProviderError::Embedding(format!("Failed to acquire model lock: {}", e))
        })?;

        let mut embedding = model
            .embed_bytes(&[encoded.as_slice()], None)
            .map_err(|e| ProviderError::Embedding(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Embedding("No embedding returned".to_string()))?;

        normalize(&mut embedding);
        Ok(embedding)
    }
}

fn ensure_models_dir(cache_dir: PathBuf) -> Result<PathBuf, EmbeddingError> {
    let models_dir = cache_dir.join("models");
    std::fs::create_dir_all(&models_dir).map_err(|e| {
        EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
    })?;
    Ok(models_dir)
}

/// Model ids are accepted with or without their hub owner prefix.
fn bare_model_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.rsplit_once('/') {
        Some((_, bare)) => bare.to_string(),
        None => name,
    }
}

/// Parse text model name string to fastembed enum.
fn parse_text_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match bare_model_name(name).as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        _ => Err(EmbeddingError::InvalidModel(format!(
            "Unknown text model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
            name
        ))),
    }
}

/// Parse image model name string to fastembed enum.
fn parse_image_model(name: &str) -> Result<fastembed::ImageEmbeddingModel, EmbeddingError> {
    match bare_model_name(name).as_str() {
        "clip-vit-b-32" | "clipvitb32" => Ok(fastembed::ImageEmbeddingModel::ClipVitB32),
        "resnet50" => Ok(fastembed::ImageEmbeddingModel::Resnet50),
        "unicom-vit-b-16" | "unicomvitb16" => Ok(fastembed::ImageEmbeddingModel::UnicomVitB16),
        "unicom-vit-b-32" | "unicomvitb32" => Ok(fastembed::ImageEmbeddingModel::UnicomVitB32),
        _ => Err(EmbeddingError::InvalidModel(format!(
            "Unknown image model: {}. Supported models: clip-ViT-B-32, resnet50, unicom-vit-b-16, unicom-vit-b-32",
            name
        ))),
    }
}
