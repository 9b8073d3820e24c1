//! AI product descriptions.
//!
//! Metadata comes either from the text index (by id) or inline from the
//! caller. The generated text can be written back onto the item; a failed
//! write never fails the request.

mod prompt;

use prompt::{build_prompt, extract_description};

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    app::AppError,
    catalog::Metadata,
    providers::{Generator, IndexClient, SamplingParams},
};

/// Metadata field the generated text is persisted under.
pub const GENERATED_FIELD: &str = "gen_description";

#[derive(Clone, Deserialize)]
pub struct DescribeRequest {
    #[serde(default)]
    pub uniq_id: Option<String>,
    #[serde(default)]
    pub meta: Option<Metadata>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub save: bool,
}

fn default_temperature() -> f32 {
    0.9
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_new_tokens() -> u32 {
    120
}

fn default_seed() -> Option<u64> {
    Some(42)
}

impl Default for DescribeRequest {
    fn default() -> Self {
        Self {
            uniq_id: None,
            meta: None,
            style: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_new_tokens: default_max_new_tokens(),
            seed: default_seed(),
            save: false,
        }
    }
}

impl Debug for DescribeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescribeRequest")
            .field("uniq_id", &self.uniq_id)
            .field("meta_keys", &self.meta.as_ref().map(|m| m.len()))
            .field("style", &self.style)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_new_tokens", &self.max_new_tokens)
            .field("seed", &self.seed)
            .field("save", &self.save)
            .finish()
    }
}

impl DescribeRequest {
    fn sampling(&self) -> SamplingParams {
        SamplingParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            seed: self.seed,
        }
    }

    fn item_id(&self) -> Option<&str> {
        self.uniq_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescribeOutcome {
    pub description: String,
    pub saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct DescriptionService {
    generator: Arc<dyn Generator>,
    text_index: Arc<dyn IndexClient>,
}

impl DescriptionService {
    pub fn new(generator: Arc<dyn Generator>, text_index: Arc<dyn IndexClient>) -> Self {
        Self {
            generator,
            text_index,
        }
    }

    pub fn describe(&self, request: &DescribeRequest) -> Result<DescribeOutcome, AppError> {
        log::debug!("describe: {request:?}");

        let metadata = self.resolve_metadata(request)?;
        let prompt = build_prompt(&metadata, request.style.as_deref());

        let raw = self.generator.generate(&prompt, &request.sampling())?;
        let description = extract_description(&raw);

        let mut outcome = DescribeOutcome {
            description,
            saved: false,
            error: None,
        };

        if let (true, Some(id)) = (request.save, request.item_id()) {
            let mut patch = Metadata::new();
            patch.insert(
                GENERATED_FIELD.to_string(),
                Value::String(outcome.description.clone()),
            );

            match self.text_index.update(id, patch) {
                Ok(()) => outcome.saved = true,
                Err(err) => {
                    log::warn!("failed to save description for {id}: {err}");
                    outcome.error = Some(err.to_string());
                }
            }
        }

        Ok(outcome)
    }

    fn resolve_metadata(&self, request: &DescribeRequest) -> Result<Metadata, AppError> {
        if let Some(id) = request.item_id() {
            let mut fetched = self.text_index.fetch(&[id])?;
            return fetched
                .remove(id)
                .ok_or_else(|| AppError::NotFound("uniq_id not found in index".to_string()));
        }

        match &request.meta {
            Some(meta) if !meta.is_empty() => Ok(meta.clone()),
            _ => Err(AppError::Unprocessable("Provide uniq_id or meta".to_string())),
        }
    }
}
