//! Client for a text-generation server speaking the text-generation-inference
//! `/generate` protocol.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{Generator, ProviderError, SamplingParams};

pub struct TgiGenerator {
    http: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
}

#[derive(Debug, Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    do_sample: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Generated {
    generated_text: String,
}

/// Some servers answer with a bare object, others with a one-element list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    One(Generated),
    Many(Vec<Generated>),
}

impl TgiGenerator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Generator for TgiGenerator {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            inputs: prompt,
            parameters: GenerateParameters {
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
                do_sample: true,
                seed: params.seed,
            },
        };

        let resp = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()?;

        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            return Err(ProviderError::Generation(format!("{status}: {text}")));
        }

        match serde_json::from_str::<GenerateResponse>(&text) {
            Ok(GenerateResponse::One(generated)) => Ok(generated.generated_text),
            Ok(GenerateResponse::Many(list)) => list
                .into_iter()
                .next()
                .map(|generated| generated.generated_text)
                .ok_or_else(|| ProviderError::Generation("empty response".to_string())),
            Err(err) => {
                log::error!("{err}. tried to parse: {text:?}");
                Err(ProviderError::Generation(err.to_string()))
            }
        }
    }
}
