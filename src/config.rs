use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Optional YAML file layered between the defaults and the environment.
pub const CONFIG_PATH_VAR: &str = "SHOPVEC_CONFIG";

const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://127.0.0.1:5173"];

/// Every key the settings understand. Legacy aliases map onto the canonical
/// key; when both are set the canonical one wins.
const KEYS: &[(&str, &str)] = &[
    ("app_name", "app_name"),
    ("app_env", "app_env"),
    ("api_v1_str", "api_v1_str"),
    ("backend_cors_origins", "backend_cors_origins"),
    ("pinecone_api_key", "pinecone_api_key"),
    ("pinecone_text_index", "pinecone_text_index"),
    ("pinecone_image_index", "pinecone_image_index"),
    ("pinecone_text_host", "pinecone_text_host"),
    ("pinecone_image_host", "pinecone_image_host"),
    ("pinecone_controller_url", "pinecone_controller_url"),
    ("pinecone_namespace", "pinecone_namespace"),
    ("text_model", "text_model"),
    ("text_emb_model", "text_model"),
    ("image_model", "image_model"),
    ("image_emb_model", "image_model"),
    ("device", "device"),
    ("model_cache_dir", "model_cache_dir"),
    ("use_reranker", "use_reranker"),
    ("enable_rerank", "use_reranker"),
    ("reranker_model", "reranker_model"),
    ("genai_url", "genai_url"),
    ("genai_model", "genai_model"),
    ("genai_timeout_secs", "genai_timeout_secs"),
    ("image_fetch_timeout_secs", "image_fetch_timeout_secs"),
    ("frontend_dist", "frontend_dist"),
    ("bind_addr", "bind_addr"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Auto,
    Cpu,
    Cuda,
}

impl std::str::FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            other => bail!("unknown DEVICE {other:?}, expected auto, cpu or cuda"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default = "default_api_v1_str")]
    pub api_v1_str: String,
    #[serde(default = "default_cors_origins", deserialize_with = "de_origins")]
    pub backend_cors_origins: Vec<String>,

    #[serde(default, deserialize_with = "de_opt_string")]
    pub pinecone_api_key: Option<String>,
    #[serde(default = "default_text_index")]
    pub pinecone_text_index: String,
    /// Empty means image search is not configured.
    #[serde(default = "default_image_index")]
    pub pinecone_image_index: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub pinecone_text_host: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub pinecone_image_host: Option<String>,
    #[serde(default = "default_controller_url")]
    pub pinecone_controller_url: String,
    #[serde(default = "default_namespace")]
    pub pinecone_namespace: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_model_cache_dir")]
    pub model_cache_dir: PathBuf,

    #[serde(default, deserialize_with = "de_bool")]
    pub use_reranker: bool,
    #[serde(default = "default_reranker_model")]
    pub reranker_model: String,

    #[serde(default, deserialize_with = "de_opt_string")]
    pub genai_url: Option<String>,
    #[serde(default = "default_genai_model")]
    pub genai_model: String,
    #[serde(default = "default_genai_timeout_secs", deserialize_with = "de_u64")]
    pub genai_timeout_secs: u64,

    #[serde(default = "default_image_fetch_timeout_secs", deserialize_with = "de_u64")]
    pub image_fetch_timeout_secs: u64,
    #[serde(default = "default_frontend_dist")]
    pub frontend_dist: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_app_name() -> String {
    "AI Product API".to_string()
}

fn default_app_env() -> String {
    "dev".to_string()
}

fn default_api_v1_str() -> String {
    "/api".to_string()
}

fn default_cors_origins() -> Vec<String> {
    DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect()
}

fn default_text_index() -> String {
    "products-text".to_string()
}

fn default_image_index() -> String {
    "products-image".to_string()
}

fn default_controller_url() -> String {
    "https://api.pinecone.io".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_text_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_image_model() -> String {
    "clip-ViT-B-32".to_string()
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_model_cache_dir() -> PathBuf {
    PathBuf::from(".fastembed_cache")
}

fn default_reranker_model() -> String {
    "bge-reranker-base".to_string()
}

fn default_genai_model() -> String {
    "google/flan-t5-base".to_string()
}

fn default_genai_timeout_secs() -> u64 {
    120
}

fn default_image_fetch_timeout_secs() -> u64 {
    15
}

fn default_frontend_dist() -> PathBuf {
    PathBuf::from("frontend_build")
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        // every field has a serde default
        match serde_json::from_value(Value::Object(Map::new())) {
            Ok(settings) => settings,
            Err(err) => unreachable!("settings defaults do not deserialize: {err}"),
        }
    }
}

impl Settings {
    /// Defaults, then `$SHOPVEC_CONFIG` if set, then the process environment.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("loaded {}", path.display());
        }

        let path = std::env::var(CONFIG_PATH_VAR).ok().filter(|p| !p.is_empty());
        Self::load_from(path.as_deref().map(Path::new), std::env::vars())
    }

    pub fn load_from(
        path: Option<&Path>,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> anyhow::Result<Self> {
        let mut merged = Map::new();

        if let Some(path) = path {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let value: Value = serde_yml::from_str(&text)
                .with_context(|| format!("config file {} is malformed", path.display()))?;

            match value {
                Value::Object(map) => merge_layer(&mut merged, map),
                Value::Null => {}
                _ => bail!("config file {} must be a mapping", path.display()),
            }
        }

        let env: Map<String, Value> = env
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        merge_layer(&mut merged, env);

        let settings: Self =
            serde_json::from_value(Value::Object(merged)).context("invalid settings")?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.device()?;

        if self.image_fetch_timeout_secs == 0 {
            bail!("IMAGE_FETCH_TIMEOUT_SECS must be greater than 0");
        }

        if self.pinecone_text_index.trim().is_empty() {
            bail!("PINECONE_TEXT_INDEX must not be empty");
        }

        Ok(())
    }

    pub fn device(&self) -> anyhow::Result<Device> {
        self.device.parse()
    }

    /// Image index name, `None` when image search is switched off.
    pub fn image_index(&self) -> Option<&str> {
        Some(self.pinecone_image_index.trim()).filter(|name| !name.is_empty())
    }

    /// Effective settings as YAML with secrets masked.
    pub fn to_redacted_yaml(&self) -> anyhow::Result<String> {
        let mut redacted = self.clone();
        if redacted.pinecone_api_key.is_some() {
            redacted.pinecone_api_key = Some("********".to_string());
        }

        Ok(serde_yml::to_string(&redacted)?)
    }
}

/// Fold one source into `merged`. Keys are matched case-insensitively and
/// anything outside `KEYS` is dropped.
fn merge_layer(merged: &mut Map<String, Value>, layer: Map<String, Value>) {
    let mut aliased = Vec::new();
    let mut canonical = Vec::new();

    for (key, value) in layer {
        let key = key.to_ascii_lowercase();
        if let Some((name, target)) = KEYS.iter().find(|(name, _)| *name == key) {
            if name == target {
                canonical.push((target.to_string(), value));
            } else {
                aliased.push((target.to_string(), value));
            }
        }
    }

    merged.extend(aliased);
    merged.extend(canonical);
}

/// Split a CORS origin list given as a list, `a,b`, `["a","b"]` or `('a','b')`.
pub fn parse_origins(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .or_else(|| trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')))
        .unwrap_or(trimmed);

    inner
        .split(',')
        .map(|origin| origin.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

fn de_origins<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let origins = match Value::deserialize(deserializer)? {
        Value::Null => vec![],
        Value::String(raw) => parse_origins(&raw),
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        other => {
            return Err(de::Error::custom(format!(
                "expected a list or string of origins, got {other}"
            )))
        }
    };

    if origins.is_empty() {
        Ok(default_cors_origins())
    } else {
        Ok(origins)
    }
}

fn de_opt_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn de_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        Value::Number(n) => Ok(n.as_i64() != Some(0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "" | "0" | "false" | "no" | "off" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean {other:?}"))),
        },
        other => Err(de::Error::custom(format!("invalid boolean {other}"))),
    }
}

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("expected a non-negative integer, got {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a non-negative integer, got {s:?}"))),
        other => Err(de::Error::custom(format!(
            "expected a non-negative integer, got {other}"
        ))),
    }
}
