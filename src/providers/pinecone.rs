//! Pinecone vector index over its REST API.
//!
//! The control plane is only used once per index, to resolve the data-plane
//! host. Every data-plane call carries the configured namespace. No retries.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{IndexClient, ProviderError};
use crate::catalog::{FilterPredicate, Metadata, SearchHit};

const API_VERSION: &str = "2024-07";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Control-plane handle used to open indexes.
pub struct PineconeClient {
    http: Client,
    api_key: String,
    controller_url: String,
}

impl PineconeClient {
    pub fn new(api_key: &str, controller_url: &str) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            controller_url: controller_url.trim_end_matches('/').to_string(),
        })
    }

    /// Open `name`, resolving its host unless `host_override` is given.
    pub fn open_index(
        &self,
        name: &str,
        host_override: Option<&str>,
        namespace: &str,
    ) -> Result<PineconeIndex, ProviderError> {
        let host = match host_override {
            Some(host) => host.to_string(),
            None => self.describe_index(name)?.host,
        };
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };

        log::info!("opened index '{name}' at {base_url} (namespace '{namespace}')");

        Ok(PineconeIndex {
            http: self.http.clone(),
            api_key: self.api_key.clone(),
            base_url,
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }

    fn describe_index(&self, name: &str) -> Result<IndexDescription, ProviderError> {
        let url = format!("{}/indexes/{}", self.controller_url, name);
        let resp = self
            .http
            .get(&url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()?;

        parse_response(resp, name)
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
}

/// Data-plane handle for one index and namespace.
pub struct PineconeIndex {
    http: Client,
    api_key: String,
    base_url: String,
    name: String,
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    namespace: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a FilterPredicate>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl PineconeIndex {
    fn get(&self, path: &str) -> RequestBuilder {
        log::debug!("GET {}{}", self.base_url, path);
        self.http
            .get(format!("{}{}", self.base_url, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        log::debug!("POST {}{}", self.base_url, path);
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }
}

impl IndexClient for PineconeIndex {
    fn fetch(&self, ids: &[&str]) -> Result<HashMap<String, Metadata>, ProviderError> {
        let mut params: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", *id)).collect();
        params.push(("namespace", self.namespace.as_str()));

        let resp = self.get("/vectors/fetch").query(&params).send()?;
        let fetched: FetchResponse = parse_response(resp, &self.name)?;

        Ok(fetched
            .vectors
            .into_iter()
            .map(|(id, vector)| (id, vector.metadata.unwrap_or_default()))
            .collect())
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: &self.namespace,
            filter: filter.filter(|f| !f.is_empty()),
        };

        let resp = self.post("/query").json(&body).send()?;
        let result: QueryResponse = parse_response(resp, &self.name)?;

        Ok(result
            .matches
            .into_iter()
            .map(|m| SearchHit {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    fn update(&self, id: &str, patch: Metadata) -> Result<(), ProviderError> {
        let resp = self
            .post("/vectors/update")
            .json(&json!({
                "id": id,
                "setMetadata": patch,
                "namespace": self.namespace,
            }))
            .send()?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().unwrap_or_default();
            Err(ProviderError::Index(format!(
                "update on '{}' returned {status}: {text}",
                self.name
            )))
        }
    }
}

fn parse_response<T>(resp: Response, index: &str) -> Result<T, ProviderError>
where
    T: serde::de::DeserializeOwned,
{
    let status = resp.status();
    let text = resp.text()?;

    if !status.is_success() {
        return Err(ProviderError::Index(format!(
            "'{index}' returned {status}: {text}"
        )));
    }

    serde_json::from_str::<T>(&text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        ProviderError::Index(format!("unexpected response from '{index}': {err}"))
    })
}
