use crate::{
    app::{AppError, AppState},
    catalog::{FilterPredicate, Metadata, SearchResponse},
    describe::{DescribeOutcome, DescribeRequest},
    providers::ProviderError,
    search::{ImageSource, Modality, ProbeOutcome, TextQuery},
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tokio::signal;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    services::{ServeDir, ServeFile},
};

const MAX_TOP_K: i64 = 100;

type SharedState = Arc<AppState>;

/// The full HTTP surface: API routes under the configured prefix, the SPA
/// (when built) everywhere else.
pub fn router(state: SharedState) -> Router {
    let settings = &state.settings;

    let mut api = Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .route("/search/image", post(search_image_url))
        .route("/search/image/upload", post(search_image_upload))
        .route("/search/image/upload-check", post(search_image_upload_check))
        .route("/similar/image", post(similar_image))
        .route("/similar/:uniq_id", get(similar_by_id));

    if state.describer.is_some() {
        api = api.route("/gen/description", post(gen_description));
    }

    let api = api.fallback(api_not_found);

    let prefix = settings.api_v1_str.trim_end_matches('/');
    let app = if prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(prefix, api)
    };

    let dist = &settings.frontend_dist;
    let app = if dist.is_dir() {
        let assets = dist.join("assets");
        if !assets.is_dir() {
            log::warn!("SPA assets directory not found at {}", assets.display());
        }
        app.nest_service("/assets", ServeDir::new(assets))
            .fallback_service(ServeFile::new(dist.join("index.html")))
    } else {
        log::warn!(
            "SPA build directory not found at {}, serving the API only",
            dist.display()
        );
        app
    };

    app.layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(cors_layer(&settings.backend_cors_origins))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    // `*` with credentials: mirror the request origin.
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(listed_origins(origins))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

fn listed_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect()
}

async fn start_app(state: AppState, bind: &str) -> anyhow::Result<()> {
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        log::warn!("shutting down");
    }

    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(state: AppState, bind: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(state, bind).await })
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Provider(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_client_error() {
            log::debug!("{status}: {}", self.0);
        }

        (status, Json(json!({"detail": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::Unprocessable(err.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self {
        AppError::Unprocessable(err.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(err: PathRejection) -> Self {
        AppError::Unprocessable(err.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(err: MultipartRejection) -> Self {
        AppError::Unprocessable(err.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::Unprocessable(format!("Invalid multipart body: {err}"))
    }
}

fn checked_top_k(top_k: i64) -> Result<usize, AppError> {
    if (1..=MAX_TOP_K).contains(&top_k) {
        Ok(top_k as usize)
    } else {
        Err(AppError::Unprocessable(format!(
            "top_k must be between 1 and {MAX_TOP_K}"
        )))
    }
}

/// Non-positive counts mean "use the endpoint default".
fn lenient_top_k(top_k: i64) -> usize {
    usize::try_from(top_k).unwrap_or(0)
}

async fn api_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"})))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    name: String,
    env: String,
    status: &'static str,
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        name: state.settings.app_name.clone(),
        env: state.settings.app_env.clone(),
        status: "ok",
    })
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub prompt: String,
    #[serde(default = "default_text_top_k")]
    pub top_k: i64,
    #[serde(default)]
    pub filters: Option<Metadata>,
    #[serde(default)]
    pub use_reranker: Option<bool>,
}

fn default_text_top_k() -> i64 {
    12
}

async fn search(
    State(state): State<SharedState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    let Json(payload) = payload?;
    log::debug!("payload: {payload:?}");

    let query = TextQuery {
        prompt: payload.prompt,
        top_k: lenient_top_k(payload.top_k),
        filter: payload.filters.and_then(FilterPredicate::from_map),
        use_reranker: payload.use_reranker,
    };

    tokio::task::block_in_place(move || {
        state
            .search
            .search_text(&query)
            .map(|hits| Json(hits.into()))
            .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize)]
struct ImageUrlParams {
    image_url: String,
    #[serde(default = "default_image_top_k")]
    top_k: i64,
}

fn default_image_top_k() -> i64 {
    8
}

async fn search_image_url(
    State(state): State<SharedState>,
    params: Result<Query<ImageUrlParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    state.search.image_backend()?;

    let Query(params) = params?;
    log::debug!("params: {params:?}");
    let top_k = checked_top_k(params.top_k)?;

    tokio::task::block_in_place(move || {
        state
            .search
            .search_image(ImageSource::Url(params.image_url), top_k)
            .map(|hits| Json(hits.into()))
            .map_err(Into::into)
    })
}

/// Multipart body with an image under `file` and plain text fields.
struct UploadForm {
    file: Option<Vec<u8>>,
    fields: HashMap<String, String>,
}

impl Debug for UploadForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UploadForm {{ file: {:?}, fields: {:?} }}",
            self.file.as_ref().map(|file| format!("[{} bytes]", file.len())),
            self.fields
        )
    }
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm {
            file: None,
            fields: HashMap::new(),
        };

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                form.file = Some(field.bytes().await?.to_vec());
            } else {
                form.fields.insert(name, field.text().await?);
            }
        }

        Ok(form)
    }

    fn take_file(&mut self) -> Result<Vec<u8>, AppError> {
        self.file
            .take()
            .ok_or_else(|| AppError::Unprocessable("Missing form field: file".to_string()))
    }

    fn top_k(&self) -> Result<usize, AppError> {
        match self.fields.get("top_k").map(|raw| raw.trim()) {
            None | Some("") => Ok(0),
            Some(raw) => raw
                .parse::<i64>()
                .map(lenient_top_k)
                .map_err(|_| AppError::Unprocessable(format!("Invalid top_k: {raw:?}"))),
        }
    }

    fn threshold(&self) -> Result<f64, AppError> {
        match self.fields.get("threshold").map(|raw| raw.trim()) {
            None | Some("") => Ok(crate::search::DEFAULT_SIMILARITY_THRESHOLD),
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|_| AppError::Unprocessable(format!("Invalid threshold: {raw:?}"))),
        }
    }
}

async fn search_image_upload(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    state.search.image_backend()?;

    let mut form = UploadForm::read(multipart?).await?;
    log::debug!("payload: {form:?}");

    let top_k = form.top_k()?;
    let file = form.take_file()?;

    tokio::task::block_in_place(move || {
        state
            .search
            .search_image(ImageSource::Bytes(file), top_k)
            .map(|hits| Json(hits.into()))
            .map_err(Into::into)
    })
}

async fn search_image_upload_check(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProbeOutcome>, HttpError> {
    state.search.image_backend()?;

    let mut form = UploadForm::read(multipart?).await?;
    log::debug!("payload: {form:?}");

    let top_k = form.top_k()?;
    let threshold = form.threshold()?;
    let file = form.take_file()?;
    let filters = form.fields.remove("filters");

    tokio::task::block_in_place(move || {
        state
            .search
            .probe_image(&file, top_k, threshold, filters.as_deref())
            .map(Json)
            .map_err(Into::into)
    })
}

#[derive(Deserialize)]
pub struct ImageProbeRequest {
    pub image_b64: String,
}

impl Debug for ImageProbeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImageProbeRequest {{ image_b64: [REDACTED] }}")
    }
}

#[derive(Debug, Deserialize)]
struct TopKParams {
    #[serde(default = "default_text_top_k")]
    top_k: i64,
}

async fn similar_image(
    State(state): State<SharedState>,
    params: Result<Query<TopKParams>, QueryRejection>,
    payload: Result<Json<ImageProbeRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    state.search.image_backend()?;

    let Query(params) = params?;
    let Json(payload) = payload?;
    log::debug!("payload: {payload:?}, params: {params:?}");
    let top_k = checked_top_k(params.top_k)?;

    tokio::task::block_in_place(move || {
        state
            .search
            .search_image(ImageSource::Base64(payload.image_b64), top_k)
            .map(|hits| Json(hits.into()))
            .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize)]
struct SimilarParams {
    #[serde(default)]
    modality: Modality,
    #[serde(default = "default_text_top_k")]
    top_k: i64,
}

async fn similar_by_id(
    State(state): State<SharedState>,
    uniq_id: Result<Path<String>, PathRejection>,
    params: Result<Query<SimilarParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    let Path(uniq_id) = uniq_id?;
    let Query(params) = params?;
    log::debug!("similar to {uniq_id}: {params:?}");
    let top_k = checked_top_k(params.top_k)?;

    tokio::task::block_in_place(move || {
        state
            .search
            .similar_by_id(&uniq_id, params.modality, top_k)
            .map(|hits| Json(hits.into()))
            .map_err(Into::into)
    })
}

async fn gen_description(
    State(state): State<SharedState>,
    payload: Result<Json<DescribeRequest>, JsonRejection>,
) -> Result<Json<DescribeOutcome>, HttpError> {
    let Json(payload) = payload?;

    tokio::task::block_in_place(move || {
        let describer = state
            .describer
            .as_ref()
            .ok_or(ProviderError::Unavailable("description generation"))?;

        describer
            .describe(&payload)
            .map(Json)
            .map_err(Into::into)
    })
}
