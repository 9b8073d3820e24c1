use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::{
    app::AppState,
    config::{Device, Settings},
    describe::DescriptionService,
    images::HttpImageFetcher,
    providers::{
        FastImageEmbedder, FastReranker, FastTextEmbedder, IndexClient, PineconeClient, Reranking,
        TgiGenerator,
    },
    search::{ImageBackend, ImageSearch, SearchService},
};

/// Builds every provider once, before the HTTP runtime starts.
///
/// The text side is mandatory. The image side, the reranker and the
/// generator degrade to "unavailable" with a warning.
pub struct AppFactory;

impl AppFactory {
    pub fn build(settings: Settings) -> Result<AppState> {
        Self::log_device(&settings)?;

        let api_key = settings
            .pinecone_api_key
            .as_deref()
            .context("PINECONE_API_KEY is not set")?;
        let pinecone = PineconeClient::new(api_key, &settings.pinecone_controller_url)
            .context("failed to create Pinecone client")?;

        let text_embedder = FastTextEmbedder::new(&settings.text_model, settings.model_cache_dir.clone())
            .with_context(|| format!("failed to load text model {}", settings.text_model))?;
        log::info!(
            "text model {} ready ({} dims)",
            text_embedder.name(),
            text_embedder.dimensions()
        );

        let text_index: Arc<dyn IndexClient> = Arc::new(
            pinecone
                .open_index(
                    &settings.pinecone_text_index,
                    settings.pinecone_text_host.as_deref(),
                    &settings.pinecone_namespace,
                )
                .with_context(|| format!("failed to open index {}", settings.pinecone_text_index))?,
        );

        let image = Self::image_search(&settings, &pinecone);
        let reranking = Self::reranking(&settings);
        let describer = Self::describer(&settings, text_index.clone());

        let search = SearchService::new(
            Arc::new(text_embedder),
            text_index,
            image,
            reranking,
            settings.use_reranker,
        );

        Ok(AppState::new(settings, search, describer))
    }

    fn log_device(settings: &Settings) -> Result<()> {
        match settings.device()? {
            Device::Cuda => log::warn!("DEVICE=cuda requested, running models on CPU"),
            device => log::info!("running models on CPU ({device:?})"),
        }
        Ok(())
    }

    fn image_search(settings: &Settings, pinecone: &PineconeClient) -> ImageSearch {
        let Some(index_name) = settings.image_index() else {
            log::info!("no image index configured, image search disabled");
            return ImageSearch::Unavailable;
        };

        let backend = (|| -> Result<ImageBackend> {
            let embedder =
                FastImageEmbedder::new(&settings.image_model, settings.model_cache_dir.clone())?;
            log::info!("image model {} ready", embedder.name());

            let index = pinecone.open_index(
                index_name,
                settings.pinecone_image_host.as_deref(),
                &settings.pinecone_namespace,
            )?;
            let fetcher =
                HttpImageFetcher::new(Duration::from_secs(settings.image_fetch_timeout_secs))?;

            Ok(ImageBackend {
                embedder: Arc::new(embedder),
                index: Arc::new(index),
                fetcher: Arc::new(fetcher),
            })
        })();

        match backend {
            Ok(backend) => ImageSearch::Available(backend),
            Err(err) => {
                log::warn!("image search disabled: {err:#}");
                ImageSearch::Unavailable
            }
        }
    }

    fn reranking(settings: &Settings) -> Reranking {
        if !settings.use_reranker {
            return Reranking::Disabled;
        }

        match FastReranker::new(&settings.reranker_model, settings.model_cache_dir.clone()) {
            Ok(reranker) => {
                log::info!("reranker {} ready", settings.reranker_model);
                Reranking::Enabled(Arc::new(reranker))
            }
            Err(err) => {
                log::warn!("reranker disabled: {err}");
                Reranking::Disabled
            }
        }
    }

    fn describer(settings: &Settings, text_index: Arc<dyn IndexClient>) -> Option<DescriptionService> {
        let Some(url) = settings.genai_url.as_deref() else {
            log::warn!("GENAI_URL is not set, description generation disabled");
            return None;
        };

        match TgiGenerator::new(url, Duration::from_secs(settings.genai_timeout_secs)) {
            Ok(generator) => {
                log::info!("generation server {url} (model {})", settings.genai_model);
                Some(DescriptionService::new(Arc::new(generator), text_index))
            }
            Err(err) => {
                log::warn!("description generation disabled: {err}");
                None
            }
        }
    }
}
