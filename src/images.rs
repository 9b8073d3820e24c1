//! Image probe preparation: fetch, decode, RGB conversion and thumbnailing.

use std::time::Duration;

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use reqwest::blocking::Client;
use url::Url;

use crate::providers::ProviderError;

/// Longest side of the thumbnail handed to the image embedder.
pub const THUMBNAIL_MAX_SIDE: u32 = 256;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

/// Decode `data`, convert to RGB8 and shrink so the longest side is at most
/// `max_side`. Smaller images are never upscaled.
pub fn load_thumbnail(data: &[u8], max_side: u32) -> Result<DynamicImage, image::ImageError> {
    let img = image::load_from_memory(data)?;
    Ok(thumbnail(DynamicImage::ImageRgb8(img.to_rgb8()), max_side))
}

/// Shrink keeping aspect ratio, using a bicubic filter.
pub fn thumbnail(img: DynamicImage, max_side: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= max_side && h <= max_side {
        return img;
    }

    let scale = (max_side as f64) / (w.max(h) as f64);
    let new_w = (((w as f64) * scale).round() as u32).clamp(1, max_side);
    let new_h = (((h as f64) * scale).round() as u32).clamp(1, max_side);

    img.resize_exact(new_w, new_h, FilterType::CatmullRom)
}

/// Validate a caller-supplied image URL. Only http(s) is fetched.
pub fn parse_image_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|err| format!("Invalid image_url: {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(format!("Invalid image_url: unsupported scheme '{scheme}'")),
    }
}

/// Downloads probe images.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, ProviderError>;
}

/// Plain GET with a browser user agent and a bounded wait. No retries.
pub struct HttpImageFetcher {
    http: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, ProviderError> {
        log::debug!("fetching probe image {url}");

        let resp = self
            .http
            .get(url.clone())
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| ProviderError::ImageFetch(err.to_string()))?;

        resp.bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| ProviderError::ImageFetch(err.to_string()))
    }
}
