use crate::{catalog::FilterError, providers::ProviderError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::Unprocessable(err.to_string())
    }
}

impl From<base64::DecodeError> for AppError {
    fn from(err: base64::DecodeError) -> Self {
        AppError::Unprocessable(format!("Invalid base64 image: {err}"))
    }
}

impl AppError {
    pub fn image_index_unavailable() -> Self {
        AppError::BadRequest("Image index not available.".to_string())
    }
}
