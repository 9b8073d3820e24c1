pub mod errors;
pub mod factory;

pub use errors::AppError;
pub use factory::AppFactory;

use crate::{config::Settings, describe::DescriptionService, search::SearchService};

/// Long-lived state shared by every request.
pub struct AppState {
    pub settings: Settings,
    pub search: SearchService,
    /// `None` when no generation server is configured.
    pub describer: Option<DescriptionService>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        search: SearchService,
        describer: Option<DescriptionService>,
    ) -> Self {
        Self {
            settings,
            search,
            describer,
        }
    }
}
