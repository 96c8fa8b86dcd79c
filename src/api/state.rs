//! Application state for the API server

use crate::ImageSearchService;
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (an `Arc` clone).
#[derive(Clone)]
pub struct AppState {
    /// The service handling searches and downloads
    pub service: Arc<ImageSearchService>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: Arc<ImageSearchService>) -> Self {
        Self { service }
    }
}
