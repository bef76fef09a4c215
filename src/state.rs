use std::sync::Arc;

use crate::app::CompositionRoot;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<CompositionRoot>,
}

impl AppState {
    pub fn new(runtime: Arc<CompositionRoot>) -> Self {
        Self { runtime }
    }
}
