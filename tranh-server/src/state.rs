use std::sync::Arc;

use tranh_core::{Pipeline, Translator};

use crate::output::OutputStore;

// Application state containing the preloaded model, the translator and the
// output location. Built once before serving.
#[derive(Clone)]
pub struct AppState {
    pub translator: Arc<dyn Translator>,
    pub pipeline: Pipeline,
    pub outputs: OutputStore,
}
