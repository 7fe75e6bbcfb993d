//! Shared handler state.

use std::sync::Arc;

use encoded_av::ToolRegistry;
use encoded_core::config::Config;
use encoded_engine::Engine;

/// State handed to every route handler via Axum. Clones are cheap.
#[derive(Clone)]
pub struct AppContext {
    pub engine: Arc<Engine>,
    pub config: Arc<Config>,
    pub tools: Arc<ToolRegistry>,
}

impl AppContext {
    pub fn new(engine: Arc<Engine>, config: Config, tools: Arc<ToolRegistry>) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            tools,
        }
    }
}
