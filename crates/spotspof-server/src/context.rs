//! Application context shared by all request handlers via Axum state.

use std::sync::Arc;

use spotspof_core::config::Config;
use spotspof_core::Result;
use spotspof_extract::{ArtifactManager, Extractor, ToolRegistry};

use crate::delivery::DeliverySelector;
use crate::queue::PlaylistQueue;

/// Cheaply cloneable: it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// Extraction backend, used directly for search.
    pub extractor: Arc<dyn Extractor>,
    /// Strategy selection for the stream and download routes.
    pub delivery: Arc<DeliverySelector>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    pub queue: Arc<PlaylistQueue>,
}

impl AppContext {
    /// Build the context. Creates the temp artifact directory if needed.
    pub fn new(config: Config, extractor: Arc<dyn Extractor>, tools: ToolRegistry) -> Result<Self> {
        let artifacts =
            ArtifactManager::new(&config.stream.temp_dir, config.transcode.extension())?;
        let delivery = DeliverySelector::new(
            extractor.clone(),
            artifacts,
            config.transcode.clone(),
            config.stream.clone(),
        );
        let queue = PlaylistQueue::new(config.queue.capacity);

        Ok(Self {
            config: Arc::new(config),
            extractor,
            delivery: Arc::new(delivery),
            tools: Arc::new(tools),
            queue: Arc::new(queue),
        })
    }
}
