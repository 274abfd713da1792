//! The engine context.
//!
//! An [`Engine`] holds what every pipeline shares: the module registry,
//! the chain order and the render configuration. It is cheap to clone
//! and can be handed to worker threads; each thread then builds its own
//! pipelines.

use std::sync::Arc;

use crate::error::{EngineError, clear_last_error, record};
use crate::order::ChainOrder;
use crate::pipeline::Pipeline;
use crate::registry::Registry;
use crate::source::SourceImage;
use crate::types::EngineConfig;

/// Shared state for creating pipelines.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    config: EngineConfig,
    order: ChainOrder,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with every shipped module and the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(Registry::builtin())
    }

    /// An engine over a caller-built registry.
    #[must_use]
    pub fn with_registry(registry: Registry) -> Self {
        tracing::debug!(modules = registry.count(), "engine initialized");
        Self {
            registry: Arc::new(registry),
            config: EngineConfig::default(),
            order: ChainOrder::default(),
        }
    }

    /// Replace the render configuration used by pipelines created later.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The module registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The render configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The chain order new pipelines use.
    #[must_use]
    pub const fn order(&self) -> ChainOrder {
        self.order
    }

    /// A pipeline over `image` with every module at its defaults.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] if the image holds no pixels.
    pub fn create_pipeline<'img>(
        &self,
        image: &'img SourceImage,
    ) -> Result<Pipeline<'img>, EngineError> {
        Pipeline::new(Arc::clone(&self.registry), image, self.order, self.config.clone())
            .map_err(record)
    }

    /// Forget this thread's last error message.
    ///
    /// Pipelines created earlier stay valid; they hold their own share of
    /// the registry.
    pub fn shutdown(self) {
        clear_last_error();
        tracing::debug!("engine shut down");
    }
}
