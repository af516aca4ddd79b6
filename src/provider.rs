use crate::config::Config;
use crate::error::{OpusMtError, Result};
use crate::host::{Document, PlainTextExtractor, TextOnlyExtractor};
use crate::lang::LanguagePair;
use crate::models::ModelRepository;
use crate::pretranslate::PreTranslationCache;
use crate::search::LanguageDirection;
use crate::worker::WorkerRegistry;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One host session of the OPUS-MT provider
///
/// Created once when the host loads the provider and shut down when it
/// unloads. Owns the model repository, the worker registry and the
/// pre-translation bookkeeping; every engine process started during the
/// session is terminated by [`shutdown`](Self::shutdown).
pub struct TranslationProvider {
    config: Config,
    repository: Arc<ModelRepository>,
    registry: Arc<WorkerRegistry>,
    pretranslation: PreTranslationCache,
    extractor: Arc<dyn PlainTextExtractor>,
}

impl TranslationProvider {
    /// Create a session that strips tags with [`TextOnlyExtractor`]
    pub fn new(config: Config) -> Result<Self> {
        Self::with_extractor(config, Arc::new(TextOnlyExtractor))
    }

    /// Create a session with a host-supplied plain text extractor
    pub fn with_extractor(config: Config, extractor: Arc<dyn PlainTextExtractor>) -> Result<Self> {
        let repository = Arc::new(ModelRepository::new(&config.models)?);
        let registry = Arc::new(WorkerRegistry::new(
            Arc::clone(&repository),
            config.engine.clone(),
        ));
        let pretranslation = PreTranslationCache::new(
            Arc::clone(&registry),
            Arc::clone(&extractor),
            config.pretranslation.enabled,
        );

        tracing::info!(
            "OPUS-MT provider ready with {} installed models in {}",
            repository.local_models().len(),
            repository.models_dir().display()
        );

        Ok(Self {
            config,
            repository,
            registry,
            pretranslation,
            extractor,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<ModelRepository> {
        &self.repository
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Whether an installed model serves `pair`
    #[must_use]
    pub fn supports_direction(&self, pair: &LanguagePair) -> bool {
        self.repository.is_pair_supported(pair)
    }

    /// Lookup handle for `pair`
    ///
    /// # Errors
    /// Returns `ModelMissing` if no installed model serves `pair`
    pub fn language_direction(&self, pair: &LanguagePair) -> Result<LanguageDirection> {
        if !self.supports_direction(pair) {
            return Err(OpusMtError::ModelMissing(pair.to_string()));
        }
        Ok(LanguageDirection::new(
            pair.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.extractor),
        ))
    }

    /// Entry point for the host's document-opened notification
    pub fn document_opened(
        &self,
        document: Arc<dyn Document>,
        pair: &LanguagePair,
    ) -> Option<JoinHandle<()>> {
        self.pretranslation.on_document_opened(document, pair)
    }

    /// Refresh the remote model catalogue without waiting for it
    pub fn spawn_remote_refresh(&self) -> JoinHandle<()> {
        self.repository.spawn_remote_refresh()
    }

    /// Terminate every engine process started in this session
    pub async fn shutdown(&self) {
        let pairs = self.registry.active_pairs().await;
        tracing::info!("Shutting down {} translation workers", pairs.len());
        self.registry.shutdown().await;
    }
}
