use crate::error::OpusMtError;
use crate::host::{ConfirmationLevel, Document, PlainTextExtractor};
use crate::lang::{primary_language, LanguagePair};
use crate::worker::WorkerRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Warms worker caches for newly opened documents
///
/// Every document is submitted at most once per language pair for the
/// lifetime of the cache. The background job translates each unconfirmed
/// segment and throws the output away; it races interactive lookups for the
/// same worker and cannot be cancelled.
pub struct PreTranslationCache {
    registry: Arc<WorkerRegistry>,
    extractor: Arc<dyn PlainTextExtractor>,
    enabled: bool,
    processed: Mutex<HashMap<LanguagePair, HashSet<String>>>,
}

impl PreTranslationCache {
    #[must_use]
    pub fn new(
        registry: Arc<WorkerRegistry>,
        extractor: Arc<dyn PlainTextExtractor>,
        enabled: bool,
    ) -> Self {
        Self {
            registry,
            extractor,
            enabled,
            processed: Mutex::new(HashMap::new()),
        }
    }

    /// Start a background pass over `document` if it qualifies
    ///
    /// Returns the job handle, or `None` when the document's languages don't
    /// match `pair`, pre-translation is disabled, or the document was already
    /// submitted for `pair`.
    pub fn on_document_opened(
        &self,
        document: Arc<dyn Document>,
        pair: &LanguagePair,
    ) -> Option<JoinHandle<()>> {
        if !self.enabled || !matches_pair(document.as_ref(), pair) {
            return None;
        }

        let settings = document.provider_settings()?;
        if !(settings.enabled && settings.pregenerate) {
            return None;
        }

        let id = document.id();
        if !self.mark_processed(pair, &id) {
            tracing::debug!("Document {id} already pre-translated for {pair}");
            return None;
        }

        tracing::info!("Pre-translating document {id} for {pair}");
        let registry = Arc::clone(&self.registry);
        let extractor = Arc::clone(&self.extractor);
        let pair = pair.clone();

        Some(tokio::spawn(async move {
            translate_document(registry, extractor, document, pair).await;
        }))
    }

    /// Whether `document_id` was already submitted for `pair`
    #[must_use]
    pub fn is_processed(&self, pair: &LanguagePair, document_id: &str) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pair)
            .is_some_and(|docs| docs.contains(document_id))
    }

    /// Record the document, returning `false` if it was already recorded
    fn mark_processed(&self, pair: &LanguagePair, document_id: &str) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pair.clone())
            .or_default()
            .insert(document_id.to_string())
    }
}

fn matches_pair(document: &dyn Document, pair: &LanguagePair) -> bool {
    primary_language(&document.source_language()) == pair.source()
        && document
            .target_languages()
            .iter()
            .any(|culture| primary_language(culture) == pair.target())
}

async fn translate_document(
    registry: Arc<WorkerRegistry>,
    extractor: Arc<dyn PlainTextExtractor>,
    document: Arc<dyn Document>,
    pair: LanguagePair,
) {
    let mut translated = 0usize;

    for segment in document.segment_pairs() {
        if segment.confirmation != ConfirmationLevel::Unspecified {
            continue;
        }

        let text = extractor.plain_text(&segment.source);
        if text.is_empty() {
            continue;
        }

        let worker = match registry.get_or_start(&pair).await {
            Ok(worker) => worker,
            Err(OpusMtError::ModelMissing(_)) => {
                tracing::debug!("No model for {pair}, skipping pre-translation");
                return;
            }
            Err(e) => {
                tracing::warn!("Pre-translation for {pair} stopped: {e}");
                return;
            }
        };

        match worker.translate(&text).await {
            Ok(_) => translated += 1,
            Err(e) => tracing::warn!("Pre-translation of a segment failed: {e}"),
        }
    }

    tracing::info!(
        "Pre-translated {translated} segments of document {} for {pair}",
        document.id()
    );
}
