use crate::error::{OpusMtError, Result};
use crate::host::{
    ImportResult, ImportSettings, PlainTextExtractor, SearchResult, SearchResults, SearchSettings,
    Segment, TranslationUnit, TranslationUnitOrigin,
};
use crate::lang::LanguagePair;
use crate::worker::WorkerRegistry;
use std::sync::Arc;

/// Machine translation lookups for one language direction
///
/// Each lookup reduces the segment to plain text, translates it through the
/// pair's worker and wraps the output as a single machine-translation result.
/// Translation memory mutation is not supported.
pub struct LanguageDirection {
    pair: LanguagePair,
    registry: Arc<WorkerRegistry>,
    extractor: Arc<dyn PlainTextExtractor>,
}

impl LanguageDirection {
    #[must_use]
    pub fn new(
        pair: LanguagePair,
        registry: Arc<WorkerRegistry>,
        extractor: Arc<dyn PlainTextExtractor>,
    ) -> Self {
        Self {
            pair,
            registry,
            extractor,
        }
    }

    #[must_use]
    pub fn pair(&self) -> &LanguagePair {
        &self.pair
    }

    #[must_use]
    pub fn source_language(&self) -> &str {
        self.pair.source()
    }

    #[must_use]
    pub fn target_language(&self) -> &str {
        self.pair.target()
    }

    /// Reverse lookups are never offered
    #[must_use]
    pub const fn can_reverse_direction(&self) -> bool {
        false
    }

    /// Translate one segment
    ///
    /// Produces no result when the translation is empty, otherwise exactly
    /// one. Both search modes behave the same.
    pub async fn search_segment(
        &self,
        settings: &SearchSettings,
        segment: &Segment,
    ) -> Result<SearchResults> {
        let source_text = self.extractor.plain_text(segment);
        let mut results = SearchResults {
            source_segment: segment.clone(),
            results: Vec::new(),
        };
        if source_text.is_empty() {
            return Ok(results);
        }

        let worker = self.registry.get_or_start(&self.pair).await?;
        let translated = worker.translate(&source_text).await?;
        if translated.is_empty() {
            return Ok(results);
        }

        tracing::debug!(mode = ?settings.mode, "Translated segment for {}", self.pair);
        results
            .results
            .push(self.machine_translation(&source_text, &translated));
        Ok(results)
    }

    /// Translate `segments` in order
    ///
    /// # Errors
    /// Lookups stop at the first failing segment and its error is returned;
    /// results of earlier segments are discarded. The failed worker is
    /// replaced on the next lookup.
    pub async fn search_segments(
        &self,
        settings: &SearchSettings,
        segments: &[Segment],
    ) -> Result<Vec<SearchResults>> {
        let mut results = Vec::with_capacity(segments.len());
        for segment in segments {
            results.push(self.search_segment(settings, segment).await?);
        }
        Ok(results)
    }

    /// Translate the segments whose mask entry is set; masked-out slots are `None`
    ///
    /// # Errors
    /// Returns `InvalidArgument` before any lookup if the mask length differs
    /// from the number of segments. Otherwise fails like
    /// [`search_segments`](Self::search_segments).
    pub async fn search_segments_masked(
        &self,
        settings: &SearchSettings,
        segments: &[Segment],
        mask: &[bool],
    ) -> Result<Vec<Option<SearchResults>>> {
        check_mask(segments.len(), mask)?;

        let mut results = Vec::with_capacity(segments.len());
        for (segment, &selected) in segments.iter().zip(mask) {
            if selected {
                results.push(Some(self.search_segment(settings, segment).await?));
            } else {
                results.push(None);
            }
        }
        Ok(results)
    }

    pub async fn search_text(&self, settings: &SearchSettings, text: &str) -> Result<SearchResults> {
        let segment = Segment::from_text(self.pair.source(), text);
        self.search_segment(settings, &segment).await
    }

    pub async fn search_translation_unit(
        &self,
        settings: &SearchSettings,
        unit: &TranslationUnit,
    ) -> Result<SearchResults> {
        self.search_segment(settings, &unit.source).await
    }

    pub async fn search_translation_units(
        &self,
        settings: &SearchSettings,
        units: &[TranslationUnit],
    ) -> Result<Vec<SearchResults>> {
        let mut results = Vec::with_capacity(units.len());
        for unit in units {
            results.push(self.search_translation_unit(settings, unit).await?);
        }
        Ok(results)
    }

    /// Like [`search_segments_masked`](Self::search_segments_masked); a missing mask selects every unit
    pub async fn search_translation_units_masked(
        &self,
        settings: &SearchSettings,
        units: &[TranslationUnit],
        mask: Option<&[bool]>,
    ) -> Result<Vec<Option<SearchResults>>> {
        if let Some(mask) = mask {
            check_mask(units.len(), mask)?;
        }

        let mut results = Vec::with_capacity(units.len());
        for (i, unit) in units.iter().enumerate() {
            if mask.map_or(true, |m| m[i]) {
                results.push(Some(self.search_translation_unit(settings, unit).await?));
            } else {
                results.push(None);
            }
        }
        Ok(results)
    }

    pub fn add_translation_unit(
        &self,
        _unit: &TranslationUnit,
        _settings: &ImportSettings,
    ) -> Result<ImportResult> {
        Err(OpusMtError::Unsupported("add_translation_unit"))
    }

    pub fn add_translation_units(
        &self,
        _units: &[TranslationUnit],
        _settings: &ImportSettings,
    ) -> Result<Vec<ImportResult>> {
        Err(OpusMtError::Unsupported("add_translation_units"))
    }

    pub fn add_translation_units_masked(
        &self,
        _units: &[TranslationUnit],
        _settings: &ImportSettings,
        _mask: &[bool],
    ) -> Result<Vec<ImportResult>> {
        Err(OpusMtError::Unsupported("add_translation_units_masked"))
    }

    pub fn update_translation_unit(&self, _unit: &TranslationUnit) -> Result<ImportResult> {
        Err(OpusMtError::Unsupported("update_translation_unit"))
    }

    pub fn update_translation_units(&self, _units: &[TranslationUnit]) -> Result<Vec<ImportResult>> {
        Err(OpusMtError::Unsupported("update_translation_units"))
    }

    pub fn add_or_update_translation_units(
        &self,
        _units: &[TranslationUnit],
        _previous_hashes: &[i32],
        _settings: &ImportSettings,
    ) -> Result<Vec<ImportResult>> {
        Err(OpusMtError::Unsupported("add_or_update_translation_units"))
    }

    pub fn add_or_update_translation_units_masked(
        &self,
        _units: &[TranslationUnit],
        _previous_hashes: &[i32],
        _settings: &ImportSettings,
        _mask: &[bool],
    ) -> Result<Vec<ImportResult>> {
        Err(OpusMtError::Unsupported("add_or_update_translation_units_masked"))
    }

    fn machine_translation(&self, source_text: &str, translated: &str) -> SearchResult {
        SearchResult {
            translation_unit: TranslationUnit {
                source: Segment::from_text(self.pair.source(), source_text),
                target: Some(Segment::from_text(self.pair.target(), translated)),
                origin: TranslationUnitOrigin::MachineTranslation,
            },
        }
    }
}

fn check_mask(len: usize, mask: &[bool]) -> Result<()> {
    if mask.len() == len {
        Ok(())
    } else {
        Err(OpusMtError::InvalidArgument(format!(
            "mask has {} entries for {len} items",
            mask.len()
        )))
    }
}
