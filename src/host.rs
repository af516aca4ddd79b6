//! Types and collaborator interfaces shared with the host application.
//!
//! The host owns documents, rich segments and the translation-memory result
//! model. Only the shapes opusmt reads from or hands back are modelled here.

/// Element of a rich host segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentElement {
    Text(String),
    Tag(String),
}

/// A host segment: text runs interleaved with formatting tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub language: String,
    pub elements: Vec<SegmentElement>,
}

impl Segment {
    #[must_use]
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            elements: Vec::new(),
        }
    }

    /// Segment holding a single text run
    #[must_use]
    pub fn from_text(language: &str, text: &str) -> Self {
        let mut segment = Self::new(language);
        segment.push_text(text);
        segment
    }

    pub fn push_text(&mut self, text: &str) {
        self.elements.push(SegmentElement::Text(text.to_string()));
    }

    #[must_use]
    pub fn has_tags(&self) -> bool {
        self.elements
            .iter()
            .any(|e| matches!(e, SegmentElement::Tag(_)))
    }
}

/// Confirmation state of a segment in an open document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationLevel {
    Unspecified,
    Draft,
    Translated,
    Approved,
}

/// Source segment of a document together with its confirmation state
#[derive(Debug, Clone)]
pub struct SegmentPair {
    pub source: Segment,
    pub confirmation: ConfirmationLevel,
}

/// Translation provider settings attached to a document's project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Provider is enabled in the project's provider configuration
    pub enabled: bool,
    /// User asked for machine translations to be generated ahead of time
    pub pregenerate: bool,
}

/// Document opened in the host editor
pub trait Document: Send + Sync {
    /// Stable identity of the document within the host session
    fn id(&self) -> String;

    fn source_language(&self) -> String;

    fn target_languages(&self) -> Vec<String>;

    /// Settings of this provider in the document's project, if it is configured there
    fn provider_settings(&self) -> Option<ProviderSettings>;

    fn segment_pairs(&self) -> Vec<SegmentPair>;
}

/// Reduces a rich segment to the plain text sent to the engine
pub trait PlainTextExtractor: Send + Sync {
    fn plain_text(&self, segment: &Segment) -> String;
}

/// Keeps text runs and drops tags, joining runs with a single space
#[derive(Debug, Default, Clone, Copy)]
pub struct TextOnlyExtractor;

impl PlainTextExtractor for TextOnlyExtractor {
    fn plain_text(&self, segment: &Segment) -> String {
        segment
            .elements
            .iter()
            .filter_map(|e| match e {
                SegmentElement::Text(text) => Some(text.trim()),
                SegmentElement::Tag(_) => None,
            })
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a lookup was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    NormalSearch,
    FullSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSettings {
    pub mode: SearchMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationUnitOrigin {
    MachineTranslation,
    TranslationMemory,
}

/// Source/target segment pair as stored in or returned from a translation memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    pub source: Segment,
    pub target: Option<Segment>,
    pub origin: TranslationUnitOrigin,
}

impl TranslationUnit {
    #[must_use]
    pub fn new(source: Segment) -> Self {
        Self {
            source,
            target: None,
            origin: TranslationUnitOrigin::TranslationMemory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub translation_unit: TranslationUnit,
}

/// Results of one lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResults {
    pub source_segment: Segment,
    pub results: Vec<SearchResult>,
}

impl SearchResults {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }
}

/// Host settings for translation-memory imports; never consulted
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportSettings;

/// Outcome of a translation-memory import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportResult {
    Added,
    Updated,
    Skipped,
}
