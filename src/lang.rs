use crate::error::{OpusMtError, Result};
use std::fmt;
use std::str::FromStr;

/// Ordered (source, target) language code pair
///
/// The canonical `src-tgt` string form is the key for model directories,
/// workers and pre-translation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LanguagePair {
    source: String,
    target: String,
}

impl LanguagePair {
    /// Create a pair from two language codes
    ///
    /// # Errors
    /// Returns `InvalidArgument` if either code is empty or not alphabetic
    pub fn new(source: &str, target: &str) -> Result<Self> {
        Ok(Self {
            source: normalize_code(source)?,
            target: normalize_code(target)?,
        })
    }

    /// Derive a pair from culture names such as `en-GB` and `fi-FI`
    ///
    /// Only the primary language subtag is kept.
    pub fn from_cultures(source_culture: &str, target_culture: &str) -> Result<Self> {
        Self::new(primary_subtag(source_culture), primary_subtag(target_culture))
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

impl FromStr for LanguagePair {
    type Err = OpusMtError;

    fn from_str(s: &str) -> Result<Self> {
        let (source, target) = s.split_once('-').ok_or_else(|| {
            OpusMtError::InvalidArgument(format!("Language pair '{s}' must look like 'en-fi'"))
        })?;
        Self::new(source, target)
    }
}

/// Lowercased primary subtag of a culture name: `en-GB` -> `en`
#[must_use]
pub fn primary_language(culture: &str) -> String {
    primary_subtag(culture).trim().to_ascii_lowercase()
}

fn primary_subtag(culture: &str) -> &str {
    culture.split(['-', '_']).next().unwrap_or(culture)
}

fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(OpusMtError::InvalidArgument(format!(
            "Invalid language code '{code}'"
        )));
    }
    Ok(code.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let pair: LanguagePair = "en-fi".parse().unwrap();
        assert_eq!(pair.source(), "en");
        assert_eq!(pair.target(), "fi");
        assert_eq!(pair.to_string(), "en-fi");
    }

    #[test]
    fn test_codes_are_lowercased() {
        let pair = LanguagePair::new("SV", "Fi").unwrap();
        assert_eq!(pair.to_string(), "sv-fi");
    }

    #[test]
    fn test_from_cultures() {
        let pair = LanguagePair::from_cultures("en-GB", "fi-FI").unwrap();
        assert_eq!(pair.to_string(), "en-fi");

        let pair = LanguagePair::from_cultures("sv_SE", "fi").unwrap();
        assert_eq!(pair.to_string(), "sv-fi");
        assert_eq!(primary_language("EN-us"), "en");
    }

    #[test]
    fn test_invalid_pairs() {
        assert!("enfi".parse::<LanguagePair>().is_err());
        assert!("-fi".parse::<LanguagePair>().is_err());
        assert!("en-f1".parse::<LanguagePair>().is_err());
        assert!(LanguagePair::new("", "fi").is_err());
    }
}
