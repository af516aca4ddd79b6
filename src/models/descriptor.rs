use crate::lang::LanguagePair;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Install state of a model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallStatus {
    NotInstalled,
    Installed,
}

/// One versioned translation model, either installed locally or listed remotely
///
/// Models are addressed by a `<pair>/<name>` key, where `<pair>` is
/// `src[+src...]-tgt[+tgt...]` and `<name>` embeds an 8-digit date token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub pair: String,
    pub name: String,
    pub source_languages: Vec<String>,
    pub target_languages: Vec<String>,
    pub path: Option<PathBuf>,
    pub status: InstallStatus,
    pub install_progress: u8,
}

impl ModelDescriptor {
    /// Parse a `<pair>/<name>` key
    ///
    /// Returns `None` if the key does not have exactly two segments or the
    /// pair segment is not of the form `src-tgt`.
    #[must_use]
    pub fn from_key(key: &str, path: Option<PathBuf>) -> Option<Self> {
        let mut parts = key.trim_matches('/').split('/');
        let pair = parts.next()?;
        let name = parts.next()?;
        if parts.next().is_some() || name.is_empty() {
            return None;
        }

        let (sources, targets) = parse_pair_segment(pair)?;
        let status = if path.is_some() {
            InstallStatus::Installed
        } else {
            InstallStatus::NotInstalled
        };

        Some(Self {
            pair: pair.to_string(),
            name: name.to_string(),
            source_languages: sources,
            target_languages: targets,
            path,
            status,
            install_progress: if status == InstallStatus::Installed { 100 } else { 0 },
        })
    }

    /// Relative `<pair>/<name>` key, also the archive path without `.zip`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.pair, self.name)
    }

    /// `+`-joined source languages
    #[must_use]
    pub fn source_language_string(&self) -> String {
        self.source_languages.join("+")
    }

    /// `+`-joined target languages
    #[must_use]
    pub fn target_language_string(&self) -> String {
        self.target_languages.join("+")
    }

    /// Whether this model is stored under the directory for `pair`
    #[must_use]
    pub fn is_for_pair(&self, pair: &LanguagePair) -> bool {
        self.pair == pair.to_string()
    }

    #[must_use]
    pub fn date_token(&self) -> Option<&str> {
        date_token(&self.name)
    }

    pub fn mark_installed(&mut self) {
        self.status = InstallStatus::Installed;
        self.install_progress = 100;
    }
}

/// Parse `en+sv-fi` into (`[en, sv]`, `[fi]`)
fn parse_pair_segment(pair: &str) -> Option<(Vec<String>, Vec<String>)> {
    let (source, target) = pair.split_once('-')?;
    let split = |langs: &str| -> Option<Vec<String>> {
        let codes: Vec<String> = langs.split('+').map(str::to_string).collect();
        if codes.iter().any(String::is_empty) {
            None
        } else {
            Some(codes)
        }
    };
    Some((split(source)?, split(target)?))
}

fn date_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{8}").expect("date token pattern is valid"))
}

/// First 8-digit run in `name`, the model's version date
#[must_use]
pub fn date_token(name: &str) -> Option<&str> {
    date_token_regex().find(name).map(|m| m.as_str())
}

/// Pick the newest candidate by date token
///
/// Names without a token order before every tokenised name. Among equal
/// tokens the last candidate in iteration order wins.
pub fn latest_by_date_token<T, I, F>(candidates: I, name_of: F) -> Option<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> String,
{
    candidates
        .into_iter()
        .map(|c| {
            let token = date_token(&name_of(&c)).map(str::to_string);
            (token, c)
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, c)| c)
}
