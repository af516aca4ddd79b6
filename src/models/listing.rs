//! Parsing of the object-storage bucket listing that advertises model archives.

use crate::models::descriptor::ModelDescriptor;
use regex::Regex;
use std::sync::OnceLock;

const MODEL_PREFIX: &str = "models/";
const ARCHIVE_SUFFIX: &str = ".zip";

/// One page of a bucket listing
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub keys: Vec<String>,
    pub is_truncated: bool,
}

impl ListingPage {
    /// Marker to request the page after this one
    #[must_use]
    pub fn next_marker(&self) -> Option<&str> {
        if self.is_truncated {
            self.keys.last().map(String::as_str)
        } else {
            None
        }
    }
}

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<Key>([^<]*)</Key>").expect("key pattern is valid"))
}

fn truncated_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>").expect("truncation pattern is valid")
    })
}

/// Parse an S3-style `ListBucketResult` document
#[must_use]
pub fn parse_listing(xml: &str) -> ListingPage {
    let keys = key_regex()
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| unescape(m.as_str()))
        .collect();

    ListingPage {
        keys,
        is_truncated: truncated_regex().is_match(xml),
    }
}

/// Convert listing keys of the form `models/<pair>/<name>.zip` to descriptors
#[must_use]
pub fn model_descriptors<'a, I>(keys: I) -> Vec<ModelDescriptor>
where
    I: IntoIterator<Item = &'a String>,
{
    keys.into_iter()
        .filter_map(|key| {
            let relative = key.strip_prefix(MODEL_PREFIX)?.strip_suffix(ARCHIVE_SUFFIX)?;
            let descriptor = ModelDescriptor::from_key(relative, None);
            if descriptor.is_none() {
                tracing::debug!("Skipping listing entry with unexpected layout: {key}");
            }
            descriptor
        })
        .collect()
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
