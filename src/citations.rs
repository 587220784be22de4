// src/citations.rs
//
// Turns retrieval hits into user-facing citations. Document metadata in the
// vector store is uneven: some entries carry a curated title, most only have
// the knowledge-base filename, which may be percent-encoded and may start
// with the KB article number.
use crate::models::chat::Citation;
use regex::Regex;
use serde::Deserialize;

lazy_static::lazy_static! {
    static ref DOC_NUMBER: Regex = Regex::new(r"(?i)^kb\d+$").unwrap();
    static ref DOC_PREFIX: Regex = Regex::new(r"(?i)^kb\d+\s*[-_]\s*").unwrap();
}

const SMALL_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "nor", "of", "in", "on", "at", "to", "for", "with",
    "by", "as",
];

/// Payload fields of one retrieved document chunk.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SourceMeta {
    pub doc_datasource: Option<String>,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub link: Option<String>,
    pub modified_date: Option<i64>,
    pub creation_date: Option<i64>,
}

/// One scored retrieval hit as surfaced by the agent workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedSource {
    pub text: String,
    pub meta: SourceMeta,
    pub score: f32,
}

pub fn citation_from_source(source: &RetrievedSource) -> Citation {
    let title = match &source.meta.title {
        Some(title) => title.clone(),
        None => source
            .meta
            .filename
            .as_deref()
            .map(title_from_filename)
            .unwrap_or_default(),
    };

    Citation {
        title,
        link: source.meta.link.clone().unwrap_or_default(),
        published_date: source
            .meta
            .modified_date
            .or(source.meta.creation_date)
            .unwrap_or(0),
        score: source.score,
    }
}

/// Derives a display title from a knowledge-base filename.
fn title_from_filename(filename: &str) -> String {
    let decoded = urlencoding::decode(filename)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| filename.to_string());

    // Strip the extension, keeping earlier dots intact.
    let stem = match decoded.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => decoded,
    };

    // A bare article number has nothing better to show than itself.
    if DOC_NUMBER.is_match(&stem) {
        return stem.to_uppercase();
    }

    let stripped = DOC_PREFIX.replace(&stem, "").into_owned();

    // Already human text (the encoded-filename case) passes through as-is.
    if stripped.contains(' ') {
        return stripped;
    }

    title_case(&stripped.replace(['-', '_'], " "))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i > 0 && SMALL_WORDS.contains(&lower.as_str()) {
                lower
            } else {
                capitalize(&lower)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
