// src/sanitize.rs
//
// Question intake: whitespace normalization and the sensitive-data scan.
// The sanitized form feeds everything model-facing; the raw form is what
// gets persisted as the user's message.
use crate::models::chat::SensitiveDataType;
use regex::Regex;

lazy_static::lazy_static! {
    // Any whitespace run containing a newline collapses to one space.
    static ref NEWLINE_RUN: Regex = Regex::new(r"[ \t]*\n\s*").unwrap();
    static ref SSN_PATTERN: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
}

pub fn sanitize_question(raw: &str) -> String {
    NEWLINE_RUN.replace_all(raw, " ").trim().to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensitiveScan {
    pub redacted: String,
    pub reasons: Vec<SensitiveDataType>,
}

impl SensitiveScan {
    pub fn is_safe(&self) -> bool {
        self.reasons.is_empty()
    }
}

/// Scans for every known sensitive-data category. Each matching span is
/// replaced with the category's bracketed tag and the category is recorded
/// once in the reason list.
pub fn scan_sensitive(text: &str) -> SensitiveScan {
    let mut redacted = text.to_string();
    let mut reasons = Vec::new();

    if SSN_PATTERN.is_match(&redacted) {
        redacted = SSN_PATTERN
            .replace_all(&redacted, SensitiveDataType::Ssn.tag())
            .into_owned();
        reasons.push(SensitiveDataType::Ssn);
    }

    SensitiveScan { redacted, reasons }
}
