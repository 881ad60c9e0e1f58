use relay_protocol::Intent;
use std::collections::BTreeSet;

/// Deterministic intent fallback for when the language-model service is
/// unavailable or answers with garbage: the normalized query is the trimmed
/// raw text and the keywords are its alphabetic tokens longer than two
/// characters, lowercased and deduplicated.
pub fn extract(raw_text: &str) -> Intent {
    let keywords: BTreeSet<String> = raw_text
        .split(|c: char| !c.is_alphabetic())
        .filter(|token| token.len() > 2)
        .map(|token| token.to_lowercase())
        .collect();

    Intent {
        normalized_query: raw_text.trim().to_string(),
        keywords,
    }
}
