// Language registry: human-readable name <-> execution backend language id
// Read-only table built once at startup

use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

/// Canonical names and backend ids, in display order
const LANGUAGES: &[(&str, u32)] = &[
    ("PYTHON", 71),
    ("JAVA", 62),
    ("JAVASCRIPT", 63),
    ("C++ (GCC 9.2.0)", 54),
];

lazy_static! {
    static ref BY_NAME: HashMap<&'static str, u32> = LANGUAGES.iter().copied().collect();
    static ref BY_ID: HashMap<u32, &'static str> =
        LANGUAGES.iter().map(|&(name, id)| (id, name)).collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Resolve a language name (case-insensitive) to its backend id
pub fn resolve_language_id(name: &str) -> Result<u32, UnsupportedLanguage> {
    BY_NAME
        .get(name.trim().to_uppercase().as_str())
        .copied()
        .ok_or_else(|| UnsupportedLanguage(name.to_string()))
}

/// Canonical name for a backend id
pub fn language_name(id: u32) -> Option<&'static str> {
    BY_ID.get(&id).copied()
}

/// All supported languages as (name, id) pairs
pub fn supported_languages() -> &'static [(&'static str, u32)] {
    LANGUAGES
}
