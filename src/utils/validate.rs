//! Identifier validation, file naming and identifier-list loading.
//!
//! File names are derived from identifiers only, so the same DOI always maps
//! to the same file in an output directory.

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Longest file stem produced by [`file_stem_for`]
const MAX_STEM_LENGTH: usize = 120;

/// Validation error types
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Invalid DOI format: {0}")]
    InvalidDoi(String),

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),
}

/// Strip resolver prefixes and surrounding whitespace from an identifier
pub fn clean_identifier(raw: &str) -> String {
    let mut id = raw.trim();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
        "DOI:",
    ] {
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest.trim();
            break;
        }
    }
    id.to_string()
}

/// Validate and clean a DOI
///
/// DOIs have the format "10.xxxx/xxxxxx" where xxxx is a registrant code
/// and xxxxxx is an item ID. Case is preserved.
pub fn normalize_doi(doi: &str) -> Result<String, ValidationError> {
    let doi = clean_identifier(doi);

    if doi.is_empty() {
        return Err(ValidationError::InvalidDoi("empty DOI".to_string()));
    }

    if !doi.starts_with("10.") {
        return Err(ValidationError::InvalidDoi(format!(
            "{}: must start with '10.'",
            doi
        )));
    }

    if !doi.contains('/') {
        return Err(ValidationError::InvalidDoi(format!(
            "{}: must contain a slash",
            doi
        )));
    }

    if doi.contains("..") || doi.contains('\0') {
        return Err(ValidationError::PathTraversal(doi));
    }

    Ok(doi)
}

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"))
}

/// Deterministic, filesystem-safe stem for an identifier
pub fn file_stem_for(identifier: &str) -> String {
    let collapsed = unsafe_chars().replace_all(identifier.trim(), "_");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == '_');

    let stem: String = trimmed.chars().take(MAX_STEM_LENGTH).collect();
    if stem.is_empty() {
        "paper".to_string()
    } else {
        stem
    }
}

/// Deterministic PDF file name for an identifier
pub fn pdf_file_name(identifier: &str) -> String {
    format!("{}.pdf", file_stem_for(identifier))
}

/// Collect identifiers from explicit values and an optional list file
///
/// Blank lines and `#` comments are skipped; repeated identifiers (compared
/// case-insensitively) are kept once, first occurrence wins.
pub fn load_identifiers(values: &[String], file: Option<&Path>) -> std::io::Result<Vec<String>> {
    let mut identifiers = Vec::new();
    let mut seen = HashSet::new();

    let mut push = |raw: &str| {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }
        let id = clean_identifier(trimmed);
        if seen.insert(id.to_lowercase()) {
            identifiers.push(id);
        }
    };

    for value in values {
        push(value);
    }

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)?;
        for line in content.lines() {
            push(line);
        }
    }

    Ok(identifiers)
}

/// Split a command line into words, honoring single and double quotes
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(ch);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_word = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_word {
        words.push(current);
    }
    words
}
