//! Utility functions and helpers.

pub mod http;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use url::Url;

/// Check that a string is an absolute http:// or https:// URL.
pub fn is_http_url(candidate: &str) -> bool {
    if !candidate.starts_with("http://") && !candidate.starts_with("https://") {
        return false;
    }
    Url::parse(candidate)
        .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// Remove duplicate entries, keeping the first occurrence of each.
pub fn dedupe(list: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    list.into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

/// Uppercase the first letter of every word.
///
/// Any character that is not alphanumeric or `_` separates words, so
/// `#rust` becomes `#Rust`.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !(c.is_alphanumeric() || c == '_');
    }
    out
}

/// Join query output into a response body, one record per line.
pub fn format_lines(lines: &[String]) -> String {
    let mut body = String::new();
    for (i, line) in lines.iter().enumerate() {
        body.push_str(line);
        if !line.ends_with('\n') && i != lines.len() - 1 {
            body.push('\n');
        }
    }
    body
}

/// Cache validator for a response body.
pub fn etag(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
