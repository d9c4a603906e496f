//! Title normalization for duplicate detection.

/// Filler words dropped during normalization.
const TITLE_STOPWORDS: &[&str] = &["the", "a", "an", "to", "my", "your", "please"];

/// Canonicalize a flow title for deduplication.
///
/// Lowercases, strips everything but ASCII letters/digits/whitespace, drops
/// stopwords, and joins the remaining tokens with no separator. Two titles
/// that differ only in punctuation, casing, or filler words normalize equal:
/// `"Please call the client!"` and `"Call Client"` both become
/// `"callclient"`.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| !TITLE_STOPWORDS.contains(token))
        .collect()
}
