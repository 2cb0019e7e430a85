//! Name tokenization for the search indexes.
//!
//! Indexing and querying must agree on token boundaries, so both sides go
//! through [`tokenize`].

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Shortest token that takes part in prefix matching.
pub const MIN_PREFIX_LEN: usize = 2;

/// Break text into normalized search tokens.
///
/// Diacritics are removed (NFD, then combining marks dropped), the result is
/// lowercased and split on every non-alphanumeric character.
///
/// ```
/// use icom_common::text::tokenize;
///
/// assert_eq!(tokenize("Phở Hà Nội #1"), vec!["pho", "ha", "noi", "1"]);
/// ```
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect();

    stripped
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Distinct tokens of a name, in first-seen order.
#[must_use]
pub fn distinct_tokens(text: &str) -> Vec<String> {
    let mut tokens = tokenize(text);
    let mut seen = std::collections::HashSet::new();
    tokens.retain(|t| seen.insert(t.clone()));
    tokens
}

/// Every prefix of `token` that is at least [`MIN_PREFIX_LEN`] characters
/// long, including the token itself.
#[must_use]
pub fn prefixes(token: &str) -> Vec<String> {
    let boundaries: Vec<usize> = token
        .char_indices()
        .map(|(i, _)| i)
        .skip(1)
        .chain(std::iter::once(token.len()))
        .collect();

    boundaries
        .into_iter()
        .enumerate()
        .filter(|(chars, _)| chars + 1 >= MIN_PREFIX_LEN)
        .map(|(_, end)| token[..end].to_string())
        .collect()
}

/// Distinct prefixes of every token of a name.
#[must_use]
pub fn name_prefixes(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for token in tokenize(text) {
        for prefix in prefixes(&token) {
            if seen.insert(prefix.clone()) {
                out.push(prefix);
            }
        }
    }
    out
}
