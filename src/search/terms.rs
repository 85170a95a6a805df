//! Query tokenization for the text-backed search modalities.

/// Split a raw query into search tokens.
///
/// Characters outside the letter/whitespace class are stripped (not split
/// on), then the remainder is split on whitespace. In exact mode the whole
/// raw string is one token, preserved verbatim.
pub fn tokenize(query: &str, exact: bool) -> Vec<String> {
    if exact {
        if query.is_empty() {
            return Vec::new();
        }
        return vec![query.to_string()];
    }
    let cleaned: String = query
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(tokenize("alpha beta", false), vec!["alpha", "beta"]);
    }

    #[test]
    fn strips_digits_and_punctuation() {
        assert_eq!(tokenize("room 101!", false), vec!["room"]);
        assert_eq!(tokenize("cat, dog.", false), vec!["cat", "dog"]);
    }

    #[test]
    fn stripping_merges_rather_than_splits() {
        // Non-letters are removed in place, so "alpha42beta" collapses to
        // one token instead of two.
        assert_eq!(tokenize("alpha42beta", false), vec!["alphabeta"]);
    }

    #[test]
    fn exact_mode_is_one_verbatim_token() {
        assert_eq!(tokenize("alpha beta", true), vec!["alpha beta"]);
        assert_eq!(tokenize("99 red balloons!", true), vec!["99 red balloons!"]);
    }

    #[test]
    fn degenerate_queries_yield_no_tokens() {
        assert!(tokenize("", false).is_empty());
        assert!(tokenize("42 + 17", false).is_empty());
        assert!(tokenize("", true).is_empty());
    }
}
