//! Token accounting for responses without upstream-reported usage

use crate::handlers::openai::types::estimate_tokens;

/// Deterministic token estimate
///
/// Implementations must be monotonic: more characters never yield fewer
/// tokens.
pub trait TokenCounter: Send + Sync {
    fn count_chars(&self, chars: usize) -> u32;

    fn count(&self, text: &str) -> u32 {
        self.count_chars(text.chars().count())
    }
}

/// ⌈chars / 4⌉, the usual English-text heuristic
#[derive(Debug, Clone, Copy, Default)]
pub struct CharRatioCounter;

impl TokenCounter for CharRatioCounter {
    fn count_chars(&self, chars: usize) -> u32 {
        estimate_tokens(chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rounds_up() {
        assert_eq!(CharRatioCounter.count(""), 0);
        assert_eq!(CharRatioCounter.count("abc"), 1);
        assert_eq!(CharRatioCounter.count("abcd"), 1);
        assert_eq!(CharRatioCounter.count("abcde"), 2);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        assert_eq!(CharRatioCounter.count("éééé"), 1);
    }

    proptest! {
        #[test]
        fn prop_monotonic(a in 0usize..100_000, b in 0usize..100_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(CharRatioCounter.count_chars(lo) <= CharRatioCounter.count_chars(hi));
        }
    }
}
