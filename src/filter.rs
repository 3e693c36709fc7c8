//! Word filter applied to chat lines before they are broadcast.

use regex::Regex;

/// A list of patterns, each of which must match a whole word.
#[derive(Debug, Clone)]
pub struct WordFilter {
    patterns: Vec<Regex>,
}

impl WordFilter {
    /// Compile filter entries. Each entry is a regular expression anchored to
    /// a whole whitespace-separated word.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Result<Self, regex::Error> {
        let patterns = entries
            .iter()
            .map(|entry| Regex::new(&format!("^(?:{})$", entry.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Replace every matching word with `*` of the same length and rejoin the
    /// words with single spaces.
    pub fn apply(&self, line: &str) -> String {
        line.split_whitespace()
            .map(|word| {
                if self.patterns.iter().any(|p| p.is_match(word)) {
                    "*".repeat(word.chars().count())
                } else {
                    word.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_listed_word() {
        let filter = WordFilter::new(&["darn"]).unwrap();
        assert_eq!(filter.apply("well darn it"), "well **** it");
    }

    #[test]
    fn matches_whole_words_only() {
        let filter = WordFilter::new(&["darn"]).unwrap();
        assert_eq!(filter.apply("darned darn"), "darned ****");
    }

    #[test]
    fn entries_are_patterns() {
        let filter = WordFilter::new(&["h[ae]ck", "fr.*"]).unwrap();
        assert_eq!(filter.apply("heck hack hock frak"), "**** **** hock ****");
    }

    #[test]
    fn collapses_whitespace() {
        let filter = WordFilter::new(&["x"]).unwrap();
        assert_eq!(filter.apply("a  b\tc"), "a b c");
    }

    #[test]
    fn mask_length_counts_characters() {
        let filter = WordFilter::new(&["café"]).unwrap();
        assert_eq!(filter.apply("café au lait"), "**** au lait");
    }

    #[test]
    fn empty_list_has_no_patterns() {
        let filter = WordFilter::new(&[] as &[&str]).unwrap();
        assert!(filter.is_empty());
        assert!(!WordFilter::new(&["darn"]).unwrap().is_empty());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(WordFilter::new(&["(unclosed"]).is_err());
    }
}
