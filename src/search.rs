//! Text matching used to filter scanned records by name.
//!
//! Matching runs on decoded records after a full heap scan; no index is
//! involved.

/// Decides whether `needle` occurs in `haystack`
pub trait TextMatcher {
    fn matches(&self, haystack: &str, needle: &str) -> bool;
}

/// Case-insensitive substring match; an empty needle matches everything
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainsMatcher;

impl TextMatcher for ContainsMatcher {
    fn matches(&self, haystack: &str, needle: &str) -> bool {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

impl<F> TextMatcher for F
where
    F: Fn(&str, &str) -> bool,
{
    fn matches(&self, haystack: &str, needle: &str) -> bool {
        self(haystack, needle)
    }
}
