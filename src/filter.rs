//! Predicates that decide which shared files are saved.

use std::collections::HashSet;
use std::sync::Arc;

use glob::{MatchOptions, Pattern};

use crate::error::{PanError, Result};
use crate::models::FileMetadata;

/// Decides whether a shared file should be transferred.
pub trait FilterPredicate: Send + Sync {
    fn matches(&self, file: &FileMetadata) -> bool;
}

impl<F> FilterPredicate for F
where
    F: Fn(&FileMetadata) -> bool + Send + Sync,
{
    fn matches(&self, file: &FileMetadata) -> bool {
        self(file)
    }
}

/// Matches files whose extension is in a set (case-insensitive, dot optional).
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { extensions }
    }

    /// Parse a comma separated list such as `mp4,avi,mkv`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }
}

impl FilterPredicate for ExtensionFilter {
    fn matches(&self, file: &FileMetadata) -> bool {
        file.extension
            .as_ref()
            .is_some_and(|ext| self.extensions.contains(ext))
    }
}

/// Matches file names against a glob pattern, ignoring case.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    pattern: Pattern,
}

impl GlobFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Pattern::new(pattern)
            .map_err(|e| PanError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        Ok(Self { pattern })
    }
}

impl FilterPredicate for GlobFilter {
    fn matches(&self, file: &FileMetadata) -> bool {
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };
        self.pattern.matches_with(&file.name, options)
    }
}

/// Matches files within an inclusive size range.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeFilter {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl FilterPredicate for SizeFilter {
    fn matches(&self, file: &FileMetadata) -> bool {
        self.min.map_or(true, |min| file.size >= min) && self.max.map_or(true, |max| file.size <= max)
    }
}

/// Matches when every inner predicate matches.
#[derive(Clone, Default)]
pub struct AllOf {
    filters: Vec<Arc<dyn FilterPredicate>>,
}

impl AllOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl FilterPredicate + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl FilterPredicate for AllOf {
    fn matches(&self, file: &FileMetadata) -> bool {
        self.filters.iter().all(|f| f.matches(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> FileMetadata {
        FileMetadata::new(name, size, false)
    }

    #[test]
    fn test_extension_filter() {
        let filter = ExtensionFilter::parse("mp4, .AVI ,mkv");
        assert!(filter.matches(&file("a.mp4", 1)));
        assert!(filter.matches(&file("b.avi", 1)));
        assert!(filter.matches(&file("C.MKV", 1)));
        assert!(!filter.matches(&file("b.txt", 1)));
        assert!(!filter.matches(&file("mp4", 1)));
    }

    #[test]
    fn test_glob_filter_ignores_case() {
        let filter = GlobFilter::new("*S01E*").unwrap();
        assert!(filter.matches(&file("show.s01e02.mkv", 1)));
        assert!(!filter.matches(&file("show.s02e02.mkv", 1)));
        assert!(GlobFilter::new("[").is_err());
    }

    #[test]
    fn test_size_filter() {
        let filter = SizeFilter {
            min: Some(10),
            max: Some(100),
        };
        assert!(filter.matches(&file("a", 10)));
        assert!(filter.matches(&file("a", 100)));
        assert!(!filter.matches(&file("a", 9)));
        assert!(!filter.matches(&file("a", 101)));
        assert!(SizeFilter::default().matches(&file("a", 0)));
    }

    #[test]
    fn test_all_of_and_closures() {
        let filter = AllOf::new()
            .with(ExtensionFilter::parse("mp4"))
            .with(|f: &FileMetadata| f.name.starts_with("keep"));
        assert!(filter.matches(&file("keep.mp4", 1)));
        assert!(!filter.matches(&file("drop.mp4", 1)));
        assert!(!filter.matches(&file("keep.txt", 1)));
    }
}
