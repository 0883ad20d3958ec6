//! Keyword store with lock-free snapshot swapping.
//!
//! The active keyword list lives behind an [`ArcSwap`]. Each evaluation grabs
//! an `Arc<KeywordSet>` snapshot, and a reload builds a complete new set before
//! swapping the pointer, so a reader can never see a half-applied list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::error::{Result, WatchError};

/// Upstream hard limit on the comma-joined track filter, in bytes.
pub const MAX_FILTER_BYTES: usize = 60;

/// A single keyword pattern, matched case-insensitively.
#[derive(Debug, Clone)]
pub struct Keyword {
    pattern: String,
    matcher: Regex,
}

impl Keyword {
    /// Compile a pattern.
    ///
    /// Patterns are tried as regular expressions first. Entries that are not
    /// valid regex syntax (`c++`, `[beta`) are matched literally instead.
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let matcher = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                debug!(pattern = %pattern, error = %e, "Keyword is not a valid regex, matching literally");
                RegexBuilder::new(&regex::escape(&pattern))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        WatchError::config(format!("cannot compile keyword {pattern:?}: {e}"))
                    })?
            }
        };
        Ok(Self { pattern, matcher })
    }

    /// The pattern as written in the source file.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Count non-overlapping, non-empty occurrences in `text`.
    pub fn count_in(&self, text: &str) -> usize {
        self.matcher
            .find_iter(text)
            .filter(|m| !m.is_empty())
            .count()
    }
}

/// An immutable, validated, ordered keyword list.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    keywords: Vec<Keyword>,
    filter: String,
}

impl KeywordSet {
    /// Build a set from newline-delimited source text.
    ///
    /// Blank lines are dropped and order is preserved. Fails when nothing is
    /// left or when the joined filter exceeds [`MAX_FILTER_BYTES`].
    pub fn parse(content: &str) -> Result<Self> {
        let patterns: Vec<&str> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();
        Self::from_patterns(patterns)
    }

    /// Build a set from already split patterns.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        if patterns.is_empty() {
            return Err(WatchError::config("keyword list is empty"));
        }

        let filter = patterns.join(",");
        if filter.len() > MAX_FILTER_BYTES {
            return Err(WatchError::config(format!(
                "keyword filter is {} bytes, upstream limit is {} bytes",
                filter.len(),
                MAX_FILTER_BYTES
            )));
        }

        let keywords = patterns
            .into_iter()
            .map(Keyword::new)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { keywords, filter })
    }

    /// Comma-joined subscription filter.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Keyword> {
        self.keywords.iter()
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Patterns in store order.
    pub fn patterns(&self) -> Vec<&str> {
        self.keywords.iter().map(Keyword::pattern).collect()
    }
}

impl<'a> IntoIterator for &'a KeywordSet {
    type Item = &'a Keyword;
    type IntoIter = std::slice::Iter<'a, Keyword>;

    fn into_iter(self) -> Self::IntoIter {
        self.keywords.iter()
    }
}

/// Owner of the active keyword list and the file it was loaded from.
pub struct KeywordStore {
    source: PathBuf,
    active: ArcSwap<KeywordSet>,
}

impl KeywordStore {
    /// Load the initial keyword list from `source`.
    pub fn open(source: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();
        let set = read_keyword_file(&source)?;
        info!(
            path = %source.display(),
            count = set.len(),
            filter = %set.filter(),
            "Loaded keywords"
        );
        Ok(Self {
            source,
            active: ArcSwap::from_pointee(set),
        })
    }

    /// Build a store around an in-memory set. The source path is used by [`reload`](Self::reload).
    pub fn with_set(source: impl Into<PathBuf>, set: KeywordSet) -> Self {
        Self {
            source: source.into(),
            active: ArcSwap::from_pointee(set),
        }
    }

    /// Re-read the source file and swap in the new list.
    ///
    /// On failure the previous list stays active.
    pub fn reload(&self) -> Result<usize> {
        let set = read_keyword_file(&self.source)?;
        let count = set.len();
        info!(
            path = %self.source.display(),
            count,
            filter = %set.filter(),
            "Reloaded keywords"
        );
        self.active.store(Arc::new(set));
        Ok(count)
    }

    /// Put back a list taken earlier with [`snapshot`](Self::snapshot).
    pub fn restore(&self, set: Arc<KeywordSet>) {
        info!(
            count = set.len(),
            filter = %set.filter(),
            "Restored keywords"
        );
        self.active.store(set);
    }

    /// Comma-joined filter of the active list.
    pub fn subscription_filter(&self) -> String {
        self.active.load().filter().to_string()
    }

    /// Point-in-time view of the active list.
    pub fn snapshot(&self) -> Arc<KeywordSet> {
        self.active.load_full()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.active.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.load().is_empty()
    }
}

fn read_keyword_file(path: &Path) -> Result<KeywordSet> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| WatchError::config(format!("cannot read {}: {}", path.display(), e)))?;
    KeywordSet::parse(&content)
}
