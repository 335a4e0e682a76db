//! Path applicability patterns and exception lists

use regex::Regex;
use std::fmt;

/// A compiled path pattern that must match the whole request path
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    /// Compile a pattern with full-string semantics
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Pattern matching every path
    pub fn any() -> Self {
        Self::new(".*").expect("static pattern compiles")
    }

    /// Whether the entire path matches
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The pattern as written in configuration
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

/// One carve-out in an exception list
#[derive(Debug, Clone)]
pub enum ExceptionEntry {
    /// Exact path equality
    Literal(String),
    /// Full-string pattern match
    Pattern(PathPattern),
}

impl ExceptionEntry {
    /// Literal entry
    pub fn literal(path: impl Into<String>) -> Self {
        Self::Literal(path.into())
    }

    /// Pattern entry
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        PathPattern::new(pattern).map(Self::Pattern)
    }

    /// Whether this entry covers the path
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == path,
            Self::Pattern(pattern) => pattern.matches(path),
        }
    }
}

/// Ordered exception entries; the first matching entry wins
#[derive(Debug, Clone, Default)]
pub struct ExceptionList {
    entries: Vec<ExceptionEntry>,
}

impl ExceptionList {
    pub fn new(entries: Vec<ExceptionEntry>) -> Self {
        Self { entries }
    }

    /// Position of the first entry covering the path
    pub fn first_match(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.matches(path))
    }

    pub fn entries(&self) -> &[ExceptionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ExceptionEntry> for ExceptionList {
    fn from_iter<I: IntoIterator<Item = ExceptionEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// How a path relates to a rule's scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    /// Path outside the applicability pattern
    Outside,
    /// Path inside the pattern but carved out by the exception at this index
    Excepted(usize),
    /// Rule applies
    Applies,
}

impl Applicability {
    pub fn is_applicable(self) -> bool {
        matches!(self, Self::Applies)
    }
}

/// Applicability pattern plus exception list, shared by every rule variant
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: PathPattern,
    exceptions: ExceptionList,
}

impl PathMatcher {
    pub fn new(pattern: PathPattern, exceptions: ExceptionList) -> Self {
        Self {
            pattern,
            exceptions,
        }
    }

    /// Matcher covering every path with no exceptions
    pub fn everywhere() -> Self {
        Self::new(PathPattern::any(), ExceptionList::default())
    }

    /// Decide applicability for a request path
    pub fn applies_to(&self, path: &str) -> Applicability {
        if !self.pattern.matches(path) {
            return Applicability::Outside;
        }
        match self.exceptions.first_match(path) {
            Some(index) => Applicability::Excepted(index),
            None => Applicability::Applies,
        }
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn exceptions(&self) -> &ExceptionList {
        &self.exceptions
    }
}
