//! Glob filters restricting an operation's working set.
//!
//! A filter is written `NAME[@VERSION]`; both halves are shell-style globs
//! matched case-insensitively. The version half defaults to `*`.

use std::path::Path;

use glob::{MatchOptions, Pattern};
use thiserror::Error;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Errors raised while compiling filters.
#[derive(Error, Debug)]
pub enum FilterError {
    /// A pattern the glob syntax rejects.
    #[error("invalid filter pattern '{pattern}': {source}")]
    Pattern {
        /// The whole `NAME[@VERSION]` argument.
        pattern: String,
        /// The glob error.
        #[source]
        source: glob::PatternError,
    },

    /// A filter file could not be read.
    #[error("failed to read filter file {path}: {source}")]
    Io {
        /// The filter file.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// A single `NAME[@VERSION]` glob pair.
#[derive(Debug, Clone)]
pub struct Filter {
    name: Pattern,
    version: Pattern,
}

impl Filter {
    /// Parse `NAME[@VERSION]`; a missing version matches every version.
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        let (name, version) = s.split_once('@').unwrap_or((s, "*"));
        let compile = |p: &str| {
            Pattern::new(p).map_err(|source| FilterError::Pattern {
                pattern: s.to_string(),
                source,
            })
        };
        Ok(Self {
            name: compile(name)?,
            version: compile(version)?,
        })
    }

    /// Whether both globs match, ignoring case.
    pub fn matches(&self, name: &str, version: &str) -> bool {
        self.name.matches_with(name, MATCH_OPTIONS)
            && self.version.matches_with(version, MATCH_OPTIONS)
    }
}

/// OR-combination of filters; an empty set matches everything.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    /// An empty set, matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every filter found in `arg`, which may hold several patterns
    /// separated by commas or whitespace.
    pub fn add_arg(&mut self, arg: &str) -> Result<(), FilterError> {
        for part in arg
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
        {
            self.filters.push(Filter::parse(part)?);
        }
        Ok(())
    }

    /// Add filters from a file, one or more per line; `#` starts a comment.
    pub fn add_file(&mut self, path: &Path) -> Result<(), FilterError> {
        let text = std::fs::read_to_string(path).map_err(|source| FilterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default();
            self.add_arg(line)?;
        }
        Ok(())
    }

    /// Whether any filter matches `name` and `version`.
    pub fn matches(&self, name: &str, version: &str) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.matches(name, version))
    }

    /// True when no filter was added.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Number of filters in the set.
    pub fn len(&self) -> usize {
        self.filters.len()
    }
}
