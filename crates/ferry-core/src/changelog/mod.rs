//! The versioned changelog behind a crate mirror.
//!
//! The crate index is a Git repository of per-package text files. The
//! mirror only needs a handful of operations on it, collected in
//! [`Changelog`]; [`GitChangelog`] implements them with `git2`, falling back
//! to the `git` executable for bundles, which libgit2 cannot read or write.

mod git;

use std::path::{Path, PathBuf};

pub use git::GitChangelog;

use crate::error::ChangelogError;

/// Branch tracking the upstream position after `fetch`.
pub const ORIGIN_BRANCH: &str = "origin_master";
/// Branch cargo reads from; moved only by `mark`.
pub const PUBLISH_BRANCH: &str = "master";
/// Integration branch checked out as HEAD.
pub const WORKING_BRANCH: &str = "working";
/// Last position fully processed by this mirror.
pub const MARK_BRANCH: &str = "mark";

/// A resolved commit. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(String);

impl CommitId {
    /// Wrap a full hex object id.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The full hex id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of merging upstream into the working branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Working already contains the incoming commit.
    UpToDate,
    /// Working moved forward to the incoming commit.
    FastForward(CommitId),
    /// A merge commit was created.
    Merged(CommitId),
    /// The histories could not be combined; nothing was changed.
    Conflict,
}

/// One changed index file between two commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// Path relative to the index root.
    pub path: String,
    /// Content before the change; `None` when the file was added.
    pub old: Option<Vec<u8>>,
    /// Content after the change; `None` when the file was deleted.
    pub new: Option<Vec<u8>>,
}

/// Operations the mirror needs from its changelog store.
///
/// All calls are blocking and assume a single writer.
pub trait Changelog {
    /// Resolve a branch name, ref or commit hash.
    fn resolve(&self, reference: &str) -> Result<Option<CommitId>, ChangelogError>;

    /// Position of a local branch, if it exists.
    fn read_branch(&self, name: &str) -> Result<Option<CommitId>, ChangelogError>;

    /// Create or move a local branch.
    fn write_branch(&self, name: &str, target: &CommitId) -> Result<(), ChangelogError>;

    /// Short name of the branch HEAD points at, if any.
    fn head_branch(&self) -> Result<Option<String>, ChangelogError>;

    /// Fetch `origin` and move the origin-tracking branch; returns its position.
    fn fetch(&self) -> Result<CommitId, ChangelogError>;

    /// Merge `incoming` into the working branch.
    fn merge(&self, incoming: &CommitId) -> Result<MergeOutcome, ChangelogError>;

    /// Hard-reset the working branch, index and tree to `target`.
    fn reset_to(&self, target: &CommitId) -> Result<(), ChangelogError>;

    /// Index files changed between `start` (or the empty tree) and `end`.
    fn diff(
        &self,
        start: Option<&CommitId>,
        end: &CommitId,
    ) -> Result<Vec<ChangedFile>, ChangelogError>;

    /// Write commits in `start..end` to a bundle file at `dest`.
    fn export_bundle(
        &self,
        start: Option<&CommitId>,
        end: &CommitId,
        dest: &Path,
    ) -> Result<(), ChangelogError>;

    /// Make `bundle` the content of `origin` and fetch it.
    fn import_bundle(&self, bundle: &Path) -> Result<CommitId, ChangelogError>;

    /// Path `origin` points at, when it is a local bundle.
    fn origin_bundle_path(&self) -> Result<PathBuf, ChangelogError>;

    /// Read a file from the working tree.
    fn read_file(&self, rel_path: &str) -> Result<Option<Vec<u8>>, ChangelogError>;

    /// Write a file into the working tree and commit it on the working branch.
    fn commit_file(
        &self,
        rel_path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<CommitId, ChangelogError>;
}
