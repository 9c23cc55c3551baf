//! Error taxonomy for mirror operations.
//!
//! Per-entry failures (`IntegrityError`, `TransportError`, `ParseWarning`)
//! are collected by the phase that produced them and only surface as a
//! single [`MirrorError::PhaseFailed`] at phase end. Everything else aborts
//! the running phase.

use std::path::PathBuf;

use ferry_schema::{ConfigError, FilterError};
use thiserror::Error;

use crate::manifest::ManifestError;

/// Failures of the versioned changelog (the crate index repository).
#[derive(Error, Debug)]
pub enum ChangelogError {
    /// libgit2 reported an error.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// A branch, commit or `HEAD` that does not resolve.
    #[error("unknown reference '{0}'")]
    UnknownRef(String),

    /// `init` found an existing index directory.
    #[error("index directory {0} already exists")]
    AlreadyExists(PathBuf),

    /// The directory holds no git repository.
    #[error("{0} is not a valid index directory")]
    NotAnIndex(PathBuf),

    /// The `origin` remote is missing or unusable.
    #[error("remote 'origin': {0}")]
    Remote(String),

    /// A `git` subprocess exited unsuccessfully.
    #[error("`git {args}` failed: {stderr}")]
    GitCommand {
        /// Arguments passed to `git`.
        args: String,
        /// What `git` printed on stderr.
        stderr: String,
    },

    /// Bundles need the `git` executable.
    #[error("git executable not found: {0}")]
    GitMissing(#[from] which::Error),

    /// Filesystem error inside the index.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file on disk does not match its recorded checksum.
#[derive(Error, Debug)]
pub enum IntegrityError {
    /// The file is absent.
    #[error("missing {0}")]
    Missing(PathBuf),

    /// The file hashes to something other than its recorded checksum.
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    Mismatch {
        /// The checked file.
        path: PathBuf,
        /// Recorded digest.
        expected: String,
        /// Digest of the bytes on disk.
        actual: String,
    },

    /// A `.sha256` sidecar that does not parse.
    #[error("invalid checksum file {path}: {reason}")]
    BadSidecar {
        /// The sidecar file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// A detached signature did not verify.
    #[error("signature check failed for {path}: {reason}")]
    Signature {
        /// The signed file.
        path: PathBuf,
        /// Verifier output.
        reason: String,
    },

    /// The file could not be read.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file being hashed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// A file could not be fetched from its source.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Request failed or returned an error status.
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        /// Requested URL.
        url: String,
        /// The reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// A local source file could not be read.
    #[error("failed to read {path}: {source}")]
    Local {
        /// Source path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The destination could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Either half of a download-then-verify step.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The fetch failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The fetched file failed its check.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// A malformed index line. Recorded and skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// Index file holding the line.
    pub path: String,
    /// 1-based line number.
    pub line: usize,
    /// Why the line was rejected.
    pub reason: String,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.path, self.line, self.reason)
    }
}

/// Failures reading or writing a transfer archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Reading, writing or extracting failed.
    #[error("archive IO error on {path}: {source}")]
    Io {
        /// Archive or extraction target.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The format marker names a layout this build cannot read.
    #[error("unknown archive format marker: {0}")]
    UnknownFormat(String),

    /// A member outside the expected layout.
    #[error("unexpected archive member {0}")]
    UnexpectedMember(String),

    /// A required member is absent.
    #[error("missing {0} in archive")]
    MissingMember(String),
}

/// Top-level error for a mirror run.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Crate index failure.
    #[error(transparent)]
    Changelog(#[from] ChangelogError),

    /// Checksum or signature failure.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Fetch failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Archive failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Bad or unsafe config record.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Bad `--filter` pattern or filter file.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Bad toolchain channel manifest.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Filesystem error outside any of the above.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Some entries of a phase failed.
    #[error("{phase} failed: {failed} bad, {succeeded} good")]
    PhaseFailed {
        /// Phase name.
        phase: String,
        /// Entries that failed.
        failed: usize,
        /// Entries that succeeded.
        succeeded: usize,
    },

    /// Ctrl-C stopped the run.
    #[error("interrupted")]
    Cancelled,

    /// Invalid combination of commands or options.
    #[error("{0}")]
    Usage(String),

    /// `mark` refused to publish an unverified position.
    #[error("refusing to publish {candidate}: {reason}")]
    Visibility {
        /// The commit `mark` was asked to publish.
        candidate: String,
        /// Why it is not publishable.
        reason: String,
    },
}

impl From<DownloadError> for MirrorError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Transport(e) => Self::Transport(e),
            DownloadError::Integrity(e) => Self::Integrity(e),
        }
    }
}

impl MirrorError {
    /// A [`MirrorError::Usage`] from any message.
    pub fn usage(msg: impl std::fmt::Display) -> Self {
        Self::Usage(msg.to_string())
    }
}

/// Result defaulting to [`MirrorError`].
pub type Result<T, E = MirrorError> = std::result::Result<T, E>;
