//! Engine behind the `ferry` offline mirror.
//!
//! Three stores share one [`Context`] (downloader, worker pool, reporter):
//! the crate mirror in [`mirror`], the toolchain store in [`toolchain`] and
//! the rustup store in [`rustup`].

pub mod archive;
pub mod changelog;
pub mod context;
pub mod dist;
pub mod download;
pub mod error;
pub mod integrity;
pub mod manifest;
pub mod mirror;
pub mod paths;
pub mod pool;
pub mod range;
pub mod rustup;
pub mod signature;
pub mod state;
pub mod toolchain;

pub mod reporter;

pub use changelog::{Changelog, CommitId, GitChangelog};
pub use context::Context;
pub use error::{MirrorError, Result};
pub use mirror::{Command, CrateMirror, CrateOptions, ListFormat, Phase};
pub use reporter::{LogReporter, NullReporter, Reporter};
pub use rustup::{RustupCommand, RustupOptions, RustupStore};
pub use toolchain::{ToolchainCommand, ToolchainOptions, ToolchainStore};

/// User Agent string for downloads
pub const USER_AGENT: &str = concat!("ferry/", env!("CARGO_PKG_VERSION"));
