//! ferry - offline mirror for Rust release artifacts
//!
//! Mirrors three things so they can be carried across an air gap:
//!
//! - the crates.io index (a git repository) and every `.crate` file it names
//! - toolchain channel manifests and the packages they list
//! - `rustup-init` binaries
//!
//! Each store is driven by a list of COMMANDs run in order, e.g.
//! `ferry crate update` or `ferry toolchain download pack --select stable`.
#![allow(clippy::doc_markdown)]

pub mod cmd;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ferry_core::context::DEFAULT_NUM_JOBS;
use ferry_core::{Command, RustupCommand, ToolchainCommand};
use ferry_schema::PrefixStyle;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT: u64 = 60;

/// ferry - offline mirror for crates, toolchains and rustup
#[derive(Debug, Parser)]
#[command(name = "ferry")]
#[command(author, version)]
pub struct Cli {
    /// More log output (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Less log output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Concurrent downloads; 0 means one per CPU
    #[arg(
        long,
        short = 'j',
        global = true,
        env = "FERRY_NUM_JOBS",
        default_value_t = DEFAULT_NUM_JOBS
    )]
    pub num_jobs: usize,

    /// Per-request timeout in seconds; 0 disables it
    #[arg(long, global = true, env = "FERRY_TIMEOUT", default_value_t = DEFAULT_TIMEOUT)]
    pub timeout: u64,

    /// Store to operate on
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log filter directive for the `-v`/`-q` counts.
    pub fn log_level(&self) -> &'static str {
        match i16::from(self.verbose) - i16::from(self.quiet) {
            i16::MIN..=-1 => "warn",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Worker count, resolving 0 to the number of CPUs.
    pub fn jobs(&self) -> usize {
        if self.num_jobs == 0 {
            num_cpus::get()
        } else {
            self.num_jobs
        }
    }
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Mirror the crate index and `.crate` files
    #[command(name = "crate")]
    Crate(CrateArgs),
    /// Mirror toolchain manifests and packages
    Toolchain(ToolchainArgs),
    /// Mirror rustup-init binaries
    Rustup(RustupArgs),
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Arguments of `ferry crate`.
#[derive(Debug, Args)]
pub struct CrateArgs {
    /// init, init-import, pull, prune, download, verify, pack, unpack, mark,
    /// config, list, or the composites update, export, import
    #[arg(value_name = "COMMAND", required = true)]
    pub commands: Vec<Command>,

    /// Crate index repository
    #[arg(long, default_value = ferry_core::mirror::DEFAULT_INDEX)]
    pub index: PathBuf,

    /// Root of the `.crate` file store
    #[arg(long = "crates", default_value = ferry_core::mirror::DEFAULT_CRATES)]
    pub crates_root: PathBuf,

    /// Archive written by pack and read by unpack
    #[arg(long, default_value = ferry_core::mirror::DEFAULT_ARCHIVE)]
    pub archive: PathBuf,

    /// Index bundle file for pack (and the origin expected by unpack)
    #[arg(long)]
    pub bundle_path: Option<PathBuf>,

    /// Upstream index for init
    #[arg(long, default_value = ferry_core::mirror::DEFAULT_INDEX_URL)]
    pub index_url: String,

    /// Source of `.crate` files; {crate}, {version}, {prefix}, {lowerprefix}
    #[arg(long, default_value = ferry_core::mirror::DEFAULT_CRATES_URL)]
    pub crates_url: String,

    /// Base URL the mirror is served from, for config
    #[arg(long, default_value = ferry_core::mirror::DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Start of the range (default: the mark branch; 0 for all history)
    #[arg(long)]
    pub start: Option<String>,

    /// End of the range
    #[arg(long, default_value = ferry_core::mirror::DEFAULT_END)]
    pub end: String,

    /// Treat a missing START as the beginning of history
    #[arg(long)]
    pub allow_missing_start: bool,

    /// NAME[@VERSION] glob; may repeat or hold several comma-separated
    #[arg(long = "filter")]
    pub filters: Vec<String>,

    /// File of filters, one or more per line
    #[arg(long = "filter-file")]
    pub filter_files: Vec<PathBuf>,

    /// Carry on past failed entries
    #[arg(long, short = 'k')]
    pub keep_going: bool,

    /// Trust existing files without hashing them
    #[arg(long)]
    pub assume_ok: bool,

    /// Write name@version of each good entry here
    #[arg(long)]
    pub good_paths: Option<PathBuf>,

    /// Write name@version of each bad entry here
    #[arg(long)]
    pub bad_paths: Option<PathBuf>,

    /// list: print store paths
    #[arg(long, conflicts_with = "show_hash")]
    pub show_path: bool,

    /// list: print `<sha256> *<path>` lines
    #[arg(long)]
    pub show_hash: bool,

    /// Store prefix casing chosen at init
    #[arg(long)]
    pub prefix: Option<PrefixStyle>,

    /// Archive prefix casing chosen at init
    #[arg(long)]
    pub archive_prefix: Option<PrefixStyle>,
}

/// Arguments of `ferry toolchain`.
#[derive(Debug, Args)]
pub struct ToolchainArgs {
    /// fetch-manifest, download, verify, list, all-targets, all-components,
    /// pack, unpack, fixup
    #[arg(value_name = "COMMAND", required = true)]
    pub commands: Vec<ToolchainCommand>,

    /// Toolchain store
    #[arg(long, default_value = ferry_core::toolchain::DEFAULT_DEST)]
    pub dest: PathBuf,

    /// Upstream dist URL (default: $RUSTUP_DIST_SERVER/dist)
    #[arg(long)]
    pub url: Option<String>,

    /// Archive written by pack and read by unpack
    #[arg(long, default_value = ferry_core::toolchain::DEFAULT_ARCHIVE)]
    pub archive: PathBuf,

    /// Toolchain SPEC, e.g. stable, nightly-2024-01-31, 1.75.0, *
    #[arg(long = "select", short = 's')]
    pub specs: Vec<String>,

    /// Target triple, `all`, `*`, or an alias (linux, windows, darwin)
    #[arg(long = "target", short = 't')]
    pub targets: Vec<String>,

    /// Component to include, or `!name` to exclude
    #[arg(long = "component")]
    pub components: Vec<String>,

    /// Only fetch the standard library for each target
    #[arg(long)]
    pub cross: bool,

    /// Trust existing files without hashing them
    #[arg(long)]
    pub assume_ok: bool,

    /// Skip `.asc` signature files
    #[arg(long, conflicts_with = "warn_signature")]
    pub no_signature: bool,

    /// Report bad signatures as warnings
    #[arg(long)]
    pub warn_signature: bool,

    /// GnuPG home holding the Rust release key
    #[arg(long)]
    pub gpg_homedir: Option<PathBuf>,
}

/// Arguments of `ferry rustup`.
#[derive(Debug, Args)]
pub struct RustupArgs {
    /// download, verify, list, all-targets, pack, unpack, fixup
    #[arg(value_name = "COMMAND", required = true)]
    pub commands: Vec<RustupCommand>,

    /// rustup store
    #[arg(long, default_value = ferry_core::rustup::DEFAULT_DEST)]
    pub dest: PathBuf,

    /// Upstream root (default: $RUSTUP_UPDATE_ROOT)
    #[arg(long)]
    pub url: Option<String>,

    /// Archive written by pack and read by unpack
    #[arg(long, default_value = ferry_core::rustup::DEFAULT_ARCHIVE)]
    pub archive: PathBuf,

    /// rustup version: X.Y.Z, stable, latest, *
    #[arg(long = "select", short = 's')]
    pub specs: Vec<String>,

    /// Target triple, `all`, `*`, or an alias (linux, windows, darwin)
    #[arg(long = "target", short = 't')]
    pub targets: Vec<String>,

    /// Trust existing files without hashing them
    #[arg(long)]
    pub assume_ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        let cli = Cli::parse_from(["ferry", "-q", "crate", "list"]);
        assert_eq!(cli.log_level(), "warn");
        let cli = Cli::parse_from(["ferry", "crate", "list", "-vv"]);
        assert_eq!(cli.log_level(), "trace");
        let cli = Cli::parse_from(["ferry", "crate", "list"]);
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn crate_commands_parse() {
        let cli = Cli::parse_from([
            "ferry",
            "crate",
            "init",
            "update",
            "--filter",
            "serde*,tokio@1.*",
            "--prefix",
            "mixed",
        ]);
        let Commands::Crate(args) = cli.command else {
            panic!("expected crate subcommand");
        };
        assert_eq!(
            args.commands,
            [Command::Phase(ferry_core::Phase::Init), Command::Update]
        );
        assert_eq!(args.prefix, Some(PrefixStyle::Mixed));
        assert!(Cli::try_parse_from(["ferry", "crate", "fetch"]).is_err());
        assert!(
            Cli::try_parse_from(["ferry", "crate", "list", "--show-path", "--show-hash"]).is_err()
        );
    }

    #[test]
    fn num_jobs_zero_uses_cpus() {
        let cli = Cli::parse_from(["ferry", "--num-jobs", "0", "rustup", "list"]);
        assert!(cli.jobs() >= 1);
    }
}
