//! The crate mirror: a crates.io index clone plus the `.crate` files it
//! names, moved forward one range at a time.
//!
//! Each [`Phase`] is idempotent and can run on its own. A run resolves its
//! range lazily (START defaults to the `mark` branch, END to `HEAD`) and
//! caches the decoded entries until a phase moves HEAD. Publication to the
//! branches cargo reads goes through [`MirrorState`], so `mark` only moves
//! them to a position downloaded or verified earlier in the same run.

mod pack;
mod phase;
mod transfer;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use ferry_schema::{
    FilterSet, MirrorConfig, PackageEntry, PrefixStyle, REGISTRY_CONFIG_FILE, RegistryConfig,
    Sha256Digest, crate_rel_path,
};

pub use phase::{Command, Phase, expand, is_standalone_mark};

use crate::changelog::{Changelog, GitChangelog, MergeOutcome};
use crate::context::Context;
use crate::download::is_remote;
use crate::error::{ChangelogError, MirrorError, Result};
use crate::integrity;
use crate::paths::{is_case_insensitive, rel_path_string, remove_empty_parents};
use crate::range::{Range, range_entries, resolve_range};
use crate::state::MirrorState;

/// Default crate index clone.
pub const DEFAULT_INDEX: &str = "git/crates.io-index";
/// Default crates root.
pub const DEFAULT_CRATES: &str = "crates";
/// Default crate archive.
pub const DEFAULT_ARCHIVE: &str = "crates.tar.gz";
/// Where `.crate` files are fetched from by default.
pub const DEFAULT_CRATES_URL: &str =
    "https://static.crates.io/crates/{crate}/{crate}-{version}.crate";
/// Upstream index cloned by `init`.
pub const DEFAULT_INDEX_URL: &str = "https://github.com/rust-lang/crates.io-index";
/// Base URL written into `config.json` by `config`.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
/// START used when none is given; a missing branch means all of history.
pub const DEFAULT_START: &str = "mark";
/// END used when none is given.
pub const DEFAULT_END: &str = "HEAD";

/// Bundle file name inside INDEX that an imported index fetches from.
pub const ORIGIN_BUNDLE: &str = "origin.bundle";
const CONFIG_COMMIT_MESSAGE: &str = "Apply config.json adjustments";

/// How `list` prints entries. Deleted entries get a leading `-` in all forms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListFormat {
    /// `name@version`
    #[default]
    Spec,
    /// Store-relative path of the `.crate` file.
    Path,
    /// `<sha256> *<path>`, as read by `sha256sum -c`.
    Hash,
}

/// Settings for a [`CrateMirror`].
#[derive(Debug, Clone)]
pub struct CrateOptions {
    /// Crate index clone.
    pub index: PathBuf,
    /// Root of the `.crate` file store.
    pub crates_root: PathBuf,
    /// Archive for `pack` and `unpack`.
    pub archive: PathBuf,
    /// Bundle written by `pack`; when given to `unpack` it must be the
    /// index's `origin`.
    pub bundle_path: Option<PathBuf>,
    /// Upstream index for `init`.
    pub index_url: String,
    /// Source template for `.crate` files.
    pub crates_url: String,
    /// Base URL the mirror is served from.
    pub server_url: String,
    /// `None` means `mark`, tolerating its absence.
    pub start: Option<String>,
    /// Range end.
    pub end: String,
    /// Treat a START that does not resolve as the beginning of history.
    pub allow_missing_start: bool,
    /// Entries outside these filters are skipped.
    pub filters: FilterSet,
    /// Carry on past failed entries.
    pub keep_going: bool,
    /// Trust existing files without hashing them.
    pub assume_ok: bool,
    /// Where `download`/`verify` list good entries.
    pub good_paths: Option<PathBuf>,
    /// Where `download`/`verify` list bad entries.
    pub bad_paths: Option<PathBuf>,
    /// Output form of `list`.
    pub list_format: ListFormat,
    /// Store casing chosen at `init`.
    pub prefix: Option<PrefixStyle>,
    /// Archive casing chosen at `init`.
    pub archive_prefix: Option<PrefixStyle>,
}

impl Default for CrateOptions {
    fn default() -> Self {
        Self {
            index: PathBuf::from(DEFAULT_INDEX),
            crates_root: PathBuf::from(DEFAULT_CRATES),
            archive: PathBuf::from(DEFAULT_ARCHIVE),
            bundle_path: None,
            index_url: DEFAULT_INDEX_URL.to_string(),
            crates_url: DEFAULT_CRATES_URL.to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            start: None,
            end: DEFAULT_END.to_string(),
            allow_missing_start: false,
            filters: FilterSet::new(),
            keep_going: false,
            assume_ok: false,
            good_paths: None,
            bad_paths: None,
            list_format: ListFormat::default(),
            prefix: None,
            archive_prefix: None,
        }
    }
}

/// Drives the crate mirror through its phases.
pub struct CrateMirror {
    ctx: Context,
    opts: CrateOptions,
    entries: Option<(Range, Vec<PackageEntry>)>,
    state: MirrorState,
    out: Box<dyn Write + Send>,
}

impl std::fmt::Debug for CrateMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrateMirror")
            .field("index", &self.opts.index)
            .field("crates_root", &self.opts.crates_root)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CrateMirror {
    /// A mirror over `opts`, printing listings to stdout.
    pub fn new(ctx: Context, opts: CrateOptions) -> Self {
        Self {
            ctx,
            opts,
            entries: None,
            state: MirrorState::new(),
            out: Box::new(std::io::stdout()),
        }
    }

    /// Send `list` output somewhere other than stdout.
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = out;
        self
    }

    /// Run `commands` in order, stopping at the first failing phase.
    pub async fn run(&mut self, commands: &[Command]) -> Result<()> {
        let phases = expand(commands);
        if phases.is_empty() {
            self.ctx.reporter.info("nothing to do; try a COMMAND");
        }
        for (index, &phase) in phases.iter().enumerate() {
            if self.ctx.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            if is_standalone_mark(&phases, index) {
                self.state = MirrorState::forced();
            }
            self.ctx.reporter.section(phase.as_str());
            self.run_phase(phase).await?;
            if phase.moves_head() {
                self.entries = None;
            }
        }
        Ok(())
    }

    /// Run one phase on its own.
    async fn run_phase(&mut self, phase: Phase) -> Result<()> {
        match phase {
            Phase::Init => self.init(),
            Phase::InitImport => self.init_import(),
            Phase::Pull => self.pull(),
            Phase::Prune => self.prune(),
            Phase::Download => self.transfer(true).await,
            Phase::Verify => self.transfer(false).await,
            Phase::Pack => self.pack(),
            Phase::Unpack => self.unpack(),
            Phase::Mark => self.mark(),
            Phase::Config => self.config(),
            Phase::List => self.list(),
        }
    }

    fn open_index(&self) -> Result<GitChangelog> {
        Ok(GitChangelog::open(&self.opts.index)?)
    }

    /// Store casing, refusing `mixed` on a case-folding filesystem.
    fn store_config(&self) -> Result<MirrorConfig> {
        let root = &self.opts.crates_root;
        let config = MirrorConfig::load(root)?;
        if root.is_dir() {
            config.check_filesystem(root, is_case_insensitive(root)?)?;
        }
        Ok(config)
    }

    fn store_path(&self, entry: &PackageEntry, style: PrefixStyle) -> PathBuf {
        self.opts
            .crates_root
            .join(crate_rel_path(&entry.name, &entry.version, style))
    }

    /// Entries of the current range that pass the filters, in range order.
    fn range_entries(&mut self, index: &GitChangelog) -> Result<(Range, Vec<PackageEntry>)> {
        if let Some(cached) = &self.entries {
            return Ok(cached.clone());
        }
        let (start, allow_missing) = match &self.opts.start {
            Some(start) => (start.as_str(), self.opts.allow_missing_start),
            None => (DEFAULT_START, true),
        };
        let range = resolve_range(index, start, &self.opts.end, allow_missing)?;
        tracing::debug!("[calculating crate list] {range}");
        let entries: Vec<PackageEntry> = range_entries(index, &range)?
            .entries
            .into_iter()
            .filter(|e| self.opts.filters.matches(&e.name, &e.version))
            .collect();
        tracing::debug!("[{} crates in range]", entries.len());
        self.entries = Some((range.clone(), entries.clone()));
        Ok((range, entries))
    }

    fn init_crates_root(&self) -> Result<()> {
        let root = &self.opts.crates_root;
        if !root.is_dir() {
            self.ctx
                .reporter
                .info(&format!("create crates directory at {}", root.display()));
            std::fs::create_dir_all(root)?;
        }
        if MirrorConfig::path(root).is_file() {
            tracing::debug!("keeping existing {}", MirrorConfig::path(root).display());
            return Ok(());
        }
        let defaults = MirrorConfig::default();
        let config = MirrorConfig {
            prefix: self.opts.prefix.unwrap_or(defaults.prefix),
            archive_prefix: self.opts.archive_prefix.unwrap_or(defaults.archive_prefix),
        };
        config.check_filesystem(root, is_case_insensitive(root)?)?;
        config.save(root)?;
        Ok(())
    }

    fn init(&mut self) -> Result<()> {
        let url = &self.opts.index_url;
        // A relative path in .git/config would be read relative to .git/.
        let origin = if is_remote(url) || url.contains("://") {
            url.clone()
        } else {
            std::path::absolute(url)?.to_string_lossy().into_owned()
        };
        GitChangelog::init(&self.opts.index, &origin)?;
        self.init_crates_root()
    }

    fn init_import(&mut self) -> Result<()> {
        let bundle = self.opts.index.join(ORIGIN_BUNDLE);
        GitChangelog::init_import(&self.opts.index, &bundle)?;
        self.init_crates_root()
    }

    fn pull(&mut self) -> Result<()> {
        let index = self.open_index()?;
        index.upgrade_to_working()?;
        let local_config = index.read_file(REGISTRY_CONFIG_FILE)?;

        let origin = index.fetch()?;
        tracing::debug!("fetched origin at {}", origin.short());
        match index.merge(&origin)? {
            MergeOutcome::UpToDate => self.ctx.reporter.info("index already up to date"),
            MergeOutcome::FastForward(id) => self
                .ctx
                .reporter
                .info(&format!("fast-forward to {}", id.short())),
            MergeOutcome::Merged(id) => self
                .ctx
                .reporter
                .info(&format!("merged origin/master as {}", id.short())),
            MergeOutcome::Conflict => {
                self.ctx
                    .reporter
                    .warning("merge failed; reconstructing from origin/master");
                index.reset_to(&origin)?;
                if let Some(local) = local_config {
                    reapply_file(&index, REGISTRY_CONFIG_FILE, &local)?;
                }
            }
        }
        Ok(())
    }

    fn prune(&mut self) -> Result<()> {
        let index = self.open_index()?;
        let (_, entries) = self.range_entries(&index)?;
        let config = self.store_config()?;
        let root = self.opts.crates_root.clone();

        // A crate deleted and re-added in the same range keeps its file when
        // that file already has the new checksum.
        let readded: HashMap<(&str, &str), &Sha256Digest> = entries
            .iter()
            .filter(|e| !e.deleted)
            .map(|e| ((e.name.as_str(), e.version.as_str()), &e.checksum))
            .collect();

        let mut removed = 0;
        for entry in entries.iter().filter(|e| e.deleted) {
            let path = self.store_path(entry, config.prefix);
            let current = readded.get(&(entry.name.as_str(), entry.version.as_str()));
            if current.is_some_and(|sum| integrity::verify_hash(&path, sum).is_ok()) {
                tracing::debug!("[keep] {}", path.display());
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    self.ctx.reporter.done(&entry.spec(), "pruned");
                    remove_empty_parents(&path, &root);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("[absent] {}", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.ctx.reporter.info(&format!("{removed} pruned crates"));
        Ok(())
    }

    fn mark(&mut self) -> Result<()> {
        let index = self.open_index()?;
        let end = index
            .resolve(&self.opts.end)?
            .ok_or_else(|| ChangelogError::UnknownRef(self.opts.end.clone()))?;
        self.state.publish(&index, &end)
    }

    fn config(&mut self) -> Result<()> {
        let index = self.open_index()?;
        let config = self.store_config()?;
        let wanted = RegistryConfig::for_server(&self.opts.server_url, config.prefix);
        let current = index
            .read_file(REGISTRY_CONFIG_FILE)?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|text| RegistryConfig::from_json(&text).ok());
        if current.as_ref() == Some(&wanted) {
            self.ctx.reporter.info("config.json already up to date");
            return Ok(());
        }
        let before = index.resolve("HEAD")?;
        let json = wanted.to_json()?;
        let after =
            index.commit_file(REGISTRY_CONFIG_FILE, json.as_bytes(), CONFIG_COMMIT_MESSAGE)?;
        self.ctx.reporter.info(&format!(
            "update-config: {REGISTRY_CONFIG_FILE} at {}",
            after.short()
        ));
        // The commit touches only config.json, so a range processed up to the
        // previous HEAD is still complete.
        if before.is_some() && self.state.processed() == before.as_ref() {
            self.state.record_processed(after);
        }
        Ok(())
    }

    fn list(&mut self) -> Result<()> {
        let index = self.open_index()?;
        let (_, entries) = self.range_entries(&index)?;
        let style = match self.opts.list_format {
            ListFormat::Spec => PrefixStyle::Lower,
            ListFormat::Path | ListFormat::Hash => self.store_config()?.prefix,
        };
        for entry in &entries {
            let line = format_entry(entry, self.opts.list_format, style);
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }
}

/// One `list` line for `entry`.
pub fn format_entry(entry: &PackageEntry, format: ListFormat, style: PrefixStyle) -> String {
    let sign = if entry.deleted { "-" } else { "" };
    let rel = || rel_path_string(&crate_rel_path(&entry.name, &entry.version, style));
    match format {
        ListFormat::Spec => entry.to_string(),
        ListFormat::Path => format!("{sign}{}", rel()),
        ListFormat::Hash => format!("{sign}{} *{}", entry.checksum, rel()),
    }
}

/// Commit `content` at `rel_path` unless the working tree already has it.
fn reapply_file(index: &GitChangelog, rel_path: &str, content: &[u8]) -> Result<()> {
    if index.read_file(rel_path)?.as_deref() == Some(content) {
        return Ok(());
    }
    tracing::info!("update-config: restoring local {rel_path}");
    index.commit_file(rel_path, content, CONFIG_COMMIT_MESSAGE)?;
    Ok(())
}

/// Store path for an archive member below `crates/`, re-deriving the
/// prefix from the crate directory name so archives of either casing land
/// in the store's layout.
fn store_rel_path(archive_rel: &str, style: PrefixStyle) -> Option<String> {
    let mut parts = archive_rel.rsplit('/');
    let file = parts.next()?;
    let name = parts.next()?;
    parts.next()?;
    if file.is_empty() || name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(format!(
        "{}/{name}/{file}",
        ferry_schema::crate_prefix(name, style)
    ))
}
