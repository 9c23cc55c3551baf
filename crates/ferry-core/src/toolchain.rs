//! Toolchain store: channel manifests and the packages they list.
//!
//! DEST mirrors the upstream `dist/` tree. Each channel manifest and each
//! package `.tar.xz` sits next to its `.sha256` sidecar (and, for signed
//! files, an `.asc` signature). Which packages to fetch is decided by the
//! manifest, the requested targets and component filters.

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::archive::{ArchiveWriter, read_members};
use crate::context::Context;
use crate::dist::{
    Transfer, TransferMode, normalize_targets, require_specs, require_targets,
    reversed_date_dirs, split_words, transfer_all, url_join,
};
use crate::error::{ArchiveError, IntegrityError, MirrorError, Result};
use crate::integrity::{self, sidecar_path};
use crate::manifest::{Manifest, Package, TargetType};
use crate::paths::{ensure_parent, join_relative, path_append};
use crate::signature::{SIG_SUFFIX, SignatureCheck};

/// Used when `RUSTUP_DIST_SERVER` is unset.
pub const DEFAULT_DIST_SERVER: &str = "https://static.rust-lang.org";
/// Default toolchain store.
pub const DEFAULT_DEST: &str = "dist";
/// Default toolchain archive.
pub const DEFAULT_ARCHIVE: &str = "toolchain.tar.gz";
const ARCHIVE_PREFIX: &str = "dist/";

static SPEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<channel>nightly|beta|stable|\*|\d+\.\d+\.\d+)(?:-(?P<date>\d{4}-\d{2}-\d{2}|latest|\*))?$",
    )
    .unwrap()
});
static DATE_SPEC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<date>\d{4}-\d{2}-\d{2}|latest|\*)$").unwrap());
static PACKED_MANIFEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<date>\d{4}-\d{2}-\d{2})/channel-rust-(?P<channel>nightly|stable|beta)\.toml$")
        .unwrap()
});

/// `$RUSTUP_DIST_SERVER/dist`.
pub fn default_url() -> String {
    let server = std::env::var("RUSTUP_DIST_SERVER")
        .unwrap_or_else(|_| DEFAULT_DIST_SERVER.to_string());
    url_join(&server, "dist")
}

/// Split a SPEC into `(date, channel)`. An empty date means the undated
/// (latest published) manifest.
///
/// A lone `*` is a wildcard date over every channel.
pub fn parse_spec(spec: &str) -> Result<(String, String)> {
    if spec == "*" {
        return Ok(("*".to_string(), "*".to_string()));
    }
    if let Some(caps) = SPEC_RE.captures(spec) {
        let date = caps.name("date").map_or("", |m| m.as_str());
        return Ok((date.to_string(), caps["channel"].to_string()));
    }
    if let Some(caps) = DATE_SPEC_RE.captures(spec) {
        return Ok((caps["date"].to_string(), "*".to_string()));
    }
    Err(MirrorError::usage(format!("invalid SPEC '{spec}'")))
}

fn is_wild(date: &str, channel: &str) -> bool {
    date == "*" || channel == "*" || date == "latest"
}

/// `[date/]channel-rust-<channel>.toml`
pub fn channel_rel_path(date: &str, channel: &str) -> String {
    let name = format!("channel-rust-{channel}.toml");
    if date.is_empty() {
        name
    } else {
        format!("{date}/{name}")
    }
}

/// One toolchain COMMAND, run in the order given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainCommand {
    /// Fetch and verify channel manifests.
    FetchManifest,
    /// Fetch the packages the manifests list, then `fixup`.
    Download,
    /// Re-hash every selected file.
    Verify,
    /// Print the selected toolchains.
    List,
    /// Print every target the manifests know.
    AllTargets,
    /// Print every component the manifests know.
    AllComponents,
    /// Write the selected files to an archive.
    Pack,
    /// Extract an archive, then `verify` and `fixup`.
    Unpack,
    /// Publish the undated manifests, and stable version aliases, from the
    /// selected dated ones.
    Fixup,
}

impl FromStr for ToolchainCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "fetch-manifest" => Self::FetchManifest,
            "download" => Self::Download,
            "verify" => Self::Verify,
            "list" => Self::List,
            "all-targets" => Self::AllTargets,
            "all-components" => Self::AllComponents,
            "pack" => Self::Pack,
            "unpack" => Self::Unpack,
            "fixup" => Self::Fixup,
            other => return Err(format!("invalid toolchain command '{other}'")),
        })
    }
}

/// Settings for a [`ToolchainStore`].
#[derive(Debug, Clone)]
pub struct ToolchainOptions {
    /// Store root, laid out like `/dist` upstream.
    pub dest: PathBuf,
    /// Upstream dist URL.
    pub url: String,
    /// Archive for `pack` and `unpack`.
    pub archive: PathBuf,
    /// Toolchain SPECs, e.g. `stable` or `nightly-2024-01-31`.
    pub specs: Vec<String>,
    /// Target triples, aliases, `all` or `*`.
    pub targets: Vec<String>,
    /// Component names; `!name` excludes.
    pub components: Vec<String>,
    /// Fetch only `rust-std`.
    pub cross: bool,
    /// Trust existing files without hashing them.
    pub assume_ok: bool,
    /// Signature policy for manifests.
    pub signature: SignatureCheck,
}

impl Default for ToolchainOptions {
    fn default() -> Self {
        Self {
            dest: PathBuf::from(DEFAULT_DEST),
            url: default_url(),
            archive: PathBuf::from(DEFAULT_ARCHIVE),
            specs: Vec::new(),
            targets: Vec::new(),
            components: Vec::new(),
            cross: false,
            assume_ok: false,
            signature: SignatureCheck::disabled(),
        }
    }
}

/// Mirror of toolchain channel manifests and the packages they list.
pub struct ToolchainStore {
    ctx: Context,
    opts: ToolchainOptions,
    specs: Vec<String>,
    targets: Vec<String>,
    includes: BTreeSet<String>,
    excludes: BTreeSet<String>,
    out: Box<dyn Write + Send>,
}

impl std::fmt::Debug for ToolchainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolchainStore")
            .field("dest", &self.opts.dest)
            .field("specs", &self.specs)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

impl ToolchainStore {
    /// A store over `opts`, printing listings to stdout.
    pub fn new(ctx: Context, opts: ToolchainOptions) -> Self {
        let mut includes = BTreeSet::new();
        let mut excludes = BTreeSet::new();
        for name in split_words(&opts.components) {
            match name.strip_prefix('!') {
                Some(excluded) => excludes.insert(excluded.to_string()),
                None => includes.insert(name),
            };
        }
        Self {
            specs: split_words(&opts.specs),
            targets: normalize_targets(&opts.targets),
            ctx,
            opts,
            includes,
            excludes,
            out: Box::new(std::io::stdout()),
        }
    }

    /// Send listing output somewhere other than stdout.
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = out;
        self
    }

    /// Specs in effect; `unpack` replaces them with what it found.
    pub fn specs(&self) -> &[String] {
        &self.specs
    }

    /// Targets in effect after alias expansion.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Run `commands` in order, stopping at the first failure.
    pub async fn run(&mut self, commands: &[ToolchainCommand]) -> Result<()> {
        if commands.is_empty() {
            self.ctx.reporter.info("nothing to do; try a COMMAND");
        }
        for cmd in commands {
            if self.ctx.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            match cmd {
                ToolchainCommand::FetchManifest => self.cmd_fetch_manifest().await?,
                ToolchainCommand::Download => {
                    self.cmd_download().await?;
                    self.cmd_fixup().await?;
                }
                ToolchainCommand::Verify => self.cmd_verify().await?,
                ToolchainCommand::List => self.cmd_list().await?,
                ToolchainCommand::AllTargets => self.cmd_all_targets().await?,
                ToolchainCommand::AllComponents => self.cmd_all_components().await?,
                ToolchainCommand::Pack => self.cmd_pack().await?,
                ToolchainCommand::Unpack => {
                    self.cmd_unpack().await?;
                    self.cmd_verify().await?;
                    self.cmd_fixup().await?;
                }
                ToolchainCommand::Fixup => self.cmd_fixup().await?,
            }
        }
        Ok(())
    }

    fn component_enabled(&self, name: &str) -> bool {
        !self.excludes.contains(name) && (self.includes.is_empty() || self.includes.contains(name))
    }

    fn component_status(&self) {
        if !self.includes.is_empty() {
            let names: Vec<&str> = self.includes.iter().map(String::as_str).collect();
            self.ctx
                .reporter
                .info(&format!("  components limited to: {}", names.join(", ")));
        }
        if !self.excludes.is_empty() {
            let names: Vec<&str> = self.excludes.iter().map(String::as_str).collect();
            self.ctx
                .reporter
                .info(&format!("  components excluded: {}", names.join(", ")));
        }
    }

    fn dest_path(&self, rel_path: &str) -> PathBuf {
        self.opts.dest.join(rel_path)
    }

    fn is_downloaded(&self, rel_path: &str) -> bool {
        self.dest_path(rel_path).is_file()
    }

    fn manifest_path(&self, date: &str, channel: &str) -> PathBuf {
        self.dest_path(&channel_rel_path(date, channel))
    }

    async fn get_manifest(&self, date: &str, channel: &str, download: bool) -> Result<Manifest> {
        let rel_path = channel_rel_path(date, channel);
        let path = self.dest_path(&rel_path);
        if download {
            // The undated manifest moves upstream and fixup rewrites it
            // locally, so it is never trusted from disk.
            let cached = !date.is_empty();
            self.ctx
                .downloader
                .download_verify(
                    &url_join(&self.opts.url, &rel_path),
                    &path,
                    cached,
                    false,
                    &self.opts.signature,
                )
                .await?;
        } else {
            self.ctx.downloader.verify(&path, &self.opts.signature).await?;
        }
        Ok(Manifest::from_path(&path)?)
    }

    /// Load the manifest for `spec`. With `canonical`, a manifest reached
    /// through an alias (`stable`, a version number) is re-read from its
    /// dated `channel-date` location, copying it there if needed.
    async fn select_manifest(
        &self,
        spec: &str,
        download: bool,
        canonical: bool,
    ) -> Result<Manifest> {
        let (date, channel) = parse_spec(spec)?;
        let manifest = self.get_manifest(&date, &channel, download).await?;
        if canonical && (manifest.date() != date || manifest.channel() != channel) {
            let dst = self.manifest_path(manifest.date(), manifest.channel());
            if download && !dst.exists() {
                self.copy_manifest(&self.manifest_path(&date, &channel), &dst)?;
            }
            let (date, channel) = (manifest.date().to_string(), manifest.channel());
            return self.get_manifest(&date, channel, download).await;
        }
        Ok(manifest)
    }

    fn channels_in_date(&self, date: &str) -> Vec<String> {
        let dir = self.opts.dest.join(date);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut channels: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                name.strip_prefix("channel-rust-")?
                    .strip_suffix(".toml")
                    .map(str::to_string)
            })
            .collect();
        channels.sort();
        channels
    }

    fn adjust_download_specs(&self) -> Result<Vec<String>> {
        for spec in &self.specs {
            let (date, channel) = parse_spec(spec)?;
            if is_wild(&date, &channel) {
                return Err(MirrorError::usage(format!("invalid wild SPEC: {spec}")));
            }
        }
        require_specs(self.specs.clone())
    }

    fn expand_wild_spec(&self, spec: &str) -> Result<Vec<String>> {
        let (date, channel) = parse_spec(spec)?;
        let mut specs = Vec::new();
        if is_wild(&date, &channel) {
            let wanted: Vec<&str> = if channel == "*" {
                vec!["nightly", "beta", "stable"]
            } else {
                vec![channel.as_str()]
            };
            let dates = if date == "*" || date == "latest" {
                reversed_date_dirs(&self.opts.dest)
            } else {
                vec![date.clone()]
            };
            for d in dates {
                let present = self.channels_in_date(&d);
                for ch in &present {
                    if wanted.contains(&ch.as_str()) {
                        specs.push(format!("{ch}-{d}"));
                    }
                }
                if date == "latest" && !specs.is_empty() {
                    break;
                }
            }
        } else {
            specs.push(spec.to_string());
        }
        if specs.is_empty() {
            return Err(MirrorError::usage(format!("no matches for wild SPEC '{spec}'")));
        }
        Ok(specs)
    }

    fn adjust_wild_specs(&self) -> Result<Vec<String>> {
        let mut specs = Vec::new();
        for spec in &self.specs {
            specs.extend(self.expand_wild_spec(spec)?);
        }
        require_specs(specs)
    }

    fn downloaded_target_types(
        &self,
        manifest: &Manifest,
    ) -> std::collections::BTreeMap<String, TargetType> {
        let present = |rel: &str| self.is_downloaded(rel);
        manifest.available_target_types(None, Some(&present))
    }

    fn adjust_targets(&self, manifest: &Manifest, base_targets: &[String]) -> Result<Vec<String>> {
        let all: BTreeSet<String> = manifest.all_targets().into_iter().collect();
        let mut targets = BTreeSet::new();
        for target in base_targets {
            match target.as_str() {
                "all" => targets.extend(all.iter().cloned()),
                "*" => targets.extend(self.downloaded_target_types(manifest).into_keys()),
                t if !all.contains(t) => {
                    return Err(MirrorError::usage(format!(
                        "target '{t}' not found in manifest"
                    )));
                }
                t => {
                    targets.insert(t.to_string());
                }
            }
        }
        Ok(targets.into_iter().collect())
    }

    /// Packages of `targets` already on disk. Cross targets only count the
    /// packages actually present; other targets need everything available.
    fn downloaded_target_packages(
        &self,
        manifest: &Manifest,
        targets: &[String],
    ) -> BTreeSet<Package> {
        let present = |rel: &str| self.is_downloaded(rel);
        let mut packages = BTreeSet::new();
        for target in targets {
            let one = std::slice::from_ref(target);
            let mut target_packages: Vec<&Package> = manifest.available_packages(Some(one), None);
            let types = manifest.available_target_types(Some(one), Some(&present));
            if types.get(target) == Some(&TargetType::Cross) {
                target_packages.retain(|p| p.rel_path().is_ok_and(|rel| self.is_downloaded(rel)));
            }
            packages.extend(target_packages.into_iter().cloned());
        }
        packages
    }

    async fn cmd_fetch_manifest(&mut self) -> Result<()> {
        for spec in self.adjust_download_specs()? {
            self.ctx.reporter.section(&format!("Fetch manifest: {spec}"));
            let manifest = self.select_manifest(&spec, true, false).await?;
            self.ctx.reporter.info(&format!("  ident: {}", manifest.ident()));
        }
        Ok(())
    }

    async fn download_verify(
        &mut self,
        download: bool,
        specs: Vec<String>,
        base_targets: Vec<String>,
    ) -> Result<()> {
        let phase = if download { "Download" } else { "Verify" };
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for spec in specs {
            self.ctx.reporter.section(&format!("{phase}: {spec}"));
            self.component_status();
            let manifest = self.select_manifest(&spec, download, true).await?;
            self.ctx.reporter.info(&format!("  ident: {}", manifest.ident()));
            let targets = self.adjust_targets(&manifest, &base_targets)?;

            let packages: Vec<Package> = if download {
                manifest
                    .available_packages(Some(&targets), None)
                    .into_iter()
                    .filter(|p| !self.opts.cross || p.name == "rust-std")
                    .cloned()
                    .collect()
            } else {
                self.downloaded_target_packages(&manifest, &targets)
                    .into_iter()
                    .collect()
            };
            self.ctx.reporter.info(&format!(
                "  packages: {}, targets: {}",
                packages.len(),
                targets.len()
            ));

            let mut items = Vec::new();
            for package in packages {
                if !self.component_enabled(&package.name) {
                    continue;
                }
                let rel_path = package.rel_path()?;
                let dest = self.dest_path(rel_path);
                if !seen.insert(dest.clone()) {
                    tracing::debug!("[duplicate] {}", dest.display());
                    continue;
                }
                items.push(Transfer {
                    url: url_join(&self.opts.url, rel_path),
                    dest,
                    cached: true,
                });
            }

            let mode = if download {
                TransferMode::Download {
                    assume_ok: self.opts.assume_ok,
                }
            } else {
                TransferMode::Verify
            };
            transfer_all(&self.ctx, phase, items, mode, &self.opts.signature).await?;
        }
        Ok(())
    }

    async fn cmd_download(&mut self) -> Result<()> {
        let specs = self.adjust_download_specs()?;
        let targets = require_targets(&self.targets, None)?;
        self.download_verify(true, specs, targets).await
    }

    async fn cmd_verify(&mut self) -> Result<()> {
        let specs = self.adjust_wild_specs()?;
        let targets = require_targets(&self.targets, Some("*"))?;
        self.download_verify(false, specs, targets).await
    }

    async fn cmd_list(&mut self) -> Result<()> {
        for spec in self.adjust_wild_specs()? {
            let manifest = self.select_manifest(&spec, false, false).await?;
            let available_packages = manifest.available_packages(None, None).len();
            let available_targets = manifest.available_target_types(None, None).len();
            let present = |rel: &str| self.is_downloaded(rel);
            let packages = manifest.available_packages(None, Some(&present)).len();
            let types = self.downloaded_target_types(&manifest);

            let mut lines = vec![format!(
                "{:28} {:16} {:18}",
                manifest.ident(),
                format!("targets[{}/{available_targets}]", types.len()),
                format!("packages[{packages}/{available_packages}]"),
            )];
            lines.extend(
                types
                    .iter()
                    .map(|(target, kind)| format!("  {target:45} {kind}")),
            );
            for line in lines {
                writeln!(self.out, "{}", line.trim_end())?;
            }
        }
        Ok(())
    }

    async fn cmd_all_targets(&mut self) -> Result<()> {
        for spec in self.adjust_wild_specs()? {
            self.ctx.reporter.section(&format!("All targets: {spec}"));
            let manifest = self.select_manifest(&spec, false, false).await?;
            self.ctx.reporter.info(&format!("  ident: {}", manifest.ident()));
            for target in manifest.all_targets() {
                writeln!(self.out, "{target}")?;
            }
        }
        Ok(())
    }

    async fn cmd_all_components(&mut self) -> Result<()> {
        for spec in self.adjust_wild_specs()? {
            self.ctx.reporter.section(&format!("All components: {spec}"));
            let manifest = self.select_manifest(&spec, false, false).await?;
            self.ctx.reporter.info(&format!("  ident: {}", manifest.ident()));
            let names: BTreeSet<&str> = manifest
                .available_packages(None, None)
                .into_iter()
                .map(|p| p.name.as_str())
                .collect();
            for name in names {
                writeln!(self.out, "{name}")?;
            }
        }
        Ok(())
    }

    async fn cmd_pack(&mut self) -> Result<()> {
        let base_targets = require_targets(&self.targets, Some("*"))?;
        self.ctx
            .reporter
            .section(&format!("Packing archive: {}", self.opts.archive.display()));
        self.component_status();

        let mut writer = ArchiveWriter::create(&self.opts.archive)?;
        let mut seen: HashSet<String> = HashSet::new();
        for spec in self.adjust_wild_specs()? {
            self.ctx.reporter.info(&format!("Pack: {spec}"));
            let manifest = self.select_manifest(&spec, false, true).await?;
            self.ctx.reporter.info(&format!("  ident: {}", manifest.ident()));
            let targets = self.adjust_targets(&manifest, &base_targets)?;
            let packages = self.downloaded_target_packages(&manifest, &targets);
            self.ctx.reporter.info(&format!(
                "  packages: {}, targets: {}",
                packages.len(),
                targets.len()
            ));

            self.pack_rel_path(
                &mut writer,
                &mut seen,
                &channel_rel_path(manifest.date(), manifest.channel()),
            )?;
            for package in &packages {
                if self.component_enabled(&package.name) {
                    self.pack_rel_path(&mut writer, &mut seen, package.rel_path()?)?;
                }
            }
        }
        writer.finish()?;
        Ok(())
    }

    fn pack_rel_path(
        &self,
        writer: &mut ArchiveWriter,
        seen: &mut HashSet<String>,
        rel_path: &str,
    ) -> Result<()> {
        let mut parts = vec![rel_path.to_string(), format!("{rel_path}{}", integrity::HASH_SUFFIX)];
        if self.opts.signature.enabled() {
            parts.push(format!("{rel_path}{SIG_SUFFIX}"));
        }
        for rel in parts {
            if !seen.insert(rel.clone()) {
                tracing::debug!("[duplicate] {rel}");
                continue;
            }
            let path = self.dest_path(&rel);
            if !path.is_file() {
                return Err(IntegrityError::Missing(path).into());
            }
            writer.append_file(&format!("{ARCHIVE_PREFIX}{rel}"), &path)?;
        }
        Ok(())
    }

    async fn cmd_unpack(&mut self) -> Result<()> {
        let archive = self.opts.archive.clone();
        self.ctx
            .reporter
            .section(&format!("Unpacking archive: {}", archive.display()));

        let mut extracted: BTreeSet<String> = BTreeSet::new();
        let dest = self.opts.dest.clone();
        read_members(&archive, |member| {
            let rel = member
                .name
                .strip_prefix(ARCHIVE_PREFIX)
                .map(str::to_string)
                .ok_or_else(|| ArchiveError::UnexpectedMember(member.name.clone()))?;
            let path = join_relative(&dest, &rel)
                .ok_or_else(|| ArchiveError::UnexpectedMember(member.name.clone()))?;
            member.extract_to(&path)?;
            extracted.insert(rel);
            Ok(())
        })?;

        let specs = detect_specs(&extracted);
        let mut targets = self.detect_targets(&specs, &extracted).await?;

        self.ctx
            .reporter
            .info(&format!("Unpacked specs: {}", specs.len()));
        for spec in &specs {
            self.ctx.reporter.info(&format!("  {spec}"));
        }
        self.ctx
            .reporter
            .info(&format!("Unpacked targets: {}", targets.len()));
        for target in &targets {
            self.ctx.reporter.info(&format!("  {target}"));
        }

        // With `--target all` each spec may list different targets; if every
        // spec's targets were packed, carry on with `all`.
        if specs.len() > 1 {
            let detected: BTreeSet<&String> = targets.iter().collect();
            let mut have_all = true;
            for spec in &specs {
                let manifest = self.select_manifest(spec, false, false).await?;
                if !manifest
                    .available_target_types(None, None)
                    .keys()
                    .all(|t| detected.contains(t))
                {
                    have_all = false;
                    break;
                }
            }
            if have_all {
                targets = vec!["all".to_string()];
            }
        }

        self.specs = specs;
        self.targets = targets;
        Ok(())
    }

    async fn detect_targets(
        &self,
        specs: &[String],
        extracted: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let mut targets = BTreeSet::new();
        let present = |rel: &str| extracted.contains(rel);
        for spec in specs {
            let manifest = self.select_manifest(spec, false, false).await?;
            targets.extend(manifest.available_target_types(None, Some(&present)).into_keys());
        }
        Ok(targets.into_iter().collect())
    }

    fn copy_manifest(&self, src: &Path, dst: &Path) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        self.ctx.reporter.info(&format!("[publish] {}", dst.display()));
        ensure_parent(dst)?;
        std::fs::copy(src, dst)?;
        let digest = integrity::read_sidecar(&sidecar_path(src))?;
        integrity::write_sidecar_for(dst, &digest)?;
        if self.opts.signature.enabled() {
            std::fs::copy(path_append(src, SIG_SUFFIX), path_append(dst, SIG_SUFFIX))?;
        }
        Ok(())
    }

    fn write_manifest(&self, manifest: &Manifest, date: &str, channel: &str) -> Result<()> {
        let src = self.manifest_path(manifest.date(), manifest.channel());
        let dst = self.manifest_path(date, channel);
        self.copy_manifest(&src, &dst)
    }

    /// Publish the undated manifest (unless a newer one is already there)
    /// and, for stable, the version-numbered aliases.
    async fn write_manifest_variations(&self, manifest: &Manifest) -> Result<()> {
        let channel = manifest.channel();
        let top = self.manifest_path("", channel);
        let write_top = if top.is_file() {
            let current = self.get_manifest("", channel, false).await?;
            manifest.date() >= current.date()
        } else {
            true
        };
        if write_top {
            self.write_manifest(manifest, "", channel)?;
        }
        if channel == "stable" {
            self.write_manifest(manifest, manifest.date(), manifest.version())?;
            self.write_manifest(manifest, "", manifest.version())?;
        }
        Ok(())
    }

    async fn cmd_fixup(&mut self) -> Result<()> {
        for spec in self.adjust_wild_specs()? {
            self.ctx.reporter.section(&format!("Fixup: {spec}"));
            let manifest = self.select_manifest(&spec, false, true).await?;
            tracing::debug!("  ident: {}", manifest.ident());
            self.write_manifest_variations(&manifest).await?;
        }
        Ok(())
    }
}

fn detect_specs(rel_paths: &BTreeSet<String>) -> Vec<String> {
    rel_paths
        .iter()
        .filter_map(|rel| {
            let caps = PACKED_MANIFEST_RE.captures(rel)?;
            Some(format!("{}-{}", &caps["channel"], &caps["date"]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tokio_util::sync::CancellationToken;

    use crate::integrity::{hash_bytes, write_sidecar_for};
    use crate::manifest::tests::sample;
    use crate::reporter::NullReporter;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn ctx() -> Context {
        Context::from_settings(2, 0, CancellationToken::new(), Arc::new(NullReporter)).unwrap()
    }

    fn put(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        write_sidecar_for(&path, &hash_bytes(body)).unwrap();
    }

    /// An upstream `dist/` tree with a dated stable manifest and the
    /// undated alias pointing at it.
    fn upstream(root: &Path) {
        let manifest = sample("2020-03-12", "1.42.0 (b8cedc004 2020-03-09)");
        put(root, "2020-03-12/channel-rust-stable.toml", manifest.as_bytes());
        put(root, "channel-rust-stable.toml", manifest.as_bytes());
        for rel in [
            "2020-03-12/rust-src.tar.xz",
            "2020-03-12/rustc-x86_64-unknown-linux-gnu.tar.xz",
            "2020-03-12/rust-std-x86_64-unknown-linux-gnu.tar.xz",
            "2020-03-12/rust-std-wasm32-unknown-unknown.tar.xz",
        ] {
            put(root, rel, rel.as_bytes());
        }
    }

    #[test]
    fn spec_grammar() {
        let p = |s: &str| parse_spec(s).unwrap();
        assert_eq!(p("stable"), (String::new(), "stable".into()));
        assert_eq!(p("nightly-2020-04-08"), ("2020-04-08".into(), "nightly".into()));
        assert_eq!(p("1.42.0"), (String::new(), "1.42.0".into()));
        assert_eq!(p("beta-latest"), ("latest".into(), "beta".into()));
        assert_eq!(p("*-*"), ("*".into(), "*".into()));
        assert_eq!(p("*"), ("*".into(), "*".into()));
        assert_eq!(p("2020-01-01"), ("2020-01-01".into(), "*".into()));
        assert_eq!(p("latest"), ("latest".into(), "*".into()));
        assert!(parse_spec("stable-2020").is_err());
        assert!(parse_spec("1.42").is_err());
    }

    #[test]
    fn channel_paths() {
        assert_eq!(channel_rel_path("", "stable"), "channel-rust-stable.toml");
        assert_eq!(
            channel_rel_path("2020-03-12", "nightly"),
            "2020-03-12/channel-rust-nightly.toml"
        );
    }

    #[tokio::test]
    async fn download_fixup_pack_unpack() {
        let up = tempfile::tempdir().unwrap();
        upstream(up.path());
        let work = tempfile::tempdir().unwrap();
        let dest = work.path().join("dist");
        let archive = work.path().join("toolchain.tar.gz");

        let opts = ToolchainOptions {
            dest: dest.clone(),
            url: up.path().to_string_lossy().into_owned(),
            archive: archive.clone(),
            specs: vec!["stable".into()],
            targets: vec!["linux".into()],
            ..ToolchainOptions::default()
        };
        let mut store = ToolchainStore::new(ctx(), opts.clone());
        store.run(&[ToolchainCommand::Download]).await.unwrap();

        assert!(dest.join("2020-03-12/channel-rust-stable.toml").is_file());
        assert!(dest.join("2020-03-12/rustc-x86_64-unknown-linux-gnu.tar.xz").is_file());
        assert!(!dest.join("2020-03-12/rust-std-wasm32-unknown-unknown.tar.xz").exists());
        // fixup aliases for stable
        assert!(dest.join("channel-rust-1.42.0.toml").is_file());
        assert!(dest.join("2020-03-12/channel-rust-1.42.0.toml.sha256").is_file());
        integrity::verify_with_sidecar(&dest.join("channel-rust-1.42.0.toml")).unwrap();

        let mut packer = ToolchainStore::new(
            ctx(),
            ToolchainOptions {
                specs: vec!["*".into()],
                targets: Vec::new(),
                ..opts.clone()
            },
        );
        packer.run(&[ToolchainCommand::Pack]).await.unwrap();
        assert!(archive.is_file());

        let dest2 = work.path().join("dist2");
        let mut unpacker = ToolchainStore::new(
            ctx(),
            ToolchainOptions {
                dest: dest2.clone(),
                specs: Vec::new(),
                targets: Vec::new(),
                ..opts
            },
        );
        unpacker.run(&[ToolchainCommand::Unpack]).await.unwrap();
        assert_eq!(unpacker.specs(), ["stable-2020-03-12"]);
        assert_eq!(unpacker.targets(), ["x86_64-unknown-linux-gnu"]);
        assert!(dest2.join("channel-rust-stable.toml").is_file());
        assert!(dest2.join("2020-03-12/rust-src.tar.xz").is_file());
    }

    #[tokio::test]
    async fn list_and_components() {
        let up = tempfile::tempdir().unwrap();
        upstream(up.path());
        let work = tempfile::tempdir().unwrap();
        let opts = ToolchainOptions {
            dest: work.path().join("dist"),
            url: up.path().to_string_lossy().into_owned(),
            specs: vec!["stable-2020-03-12".into()],
            targets: vec!["wasm32-unknown-unknown".into()],
            components: vec!["!rust-src".into()],
            ..ToolchainOptions::default()
        };
        ToolchainStore::new(ctx(), opts.clone())
            .run(&[ToolchainCommand::Download])
            .await
            .unwrap();
        assert!(
            work.path()
                .join("dist/2020-03-12/rust-std-wasm32-unknown-unknown.tar.xz")
                .is_file()
        );
        assert!(!work.path().join("dist/2020-03-12/rust-src.tar.xz").exists());

        let out = Captured::default();
        let mut lister = ToolchainStore::new(
            ctx(),
            ToolchainOptions {
                specs: vec!["*".into()],
                ..opts
            },
        )
        .with_output(Box::new(out.clone()));
        lister
            .run(&[ToolchainCommand::List, ToolchainCommand::AllComponents])
            .await
            .unwrap();
        let text = out.text();
        assert!(text.starts_with("stable-2020-03-12(1.42.0)"));
        assert!(text.contains("wasm32-unknown-unknown"));
        assert!(text.contains("cross-target"));
        assert!(text.contains("\nrustc\n"));
    }

    #[tokio::test]
    async fn download_rejects_wild_specs() {
        let mut store = ToolchainStore::new(
            ctx(),
            ToolchainOptions {
                specs: vec!["stable-*".into()],
                targets: vec!["linux".into()],
                ..ToolchainOptions::default()
            },
        );
        let err = store.run(&[ToolchainCommand::Download]).await.unwrap_err();
        assert!(matches!(err, MirrorError::Usage(_)));
    }
}
