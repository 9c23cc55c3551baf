//! Rustup store: `rustup-init` binaries by version and target.
//!
//! Layout under DEST follows the upstream update root:
//! `archive/<version>/<target>/rustup-init[.exe]` plus `.sha256` sidecars,
//! `release-stable.toml` naming the current stable version, and `dist/`
//! holding a copy of that version's targets.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveWriter, read_members};
use crate::context::Context;
use crate::dist::{
    Transfer, TransferMode, exe_suffix, is_version, normalize_targets, replace_tree,
    require_specs, require_targets, split_words, subdir_names, transfer_all, url_join,
};
use crate::error::{ArchiveError, IntegrityError, MirrorError, Result};
use crate::integrity::HASH_SUFFIX;
use crate::paths::join_relative;
use crate::signature::SignatureCheck;

/// Used when `RUSTUP_UPDATE_ROOT` is unset.
pub const DEFAULT_UPDATE_ROOT: &str = "https://static.rust-lang.org/rustup";
/// Default rustup store.
pub const DEFAULT_DEST: &str = "rustup";
/// Default rustup archive.
pub const DEFAULT_ARCHIVE: &str = "rustup.tar.gz";

const ARCHIVE_PREFIX: &str = "rustup/";
const ARTIFACT_ROOT: &str = "archive";
const RELEASE_STABLE: &str = "release-stable.toml";

/// Targets published for rustup-init. Others are accepted with a warning.
pub const ALL_KNOWN_TARGETS: &[&str] = &[
    "aarch64-apple-darwin",
    "aarch64-linux-android",
    "aarch64-pc-windows-msvc",
    "aarch64-unknown-linux-gnu",
    "aarch64-unknown-linux-musl",
    "arm-linux-androideabi",
    "arm-unknown-linux-gnueabi",
    "arm-unknown-linux-gnueabihf",
    "armv7-linux-androideabi",
    "armv7-unknown-linux-gnueabihf",
    "i686-apple-darwin",
    "i686-linux-android",
    "i686-pc-windows-gnu",
    "i686-pc-windows-msvc",
    "i686-unknown-linux-gnu",
    "mips-unknown-linux-gnu",
    "mips64-unknown-linux-gnuabi64",
    "mips64el-unknown-linux-gnuabi64",
    "mipsel-unknown-linux-gnu",
    "powerpc-unknown-linux-gnu",
    "powerpc64-unknown-linux-gnu",
    "powerpc64le-unknown-linux-gnu",
    "riscv64gc-unknown-linux-gnu",
    "s390x-unknown-linux-gnu",
    "x86_64-apple-darwin",
    "x86_64-linux-android",
    "x86_64-pc-windows-gnu",
    "x86_64-pc-windows-msvc",
    "x86_64-unknown-freebsd",
    "x86_64-unknown-illumos",
    "x86_64-unknown-linux-gnu",
    "x86_64-unknown-linux-musl",
    "x86_64-unknown-netbsd",
];

/// `$RUSTUP_UPDATE_ROOT`, or the official update root.
pub fn default_url() -> String {
    std::env::var("RUSTUP_UPDATE_ROOT").unwrap_or_else(|_| DEFAULT_UPDATE_ROOT.to_string())
}

/// `*`, `latest`, `stable` or `X.Y.Z`.
pub fn validate_spec(spec: &str) -> Result<&str> {
    if matches!(spec, "*" | "latest" | "stable") || is_version(spec) {
        Ok(spec)
    } else {
        Err(MirrorError::usage(format!("invalid SPEC '{spec}'")))
    }
}

/// `archive/<version>/<target>/rustup-init[.exe]`
pub fn rustup_init_rel_path(version: &str, target: &str) -> String {
    format!(
        "{ARTIFACT_ROOT}/{version}/{target}/rustup-init{}",
        exe_suffix(target)
    )
}

/// Sort `X.Y.Z` strings newest first; anything else is dropped.
fn reverse_sorted_versions(names: Vec<String>) -> Vec<String> {
    let mut versions: Vec<(semver::Version, String)> = names
        .into_iter()
        .filter_map(|n| semver::Version::parse(&n).ok().map(|v| (v, n)))
        .collect();
    versions.sort_by(|a, b| b.0.cmp(&a.0));
    versions.into_iter().map(|(_, n)| n).collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct ReleaseStable {
    #[serde(rename = "schema-version")]
    schema_version: String,
    version: String,
}

/// One rustup COMMAND.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RustupCommand {
    /// Fetch `rustup-init` for each version and target, then `fixup`.
    Download,
    /// Re-hash the selected binaries.
    Verify,
    /// Print the selected versions.
    List,
    /// Print the targets present upstream or in the store.
    AllTargets,
    /// Write the selected binaries to an archive.
    Pack,
    /// Extract an archive, then `verify` and `fixup`.
    Unpack,
    /// Point `release-stable.toml` and `dist/` at the newest stable.
    Fixup,
}

impl FromStr for RustupCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "download" => Self::Download,
            "verify" => Self::Verify,
            "list" => Self::List,
            "all-targets" => Self::AllTargets,
            "pack" => Self::Pack,
            "unpack" => Self::Unpack,
            "fixup" => Self::Fixup,
            other => return Err(format!("invalid rustup command '{other}'")),
        })
    }
}

/// Settings for a [`RustupStore`].
#[derive(Debug, Clone)]
pub struct RustupOptions {
    /// Store root.
    pub dest: PathBuf,
    /// Upstream update root.
    pub url: String,
    /// Archive for `pack` and `unpack`.
    pub archive: PathBuf,
    /// Versions: `X.Y.Z`, `stable`, `latest` or `*`.
    pub specs: Vec<String>,
    /// Target triples, aliases, `all` or `*`.
    pub targets: Vec<String>,
    /// Trust existing files without hashing them.
    pub assume_ok: bool,
}

impl Default for RustupOptions {
    fn default() -> Self {
        Self {
            dest: PathBuf::from(DEFAULT_DEST),
            url: default_url(),
            archive: PathBuf::from(DEFAULT_ARCHIVE),
            specs: Vec::new(),
            targets: Vec::new(),
            assume_ok: false,
        }
    }
}

/// Mirror of `rustup-init` binaries.
pub struct RustupStore {
    ctx: Context,
    opts: RustupOptions,
    specs: Vec<String>,
    targets: Vec<String>,
    out: Box<dyn Write + Send>,
}

impl std::fmt::Debug for RustupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustupStore")
            .field("dest", &self.opts.dest)
            .field("specs", &self.specs)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

impl RustupStore {
    /// A store over `opts`, printing listings to stdout.
    pub fn new(ctx: Context, opts: RustupOptions) -> Self {
        Self {
            specs: split_words(&opts.specs),
            targets: normalize_targets(&opts.targets),
            ctx,
            opts,
            out: Box::new(std::io::stdout()),
        }
    }

    /// Send listing output somewhere other than stdout.
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = out;
        self
    }

    /// Versions in effect.
    pub fn specs(&self) -> &[String] {
        &self.specs
    }

    /// Targets in effect.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Run `commands` in order.
    pub async fn run(&mut self, commands: &[RustupCommand]) -> Result<()> {
        if commands.is_empty() {
            self.ctx.reporter.info("nothing to do; try a COMMAND");
        }
        for cmd in commands {
            if self.ctx.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            match cmd {
                RustupCommand::Download => {
                    self.cmd_download().await?;
                    self.cmd_fixup().await?;
                }
                RustupCommand::Verify => self.cmd_verify().await?,
                RustupCommand::List => self.cmd_list().await?,
                RustupCommand::AllTargets => self.cmd_all_targets()?,
                RustupCommand::Pack => self.cmd_pack().await?,
                RustupCommand::Unpack => {
                    self.cmd_unpack()?;
                    self.cmd_verify().await?;
                    self.cmd_fixup().await?;
                }
                RustupCommand::Fixup => self.cmd_fixup().await?,
            }
        }
        Ok(())
    }

    fn dest_path(&self, rel_path: &str) -> PathBuf {
        self.opts.dest.join(rel_path)
    }

    fn release_stable_path(&self) -> PathBuf {
        self.dest_path(RELEASE_STABLE)
    }

    /// Version named by `release-stable.toml`. The upstream copy changes
    /// without notice, so a download always re-fetches it.
    async fn release_stable_version(&self, download: bool) -> Result<String> {
        let path = self.release_stable_path();
        if download {
            self.ctx
                .downloader
                .fetch(&url_join(&self.opts.url, RELEASE_STABLE), &path)
                .await?;
        } else if path.is_file() {
            tracing::debug!("[read] {}", path.display());
        } else {
            return Err(IntegrityError::Missing(path).into());
        }
        let text = std::fs::read_to_string(&path)?;
        let release: ReleaseStable = toml::from_str(&text).map_err(|e| {
            MirrorError::usage(format!("malformed {}: {e}", path.display()))
        })?;
        Ok(release.version)
    }

    async fn version_from_spec(&self, spec: &str, download: bool) -> Result<String> {
        if spec == "stable" {
            self.release_stable_version(download).await
        } else {
            Ok(spec.to_string())
        }
    }

    fn downloaded_versions(&self) -> Vec<String> {
        reverse_sorted_versions(subdir_names(&self.dest_path(ARTIFACT_ROOT)))
    }

    fn downloaded_targets(&self, version: &str) -> Vec<String> {
        subdir_names(&self.dest_path(&format!("{ARTIFACT_ROOT}/{version}")))
    }

    fn adjust_download_specs(&self) -> Result<Vec<String>> {
        for spec in &self.specs {
            if matches!(validate_spec(spec)?, "*" | "latest") {
                return Err(MirrorError::usage(format!("invalid wild SPEC: {spec}")));
            }
        }
        require_specs(self.specs.clone())
    }

    fn expand_wild_spec(&self, spec: &str) -> Result<Vec<String>> {
        let specs = match validate_spec(spec)? {
            "*" => self.downloaded_versions(),
            "latest" => self.downloaded_versions().into_iter().take(1).collect(),
            other => vec![other.to_string()],
        };
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

    fn adjust_targets(&self, version: &str, base_targets: &[String]) -> Vec<String> {
        let mut targets = BTreeSet::new();
        for target in base_targets {
            match target.as_str() {
                "all" => targets.extend(ALL_KNOWN_TARGETS.iter().map(|t| (*t).to_string())),
                "*" => targets.extend(self.downloaded_targets(version)),
                t => {
                    if !ALL_KNOWN_TARGETS.contains(&t) {
                        self.ctx.reporter.warning(&format!("unknown target '{t}'"));
                    }
                    targets.insert(t.to_string());
                }
            }
        }
        targets.into_iter().collect()
    }

    async fn download_verify(
        &self,
        download: bool,
        specs: Vec<String>,
        base_targets: Vec<String>,
    ) -> Result<()> {
        let phase = if download { "Download" } else { "Verify" };
        for spec in specs {
            self.ctx.reporter.section(&format!("{phase}: {spec}"));
            let version = self.version_from_spec(&spec, download).await?;
            self.ctx.reporter.info(&format!("  version: {version}"));
            let targets = self.adjust_targets(&version, &base_targets);
            self.ctx.reporter.info(&format!("  targets: {}", targets.len()));

            let items = targets
                .iter()
                .map(|target| {
                    let rel_path = rustup_init_rel_path(&version, target);
                    Transfer {
                        url: url_join(&self.opts.url, &rel_path),
                        dest: self.dest_path(&rel_path),
                        cached: true,
                    }
                })
                .collect();
            let mode = if download {
                TransferMode::Download {
                    assume_ok: self.opts.assume_ok,
                }
            } else {
                TransferMode::Verify
            };
            transfer_all(&self.ctx, phase, items, mode, &SignatureCheck::disabled()).await?;
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
            let version = self.version_from_spec(&spec, false).await?;
            let targets = self.downloaded_targets(&version);
            writeln!(self.out, "{version:8} targets[{}]", targets.len())?;
            for target in targets {
                writeln!(self.out, "  {target}")?;
            }
        }
        Ok(())
    }

    fn cmd_all_targets(&mut self) -> Result<()> {
        for target in ALL_KNOWN_TARGETS {
            writeln!(self.out, "{target}")?;
        }
        Ok(())
    }

    async fn cmd_pack(&mut self) -> Result<()> {
        let base_targets = require_targets(&self.targets, Some("*"))?;
        self.ctx
            .reporter
            .section(&format!("Packing archive: {}", self.opts.archive.display()));
        let mut writer = ArchiveWriter::create(&self.opts.archive)?;
        for spec in self.adjust_wild_specs()? {
            let version = self.version_from_spec(&spec, false).await?;
            self.ctx.reporter.info(&format!("Pack: {spec} (version {version})"));
            for target in self.adjust_targets(&version, &base_targets) {
                let rel_path = rustup_init_rel_path(&version, &target);
                for rel in [rel_path.clone(), format!("{rel_path}{HASH_SUFFIX}")] {
                    let path = self.dest_path(&rel);
                    if !path.is_file() {
                        return Err(IntegrityError::Missing(path).into());
                    }
                    writer.append_file(&format!("{ARCHIVE_PREFIX}{rel}"), &path)?;
                }
            }
        }
        writer.finish()?;
        Ok(())
    }

    fn cmd_unpack(&mut self) -> Result<()> {
        let archive = self.opts.archive.clone();
        self.ctx
            .reporter
            .section(&format!("Unpacking archive: {}", archive.display()));
        let required = format!("{ARCHIVE_PREFIX}{ARTIFACT_ROOT}/");
        let dest = self.opts.dest.clone();
        let mut extracted: Vec<String> = Vec::new();
        read_members(&archive, |member| {
            if !member.name.starts_with(&required) {
                return Err(ArchiveError::UnexpectedMember(member.name.clone()).into());
            }
            let rel = member.name[ARCHIVE_PREFIX.len()..].to_string();
            let path = join_relative(&dest, &rel)
                .ok_or_else(|| ArchiveError::UnexpectedMember(member.name.clone()))?;
            member.extract_to(&path)?;
            extracted.push(rel);
            Ok(())
        })?;

        let (versions, targets) = self.detect_versions_targets(&extracted);
        self.ctx
            .reporter
            .info(&format!("Unpacked specs: {}", versions.len()));
        for v in &versions {
            self.ctx.reporter.info(&format!("  {v}"));
        }
        self.ctx
            .reporter
            .info(&format!("Unpacked targets: {}", targets.len()));
        for t in &targets {
            self.ctx.reporter.info(&format!("  {t}"));
        }
        self.specs = versions;
        self.targets = targets;
        Ok(())
    }

    /// Versions and targets from `archive/<version>/<target>/<file>` paths.
    fn detect_versions_targets(&self, rel_paths: &[String]) -> (Vec<String>, Vec<String>) {
        let mut versions = BTreeSet::new();
        let mut targets = BTreeSet::new();
        for rel in rel_paths {
            let parts: Vec<&str> = rel.split('/').collect();
            if parts.len() < 4 {
                self.ctx.reporter.warning(&format!("unexpected path {rel}"));
            } else if is_version(parts[1]) {
                versions.insert(parts[1].to_string());
                targets.insert(parts[2].to_string());
            }
        }
        let mut versions = reverse_sorted_versions(versions.into_iter().collect());
        versions.reverse();
        (versions, targets.into_iter().collect())
    }

    /// Point `release-stable.toml` at `version` unless it already names a
    /// newer one.
    async fn fixup_version(&self, version: &str) -> Result<()> {
        let path = self.release_stable_path();
        let write = if path.is_file() {
            let old = self.release_stable_version(false).await?;
            match (semver::Version::parse(version), semver::Version::parse(&old)) {
                (Ok(new), Ok(old)) => new >= old,
                _ => true,
            }
        } else {
            true
        };
        if write {
            self.ctx
                .reporter
                .info(&format!("[write] {} (version={version})", path.display()));
            let text = toml::to_string(&ReleaseStable {
                schema_version: "1".to_string(),
                version: version.to_string(),
            })
            .map_err(|e| MirrorError::usage(format!("cannot encode {RELEASE_STABLE}: {e}")))?;
            std::fs::create_dir_all(&self.opts.dest)?;
            std::fs::write(&path, text)?;
        }
        Ok(())
    }

    async fn cmd_fixup(&mut self) -> Result<()> {
        for spec in self.adjust_wild_specs()? {
            self.ctx.reporter.section(&format!("Fixup: {spec}"));
            let version = self.version_from_spec(&spec, false).await?;
            let has_artifacts = self
                .downloaded_targets(&version)
                .iter()
                .any(|target| {
                    let dir = self.dest_path(&format!("{ARTIFACT_ROOT}/{version}/{target}"));
                    std::fs::read_dir(dir).is_ok_and(|mut rd| rd.next().is_some())
                });
            if !has_artifacts {
                return Err(MirrorError::usage(format!("version {version} not present")));
            }
            self.fixup_version(&version).await?;
        }

        let stable = self.release_stable_version(false).await?;
        let src = self.dest_path(&format!("{ARTIFACT_ROOT}/{stable}"));
        if !src.is_dir() {
            return Err(IntegrityError::Missing(src).into());
        }
        let dist = self.dest_path("dist");
        self.ctx
            .reporter
            .info(&format!("[copytree] {} -> {}", src.display(), dist.display()));
        replace_tree(&src, &dist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use mockito::Server;
    use tokio_util::sync::CancellationToken;

    use crate::integrity::{format_sidecar, hash_bytes, write_sidecar_for};
    use crate::reporter::NullReporter;

    fn ctx() -> Context {
        Context::from_settings(2, 0, CancellationToken::new(), Arc::new(NullReporter)).unwrap()
    }

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

    fn put_init(root: &std::path::Path, version: &str, target: &str) {
        let path = root.join(rustup_init_rel_path(version, target));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let body = format!("rustup-init {version} {target}");
        std::fs::write(&path, &body).unwrap();
        write_sidecar_for(&path, &hash_bytes(body.as_bytes())).unwrap();
    }

    #[test]
    fn specs_and_paths() {
        assert!(validate_spec("1.26.0").is_ok());
        assert!(validate_spec("stable").is_ok());
        assert!(validate_spec("nightly").is_err());
        assert_eq!(
            rustup_init_rel_path("1.26.0", "x86_64-pc-windows-msvc"),
            "archive/1.26.0/x86_64-pc-windows-msvc/rustup-init.exe"
        );
        assert_eq!(
            reverse_sorted_versions(vec!["1.9.0".into(), "1.10.0".into(), "junk".into()]),
            ["1.10.0", "1.9.0"]
        );
    }

    #[tokio::test]
    async fn download_stable_from_server() {
        let mut server = Server::new_async().await;
        let body = b"init binary";
        let rel = rustup_init_rel_path("1.27.1", "x86_64-unknown-linux-gnu");
        let _stable = server
            .mock("GET", "/release-stable.toml")
            .with_body("schema-version = \"1\"\nversion = \"1.27.1\"\n")
            .create_async()
            .await;
        let _bin = server
            .mock("GET", format!("/{rel}").as_str())
            .with_body(body)
            .expect(1)
            .create_async()
            .await;
        let _sum = server
            .mock("GET", format!("/{rel}.sha256").as_str())
            .with_body(format_sidecar(&hash_bytes(body), "rustup-init"))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rustup");
        let mut store = RustupStore::new(
            ctx(),
            RustupOptions {
                dest: dest.clone(),
                url: server.url(),
                specs: vec!["stable".into()],
                targets: vec!["linux".into()],
                ..RustupOptions::default()
            },
        );
        store.run(&[RustupCommand::Download]).await.unwrap();

        assert_eq!(std::fs::read(dest.join(&rel)).unwrap(), body);
        assert!(dest.join("dist/x86_64-unknown-linux-gnu/rustup-init").is_file());
        let stable = std::fs::read_to_string(dest.join("release-stable.toml")).unwrap();
        assert!(stable.contains("1.27.1"));
    }

    #[tokio::test]
    async fn fixup_keeps_newer_stable() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rustup");
        put_init(&dest, "1.26.0", "x86_64-unknown-linux-gnu");
        put_init(&dest, "1.27.0", "x86_64-unknown-linux-gnu");

        let opts = RustupOptions {
            dest: dest.clone(),
            url: "unused".into(),
            ..RustupOptions::default()
        };
        RustupStore::new(ctx(), RustupOptions { specs: vec!["1.27.0".into()], ..opts.clone() })
            .run(&[RustupCommand::Fixup])
            .await
            .unwrap();
        RustupStore::new(ctx(), RustupOptions { specs: vec!["1.26.0".into()], ..opts.clone() })
            .run(&[RustupCommand::Fixup])
            .await
            .unwrap();
        let stable = std::fs::read_to_string(dest.join("release-stable.toml")).unwrap();
        assert!(stable.contains("\"1.27.0\""));

        let err = RustupStore::new(ctx(), RustupOptions { specs: vec!["1.0.0".into()], ..opts })
            .run(&[RustupCommand::Fixup])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("version 1.0.0 not present"));
    }

    #[tokio::test]
    async fn pack_unpack_list() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rustup");
        for version in ["1.26.0", "1.27.0"] {
            put_init(&dest, version, "x86_64-pc-windows-msvc");
            put_init(&dest, version, "x86_64-unknown-linux-gnu");
        }
        let archive = dir.path().join("rustup.tar.zst");

        let opts = RustupOptions {
            dest: dest.clone(),
            url: "unused".into(),
            archive: archive.clone(),
            specs: vec!["*".into()],
            ..RustupOptions::default()
        };
        RustupStore::new(ctx(), opts.clone())
            .run(&[RustupCommand::Pack])
            .await
            .unwrap();

        let dest2 = dir.path().join("rustup2");
        let mut unpacker = RustupStore::new(
            ctx(),
            RustupOptions {
                dest: dest2.clone(),
                specs: Vec::new(),
                ..opts.clone()
            },
        );
        unpacker.run(&[RustupCommand::Unpack]).await.unwrap();
        assert_eq!(unpacker.specs(), ["1.26.0", "1.27.0"]);
        assert_eq!(
            unpacker.targets(),
            ["x86_64-pc-windows-msvc", "x86_64-unknown-linux-gnu"]
        );
        assert!(dest2.join("dist/x86_64-pc-windows-msvc/rustup-init.exe").is_file());

        let out = Captured::default();
        RustupStore::new(
            ctx(),
            RustupOptions {
                dest: dest2,
                specs: vec!["latest".into()],
                ..opts
            },
        )
        .with_output(Box::new(out.clone()))
        .run(&[RustupCommand::List])
        .await
        .unwrap();
        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            text,
            "1.27.0   targets[2]\n  x86_64-pc-windows-msvc\n  x86_64-unknown-linux-gnu\n"
        );
    }

    #[tokio::test]
    async fn download_rejects_wild_specs() {
        let mut store = RustupStore::new(
            ctx(),
            RustupOptions {
                specs: vec!["latest".into()],
                targets: vec!["linux".into()],
                ..RustupOptions::default()
            },
        );
        let err = store.run(&[RustupCommand::Download]).await.unwrap_err();
        assert!(matches!(err, MirrorError::Usage(_)));
    }
}
