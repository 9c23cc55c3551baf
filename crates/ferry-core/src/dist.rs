//! Pieces shared by the toolchain and rustup stores.
//!
//! Both stores publish files next to a `.sha256` sidecar under a `DEST`
//! directory that mirrors the upstream URL layout, and move them through
//! the same worker pool.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::context::Context;
use crate::download::Fetched;
use crate::error::{MirrorError, Result};
use crate::signature::SignatureCheck;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());

/// `YYYY-MM-DD`.
pub fn is_date(s: &str) -> bool {
    DATE_RE.is_match(s)
}

/// `X.Y.Z` with no pre-release or build suffix.
pub fn is_version(s: &str) -> bool {
    VERSION_RE.is_match(s)
}

/// Split each argument at commas and whitespace, dropping empty words.
pub fn split_words<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    items
        .iter()
        .flat_map(|item| {
            item.as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Map `linux`, `windows` and `darwin` to their tier-1 triples.
pub fn expand_target_alias(target: &str) -> &str {
    match target {
        "linux" => "x86_64-unknown-linux-gnu",
        "windows" => "x86_64-pc-windows-msvc",
        "darwin" => "aarch64-apple-darwin",
        other => other,
    }
}

/// Split, de-alias and de-duplicate `--target` values, keeping order.
pub fn normalize_targets<S: AsRef<str>>(targets: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in split_words(targets) {
        let target = expand_target_alias(&word).to_string();
        if !out.contains(&target) {
            out.push(target);
        }
    }
    out
}

/// `.exe` for Windows targets.
pub fn exe_suffix(target: &str) -> &'static str {
    if target.split('-').any(|part| part == "windows") {
        ".exe"
    } else {
        ""
    }
}

/// Fail with a usage error when no SPEC was given.
pub fn require_specs(specs: Vec<String>) -> Result<Vec<String>> {
    if specs.is_empty() {
        return Err(MirrorError::usage("missing required SPEC; try --select"));
    }
    Ok(specs)
}

/// The given targets, else `default`, else a usage error.
pub fn require_targets(targets: &[String], default: Option<&str>) -> Result<Vec<String>> {
    match (targets.is_empty(), default) {
        (false, _) => Ok(targets.to_vec()),
        (true, Some(default)) => Ok(vec![default.to_string()]),
        (true, None) => Err(MirrorError::usage("missing required TARGET; try --target")),
    }
}

/// Join a `/`-separated relative path onto a base URL or directory.
pub fn url_join(base: &str, rel_path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), rel_path)
}

/// Names of the immediate subdirectories of `parent`, sorted.
pub fn subdir_names(parent: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(parent)
        .map(|rd| {
            rd.filter_map(std::result::Result::ok)
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// `YYYY-MM-DD` directories in `parent`, newest first.
pub fn reversed_date_dirs(parent: &Path) -> Vec<String> {
    let mut dates: Vec<String> = subdir_names(parent)
        .into_iter()
        .filter(|name| is_date(name))
        .collect();
    dates.reverse();
    dates
}

/// Replace `dst` with a copy of the directory tree at `src`.
pub fn replace_tree(src: &Path, dst: &Path) -> Result<()> {
    if dst.is_dir() {
        std::fs::remove_dir_all(dst)?;
    }
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// One file to fetch or check.
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Source URL.
    pub url: String,
    /// Destination in the store.
    pub dest: PathBuf,
    /// Whether a valid file already on disk may be kept.
    pub cached: bool,
}

/// What [`transfer_all`] does with each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Fetch unless a valid copy is present.
    Download {
        /// Trust existing files without hashing them.
        assume_ok: bool,
    },
    /// Check only; never fetch.
    Verify,
}

/// Run `items` through the pool, checking each against its sidecar.
///
/// Every item is attempted; failures are reported one by one and turn into
/// a single [`MirrorError::PhaseFailed`] at the end.
pub async fn transfer_all(
    ctx: &Context,
    phase: &str,
    items: Vec<Transfer>,
    mode: TransferMode,
    signature: &SignatureCheck,
) -> Result<()> {
    let downloader = ctx.downloader.clone();
    let signature = signature.clone();
    let labels: Vec<String> = items.iter().map(|t| t.dest.display().to_string()).collect();

    let out = ctx
        .pool
        .run(items, move |item: Transfer| {
            let downloader = downloader.clone();
            let signature = signature.clone();
            async move {
                match mode {
                    TransferMode::Download { assume_ok } => downloader
                        .download_verify(&item.url, &item.dest, item.cached, assume_ok, &signature)
                        .await
                        .map_err(MirrorError::from),
                    TransferMode::Verify => downloader
                        .verify(&item.dest, &signature)
                        .await
                        .map(|()| Fetched::Cached)
                        .map_err(MirrorError::from),
                }
            }
        })
        .await;

    let mut good = 0;
    let mut bad = 0;
    for (label, result) in labels.iter().zip(out.results) {
        match result {
            Some(Ok(fetched)) => {
                good += 1;
                let detail = match (mode, fetched) {
                    (TransferMode::Verify, _) => "verified",
                    (_, Fetched::Cached) => "cached file",
                    (_, Fetched::AssumedOk) => "assuming OK",
                    (_, Fetched::Downloaded) => "downloaded",
                };
                ctx.reporter.done(label, detail);
            }
            Some(Err(e)) => {
                bad += 1;
                ctx.reporter.failed(label, &e.to_string());
            }
            None => {}
        }
    }
    if out.cancelled {
        return Err(MirrorError::Cancelled);
    }
    ctx.reporter.summary(phase, good, bad);
    if bad > 0 {
        return Err(MirrorError::PhaseFailed {
            phase: phase.to_string(),
            failed: bad,
            succeeded: good,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_and_targets() {
        assert_eq!(
            split_words(&["a,b  c", "", "d"]),
            ["a", "b", "c", "d"]
        );
        assert_eq!(
            normalize_targets(&["linux,darwin", "x86_64-unknown-linux-gnu"]),
            ["x86_64-unknown-linux-gnu", "aarch64-apple-darwin"]
        );
        assert_eq!(exe_suffix("x86_64-pc-windows-msvc"), ".exe");
        assert_eq!(exe_suffix("x86_64-unknown-linux-gnu"), "");
    }

    #[test]
    fn dates_and_versions() {
        assert!(is_date("2024-01-31"));
        assert!(!is_date("2024-1-31"));
        assert!(is_version("1.75.0"));
        assert!(!is_version("1.75.0-beta.1"));
        assert!(!is_version("stable"));
    }

    #[test]
    fn date_dirs_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for d in ["2024-01-01", "2024-03-01", "not-a-date", "2023-12-31"] {
            std::fs::create_dir(dir.path().join(d)).unwrap();
        }
        std::fs::write(dir.path().join("2025-01-01"), "file").unwrap();
        assert_eq!(
            reversed_date_dirs(dir.path()),
            ["2024-03-01", "2024-01-01", "2023-12-31"]
        );
    }

    #[test]
    fn tree_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("t")).unwrap();
        std::fs::write(src.join("t/f"), "new").unwrap();
        let dst = dir.path().join("dst");
        std::fs::create_dir_all(dst.join("old")).unwrap();

        replace_tree(&src, &dst).unwrap();
        assert_eq!(std::fs::read_to_string(dst.join("t/f")).unwrap(), "new");
        assert!(!dst.join("old").exists());
    }

    #[test]
    fn usage_requirements() {
        assert!(require_specs(Vec::new()).is_err());
        assert_eq!(require_targets(&[], Some("*")).unwrap(), ["*"]);
        assert!(require_targets(&[], None).is_err());
        assert_eq!(url_join("https://x/dist/", "a/b"), "https://x/dist/a/b");
    }
}
