//! Toolchain channel manifests (`channel-rust-*.toml`).
//!
//! Only the parts the mirror needs are decoded: the manifest date, the
//! `rust-src` version line (which names the channel and release), and for
//! every package and target whether it is available and where its `.tar.xz`
//! lives.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors reading a channel manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Read {
        /// The manifest.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid manifest.
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        /// The manifest.
        path: PathBuf,
        /// The TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// No `rust-src` version to derive the channel from.
    #[error("manifest {path} has no [pkg.rust-src] version")]
    NoVersion {
        /// The manifest.
        path: PathBuf,
    },

    /// A package URL outside `/dist/`.
    #[error("package {name}/{target} has no xz_url")]
    NoUrl {
        /// Package name.
        name: String,
        /// Target triple.
        target: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RawManifest {
    date: String,
    #[serde(default)]
    pkg: BTreeMap<String, RawPackage>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPackage {
    #[serde(default)]
    version: String,
    #[serde(default)]
    target: BTreeMap<String, RawTarget>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTarget {
    #[serde(default)]
    available: bool,
    #[serde(default)]
    xz_url: String,
    #[serde(default)]
    xz_hash: String,
}

/// One (package, target) pair from a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Package {
    /// Target triple, or `*` for target-independent packages.
    pub target: String,
    /// Package name, e.g. `rustc`.
    pub name: String,
    /// Whether upstream built it for this target.
    pub available: bool,
    /// Download URL of the `.tar.xz`.
    pub xz_url: String,
    /// SHA256 of the `.tar.xz`.
    pub xz_hash: String,
}

impl Package {
    /// Path of the `.tar.xz` below the `dist/` root.
    pub fn rel_path(&self) -> Result<&str, ManifestError> {
        self.xz_url
            .find("/dist/")
            .map(|idx| &self.xz_url[idx + "/dist/".len()..])
            .ok_or_else(|| ManifestError::NoUrl {
                name: self.name.clone(),
                target: self.target.clone(),
            })
    }
}

/// What a mirrored target is good for, judged by which packages are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    /// `rustc` is present: a full host toolchain.
    Native,
    /// Only `rust-std`: usable for cross-compiling to the target.
    Cross,
    /// Neither `rustc` nor `rust-std`.
    Minimal,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Native => "native-target",
            Self::Cross => "cross-target",
            Self::Minimal => "minimal",
        })
    }
}

/// A parsed `channel-rust-*.toml` manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    date: String,
    rust_src_version: String,
    packages: Vec<Package>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse manifest text; `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(text).map_err(|source| ManifestError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        let rust_src_version = raw
            .pkg
            .get("rust-src")
            .map(|p| p.version.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ManifestError::NoVersion {
                path: origin.to_path_buf(),
            })?;

        let packages = raw
            .pkg
            .into_iter()
            .flat_map(|(name, pkg)| {
                pkg.target.into_iter().map(move |(target, t)| Package {
                    target,
                    name: name.clone(),
                    available: t.available,
                    xz_url: t.xz_url,
                    xz_hash: t.xz_hash,
                })
            })
            .collect();

        Ok(Self {
            date: raw.date,
            rust_src_version,
            packages,
        })
    }

    /// Release date, `YYYY-MM-DD`.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// `nightly`, `beta` or `stable`, read from the `rust-src` version line
    /// (e.g. `1.44.0-nightly (42abbd887 2020-04-07)`).
    pub fn channel(&self) -> &'static str {
        if self.rust_src_version.contains("-beta") {
            "beta"
        } else if self.rust_src_version.contains("-nightly") {
            "nightly"
        } else {
            "stable"
        }
    }

    /// Release number, e.g. `1.44.0`.
    pub fn version(&self) -> &str {
        let first = self.rust_src_version.split('-').next().unwrap_or_default();
        first.split_whitespace().next().unwrap_or_default()
    }

    /// `channel-date`, e.g. `stable-2020-03-12`.
    pub fn spec(&self) -> String {
        format!("{}-{}", self.channel(), self.date)
    }

    /// `channel-date(version)`, used in log lines.
    pub fn ident(&self) -> String {
        format!("{}({})", self.spec(), self.version())
    }

    /// Every (package, target) pair.
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Available packages whose target is in `targets` (or `*`, meaning
    /// target-independent) and for which `present` holds.
    pub fn available_packages(
        &self,
        targets: Option<&[String]>,
        present: Option<&dyn Fn(&str) -> bool>,
    ) -> Vec<&Package> {
        self.packages
            .iter()
            .filter(|p| p.available && !p.xz_url.is_empty())
            .filter(|p| targets.is_none_or(|ts| target_matches_any(&p.target, ts)))
            .filter(|p| {
                present.is_none_or(|f| p.rel_path().is_ok_and(|rel| f(rel)))
            })
            .collect()
    }

    /// Every target named in the manifest, sorted.
    pub fn all_targets(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .packages
            .iter()
            .map(|p| p.target.as_str())
            .filter(|t| *t != "*")
            .collect();
        set.into_iter().map(str::to_string).collect()
    }

    /// Classify targets by which of their packages are present.
    ///
    /// A target qualifies when all its packages are present, or at least one
    /// present package belongs to it alone (so target-independent packages
    /// such as `rust-src` do not make every target look mirrored).
    pub fn available_target_types(
        &self,
        targets: Option<&[String]>,
        present: Option<&dyn Fn(&str) -> bool>,
    ) -> BTreeMap<String, TargetType> {
        let available = self.available_packages(None, None);
        let mut by_target: HashMap<&str, Vec<&Package>> = HashMap::new();
        let mut targets_by_path: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for p in &available {
            by_target.entry(p.target.as_str()).or_default().push(p);
            if let Ok(rel) = p.rel_path() {
                targets_by_path.entry(rel).or_default().insert(p.target.as_str());
            }
        }

        let candidates: Vec<String> = match targets {
            Some(ts) => ts.to_vec(),
            None => {
                let set: BTreeSet<&str> = by_target.keys().copied().filter(|t| *t != "*").collect();
                set.into_iter().map(str::to_string).collect()
            }
        };

        let mut out = BTreeMap::new();
        for target in candidates {
            let Some(packages) = by_target.get(target.as_str()) else {
                continue;
            };
            let mut all_present = true;
            let mut unique_present = false;
            let mut rustc = false;
            let mut rust_std = false;
            for p in packages {
                let Ok(rel) = p.rel_path() else { continue };
                if present.is_none_or(|f| f(rel)) {
                    match p.name.as_str() {
                        "rustc" => rustc = true,
                        "rust-std" => rust_std = true,
                        _ => {}
                    }
                    if targets_by_path.get(rel).is_some_and(|ts| ts.len() == 1) {
                        unique_present = true;
                    }
                } else {
                    all_present = false;
                }
            }
            if unique_present || all_present {
                let kind = if rustc {
                    TargetType::Native
                } else if rust_std {
                    TargetType::Cross
                } else {
                    TargetType::Minimal
                };
                out.insert(target, kind);
            }
        }
        out
    }
}

fn target_matches_any(target: &str, expected: &[String]) -> bool {
    target == "*" || expected.iter().any(|e| e == target || e == "*")
}
