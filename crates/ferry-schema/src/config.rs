//! Persisted configuration records.
//!
//! Two small documents live on disk:
//!
//! - `CRATES_ROOT/config.toml` ([`MirrorConfig`]) records the prefix casing
//!   of the artifact store and of archives produced from it.
//! - `INDEX/config.json` ([`RegistryConfig`]) is the registry's own config,
//!   read by cargo on the consumer side.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prefix::PrefixStyle;

/// Per-store record under the crates root.
pub const MIRROR_CONFIG_FILE: &str = "config.toml";
/// The registry config at the root of the crate index.
pub const REGISTRY_CONFIG_FILE: &str = "config.json";

/// Errors loading or saving config records.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The record exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The record could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// File that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// `config.toml` is not valid TOML for [`MirrorConfig`].
    #[error("invalid mirror config {path}: {source}")]
    Toml {
        /// File that failed.
        path: PathBuf,
        /// The parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Serializing [`MirrorConfig`] failed.
    #[error("failed to serialize mirror config: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// `config.json` is not valid JSON.
    #[error("invalid registry config: {0}")]
    Json(#[from] serde_json::Error),

    /// A `mixed` store on a filesystem that ignores case.
    #[error(
        "prefix style 'mixed' is unsafe on the case-insensitive filesystem at {0}; use 'lower'"
    )]
    MixedOnCaseInsensitive(PathBuf),
}

/// Prefix casing for the artifact store and for archives built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Casing of the store's own prefix directories.
    #[serde(default)]
    pub prefix: PrefixStyle,
    /// Casing used for crate paths inside archives.
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: PrefixStyle,
}

// Readers predating the config record only understand mixed-case archives.
fn default_archive_prefix() -> PrefixStyle {
    PrefixStyle::Mixed
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            prefix: PrefixStyle::Lower,
            archive_prefix: default_archive_prefix(),
        }
    }
}

impl MirrorConfig {
    /// Location of the record for `crates_root`.
    pub fn path(crates_root: &Path) -> PathBuf {
        crates_root.join(MIRROR_CONFIG_FILE)
    }

    /// Load the record from `crates_root`.
    ///
    /// Without a record the store predates it: any uppercase directory in
    /// the two-level prefix tree means the store was laid out mixed-case.
    pub fn load(crates_root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(crates_root);
        match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|source| ConfigError::Toml { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                prefix: detect_prefix_style(crates_root),
                archive_prefix: default_archive_prefix(),
            }),
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Write the record, creating `crates_root` if needed.
    pub fn save(&self, crates_root: &Path) -> Result<(), ConfigError> {
        let path = Self::path(crates_root);
        let text = toml::to_string(self)?;
        std::fs::create_dir_all(crates_root)
            .and_then(|()| std::fs::write(&path, text))
            .map_err(|source| ConfigError::Write { path, source })
    }

    /// Refuse `mixed` where the filesystem would alias `Ab` and `ab`.
    pub fn check_filesystem(
        &self,
        crates_root: &Path,
        case_insensitive: bool,
    ) -> Result<(), ConfigError> {
        if case_insensitive && self.prefix == PrefixStyle::Mixed {
            return Err(ConfigError::MixedOnCaseInsensitive(crates_root.to_path_buf()));
        }
        Ok(())
    }
}

fn detect_prefix_style(crates_root: &Path) -> PrefixStyle {
    let has_upper = |p: &Path| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.chars().any(char::is_uppercase))
    };
    let subdirs = |p: &Path| -> Vec<PathBuf> {
        std::fs::read_dir(p)
            .map(|rd| {
                rd.filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect()
            })
            .unwrap_or_default()
    };

    for first in subdirs(crates_root) {
        if has_upper(&first) {
            return PrefixStyle::Mixed;
        }
        if subdirs(&first).iter().any(|second| has_upper(second)) {
            return PrefixStyle::Mixed;
        }
    }
    PrefixStyle::Lower
}

/// The registry's `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Download-location template.
    #[serde(default, alias = "download-location", skip_serializing_if = "Option::is_none")]
    pub dl: Option<String>,

    /// Registry API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    /// Keys ferry does not interpret, kept as found.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RegistryConfig {
    /// Parse a `config.json` document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Pretty-printed with a trailing newline, as the upstream index stores it.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }

    /// Point the registry at a ferry-served mirror rooted at `server_url`.
    pub fn for_server(server_url: &str, style: PrefixStyle) -> Self {
        let server = server_url.trim_end_matches('/');
        let token = match style {
            PrefixStyle::Lower => "{lowerprefix}",
            PrefixStyle::Mixed => "{prefix}",
        };
        Self {
            dl: Some(format!("{server}/crates/{token}/{{crate}}/{{crate}}-{{version}}.crate")),
            api: Some(format!("{server}/")),
            extra: BTreeMap::new(),
        }
    }
}
