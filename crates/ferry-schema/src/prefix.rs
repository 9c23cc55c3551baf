//! Directory-sharding prefixes for crate names.
//!
//! Both the crate index and the artifact tree shard packages by a short
//! prefix derived from the name:
//!
//! | name length | prefix            |
//! |-------------|-------------------|
//! | 1           | `1`               |
//! | 2           | `2`               |
//! | 3           | `3/<c0>`          |
//! | 4+          | `<c0c1>/<c2c3>`   |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::CRATE_EXTENSION;

/// Casing rule applied to the prefix directories.
///
/// `Lower` folds the prefix to lowercase so that `SomeCrate` and `somecrate`
/// share a directory. `Mixed` keeps the original casing; it is the legacy
/// layout and must not be used on a case-insensitive filesystem, where
/// `So/me` and `so/me` would alias.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixStyle {
    /// Lowercase prefix directories (default).
    #[default]
    Lower,
    /// Prefix directories keep the crate name's casing.
    Mixed,
}

impl PrefixStyle {
    /// The lowercase spelling used in config files and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lower => "lower",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for PrefixStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrefixStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lower" => Ok(Self::Lower),
            "mixed" => Ok(Self::Mixed),
            other => Err(format!("invalid prefix style '{other}' (expected lower or mixed)")),
        }
    }
}

/// Compute the sharding prefix for `name`.
pub fn crate_prefix(name: &str, style: PrefixStyle) -> String {
    let name = match style {
        PrefixStyle::Lower => name.to_lowercase(),
        PrefixStyle::Mixed => name.to_string(),
    };
    let chars: Vec<char> = name.chars().collect();
    match chars.len() {
        0 | 1 => "1".to_string(),
        2 => "2".to_string(),
        3 => format!("3/{}", chars[0]),
        _ => {
            let first: String = chars[..2].iter().collect();
            let second: String = chars[2..4].iter().collect();
            format!("{first}/{second}")
        }
    }
}

/// File name of a crate archive: `<name>-<version>.crate`.
pub fn crate_file_name(name: &str, version: &str) -> String {
    format!("{name}-{version}.{CRATE_EXTENSION}")
}

/// Store-relative path: `<prefix>/<name>/<name>-<version>.crate`.
pub fn crate_rel_path(name: &str, version: &str, style: PrefixStyle) -> PathBuf {
    let mut path = PathBuf::new();
    for part in crate_prefix(name, style).split('/') {
        path.push(part);
    }
    path.push(name);
    path.push(crate_file_name(name, version));
    path
}
