//! Package entries decoded from the crate index.

use serde::{Deserialize, Serialize};

use crate::hash::Sha256Digest;
use crate::prefix::{PrefixStyle, crate_prefix};

/// One package version as recorded by a single line of the crate index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Package name, with its published casing.
    pub name: String,
    /// Version string as published.
    pub version: String,
    /// SHA256 of the `.crate` file.
    pub checksum: Sha256Digest,
    /// True when the change withdraws this version.
    pub deleted: bool,
    /// The index line this entry was decoded from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

impl PackageEntry {
    /// `name@version`, the form accepted back by `--filter`.
    pub fn spec(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl std::fmt::Display for PackageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.deleted {
            f.write_str("-")?;
        }
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Substitute `{crate}` (or `{name}`), `{version}`, `{prefix}` and
/// `{lowerprefix}` in a download-location template.
///
/// `{prefix}` keeps the crate name's casing, matching what crates.io
/// publishes in its own `dl` template.
pub fn expand_url_template(template: &str, name: &str, version: &str) -> String {
    template
        .replace("{crate}", name)
        .replace("{name}", name)
        .replace("{version}", version)
        .replace("{lowerprefix}", &crate_prefix(name, PrefixStyle::Lower))
        .replace("{prefix}", &crate_prefix(name, PrefixStyle::Mixed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(deleted: bool) -> PackageEntry {
        PackageEntry {
            name: "scd".into(),
            version: "0.1.3".into(),
            checksum: Sha256Digest::new("0".repeat(64)).unwrap(),
            deleted,
            raw: String::new(),
        }
    }

    #[test]
    fn display_marks_deletions() {
        assert_eq!(entry(false).to_string(), "scd@0.1.3");
        assert_eq!(entry(true).to_string(), "-scd@0.1.3");
        assert_eq!(entry(true).spec(), "scd@0.1.3");
    }

    #[test]
    fn template_tokens() {
        let t = "https://static.crates.io/crates/{crate}/{crate}-{version}.crate";
        assert_eq!(
            expand_url_template(t, "serde", "1.0.0"),
            "https://static.crates.io/crates/serde/serde-1.0.0.crate"
        );

        let t = "http://mirror/crates/{prefix}/{name}/{name}-{version}.crate";
        assert_eq!(
            expand_url_template(t, "AbCd", "0.1.0"),
            "http://mirror/crates/Ab/Cd/AbCd/AbCd-0.1.0.crate"
        );

        let t = "/srv/crates/{lowerprefix}/{crate}-{version}.crate";
        assert_eq!(
            expand_url_template(t, "AbCd", "0.1.0"),
            "/srv/crates/ab/cd/AbCd-0.1.0.crate"
        );
    }
}
