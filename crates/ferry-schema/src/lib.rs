//! Shared types for ferry.
//!
//! Plain data plus pure functions: package entries read from the crate
//! index, checksums, the directory-sharding prefix rule, name/version
//! filters, and the small config records persisted next to a mirror.

pub mod config;
pub mod filter;
pub mod hash;
pub mod prefix;
pub mod types;

// Re-exports
pub use config::{
    ConfigError, MIRROR_CONFIG_FILE, MirrorConfig, REGISTRY_CONFIG_FILE, RegistryConfig,
};
pub use filter::{Filter, FilterError, FilterSet};
pub use hash::{DigestError, Sha256Digest};
pub use prefix::{PrefixStyle, crate_file_name, crate_prefix, crate_rel_path};
pub use types::{PackageEntry, expand_url_template};

/// Extension of package files in a crate mirror.
pub const CRATE_EXTENSION: &str = "crate";
