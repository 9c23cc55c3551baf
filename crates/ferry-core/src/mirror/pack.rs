//! `pack` and `unpack`: one archive holding an index bundle plus the crate
//! files of a range.
//!
//! Layout:
//!
//! ```text
//! crates/ARCHIVE_FORMAT                 format marker (TOML), always first
//! git/crates.io-index/origin.bundle     commits START..END
//! crates/<prefix>/<name>/<name>-<version>.crate
//! ```
//!
//! The marker records the prefix casing used inside the archive. Readers
//! re-derive the prefix from the crate name, so either casing unpacks into
//! the store's own layout.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ferry_schema::{PrefixStyle, crate_rel_path};
use serde::Deserialize;

use super::{CrateMirror, store_rel_path};
use crate::archive::{ArchiveWriter, read_members};
use crate::changelog::{Changelog, GitChangelog};
use crate::error::{ArchiveError, IntegrityError, MirrorError, Result};
use crate::paths::{join_relative, rel_path_string};

const FORMAT_MEMBER: &str = "crates/ARCHIVE_FORMAT";
const BUNDLE_MEMBER: &str = "git/crates.io-index/origin.bundle";
const CRATES_PREFIX: &str = "crates/";
const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
struct ArchiveFormat {
    format: u32,
    prefix: PrefixStyle,
}

impl ArchiveFormat {
    fn render(&self) -> String {
        format!("format = {}\nprefix = \"{}\"\n", self.format, self.prefix)
    }

    fn parse(text: &str) -> std::result::Result<Self, ArchiveError> {
        match toml::from_str::<Self>(text) {
            Ok(marker) if marker.format == ARCHIVE_FORMAT_VERSION => Ok(marker),
            _ => Err(ArchiveError::UnknownFormat(text.trim().to_string())),
        }
    }
}

impl CrateMirror {
    pub(super) fn pack(&mut self) -> Result<()> {
        let index = GitChangelog::open(&self.opts.index)?;
        let (range, entries) = self.range_entries(&index)?;
        if range.is_empty() {
            self.ctx.reporter.info("No crates to pack");
            return Ok(());
        }
        let config = self.store_config()?;
        self.ctx
            .reporter
            .info(&format!("packing {range} into {}", self.opts.archive.display()));

        let scratch = tempfile::tempdir()?;
        let bundle = self
            .opts
            .bundle_path
            .clone()
            .unwrap_or_else(|| scratch.path().join(super::ORIGIN_BUNDLE));
        index.export_bundle(range.start.as_ref(), &range.end, &bundle)?;

        // Archive member -> store file, sorted by member path.
        let files: BTreeMap<String, PathBuf> = entries
            .iter()
            .filter(|e| !e.deleted)
            .map(|e| {
                let rel = crate_rel_path(&e.name, &e.version, config.archive_prefix);
                (
                    format!("{CRATES_PREFIX}{}", rel_path_string(&rel)),
                    self.store_path(e, config.prefix),
                )
            })
            .collect();

        let marker = ArchiveFormat {
            format: ARCHIVE_FORMAT_VERSION,
            prefix: config.archive_prefix,
        }
        .render();

        let mut writer = ArchiveWriter::create(&self.opts.archive)?;
        writer.append_bytes(FORMAT_MEMBER, marker.as_bytes())?;
        writer.append_file(BUNDLE_MEMBER, &bundle)?;

        let mut good = 0;
        let mut bad = 0;
        for (member, path) in &files {
            if self.ctx.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            if !path.is_file() {
                bad += 1;
                let err = IntegrityError::Missing(path.clone());
                if !self.opts.keep_going {
                    return Err(err.into());
                }
                self.ctx.reporter.failed(member, &err.to_string());
                continue;
            }
            writer.append_file(member, path)?;
            good += 1;
        }
        writer.finish()?;
        self.ctx.reporter.summary("pack", good, bad);
        Ok(())
    }

    pub(super) fn unpack(&mut self) -> Result<()> {
        let index = GitChangelog::open(&self.opts.index)?;
        let origin = index.origin_bundle_path()?;
        if let Some(bundle) = &self.opts.bundle_path {
            if std::path::absolute(bundle)? != std::path::absolute(&origin)? {
                return Err(MirrorError::usage(format!(
                    "--bundle-path {} does not match origin {}",
                    bundle.display(),
                    origin.display()
                )));
            }
        }
        let style = self.store_config()?.prefix;
        let root = self.opts.crates_root.clone();
        let keep_going = self.opts.keep_going;
        let reporter = self.ctx.reporter.clone();
        self.ctx
            .reporter
            .info(&format!("unpacking {}", self.opts.archive.display()));

        let scratch = tempfile::tempdir()?;
        let staged = scratch.path().join(super::ORIGIN_BUNDLE);
        let mut extracted = 0usize;
        let mut saw_bundle = false;
        read_members(&self.opts.archive, |member| {
            if member.name == FORMAT_MEMBER {
                let text = member.read_to_string()?;
                match ArchiveFormat::parse(&text) {
                    Ok(marker) => tracing::debug!("archive prefix style {}", marker.prefix),
                    Err(e) if keep_going => {
                        reporter.warning(&format!("{e}; assuming legacy layout"));
                    }
                    Err(e) => return Err(e.into()),
                }
            } else if member.name == BUNDLE_MEMBER {
                member.extract_to(&staged)?;
                saw_bundle = true;
            } else if let Some(path) = member
                .name
                .strip_prefix(CRATES_PREFIX)
                .and_then(|rel| store_rel_path(rel, style))
                .and_then(|rel| join_relative(&root, &rel))
            {
                member.extract_to(&path)?;
                extracted += 1;
            } else if keep_going {
                reporter.warning(&format!(
                    "skipping unexpected archive member {}",
                    member.name
                ));
            } else {
                return Err(ArchiveError::UnexpectedMember(member.name.clone()).into());
            }
            Ok(())
        })?;

        if saw_bundle {
            let tip = index.import_bundle(&staged)?;
            tracing::debug!("imported bundle at {}", tip.short());
        } else {
            let err = ArchiveError::MissingMember(BUNDLE_MEMBER.to_string());
            if !keep_going {
                return Err(err.into());
            }
            self.ctx.reporter.warning(&err.to_string());
        }
        self.ctx
            .reporter
            .info(&format!("{extracted} extracted crates"));
        Ok(())
    }
}
