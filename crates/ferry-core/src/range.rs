//! Ranges of the crate index and the entries they change.
//!
//! A range is a pair of commits. Its entries are the net effect of going
//! from `start` to `end`: every index line that appeared, disappeared or
//! changed its checksum. A changed checksum is reported as the deletion of
//! the old file followed by the addition of the new one, so that prune and
//! download both act on it.

use std::collections::HashMap;

use ferry_schema::{PackageEntry, Sha256Digest};
use serde::Deserialize;

use crate::changelog::{ChangedFile, Changelog, CommitId};
use crate::error::{ChangelogError, MirrorError, ParseWarning, Result};

/// `--start` value meaning "beginning of history".
pub const NO_START: &str = "0";

/// The commits a phase works on: everything after `start` up to `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    /// `None` is the empty tree.
    pub start: Option<CommitId>,
    /// Last commit of the range, inclusive.
    pub end: CommitId,
}

impl Range {
    /// True when `start` and `end` are the same commit.
    pub fn is_empty(&self) -> bool {
        self.start.as_ref() == Some(&self.end)
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.start {
            Some(start) => write!(f, "{}..{}", start.short(), self.end.short()),
            None => write!(f, "0..{}", self.end.short()),
        }
    }
}

/// Entries of a range plus the lines that could not be decoded.
#[derive(Debug, Clone, Default)]
pub struct RangeEntries {
    /// Decoded entries in index order.
    pub entries: Vec<PackageEntry>,
    /// Lines that could not be decoded.
    pub warnings: Vec<ParseWarning>,
}

/// Resolve `--start`/`--end` against the changelog.
///
/// `start == "0"` is the empty tree. A start that does not resolve is an
/// error unless `allow_missing_start` is set, in which case the range
/// covers all of history.
pub fn resolve_range<C: Changelog + ?Sized>(
    changelog: &C,
    start: &str,
    end: &str,
    allow_missing_start: bool,
) -> Result<Range> {
    let end = changelog
        .resolve(end)?
        .ok_or_else(|| ChangelogError::UnknownRef(end.to_string()))?;

    let start = if start == NO_START {
        None
    } else {
        match changelog.resolve(start)? {
            Some(id) => Some(id),
            None if allow_missing_start => {
                tracing::debug!("start '{start}' not found, using beginning of history");
                None
            }
            None => {
                return Err(MirrorError::usage(format!(
                    "invalid start '{start}' (try --allow-missing-start or --start 0)"
                )));
            }
        }
    };
    Ok(Range { start, end })
}

/// Decode the entries of `range`.
pub fn range_entries<C: Changelog + ?Sized>(
    changelog: &C,
    range: &Range,
) -> std::result::Result<RangeEntries, ChangelogError> {
    if range.is_empty() {
        return Ok(RangeEntries::default());
    }
    let files = changelog.diff(range.start.as_ref(), &range.end)?;
    let parsed = parse_changes(&files);
    for warning in &parsed.warnings {
        tracing::warn!("skipping index line {warning}");
    }
    Ok(parsed)
}

#[derive(Deserialize)]
struct IndexLine {
    name: String,
    vers: String,
    cksum: Sha256Digest,
}

struct Decoded {
    line: IndexLine,
    raw: String,
}

fn decode(path: &str, content: Option<&[u8]>, warnings: &mut Vec<ParseWarning>) -> Vec<Decoded> {
    let Some(content) = content else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(content);
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match serde_json::from_str::<IndexLine>(raw) {
            Ok(line) => out.push(Decoded {
                line,
                raw: raw.to_string(),
            }),
            Err(e) => warnings.push(ParseWarning {
                path: path.to_string(),
                line: idx + 1,
                reason: e.to_string(),
            }),
        }
    }
    out
}

fn entry(decoded: &Decoded, deleted: bool) -> PackageEntry {
    PackageEntry {
        name: decoded.line.name.clone(),
        version: decoded.line.vers.clone(),
        checksum: decoded.line.cksum.clone(),
        deleted,
        raw: decoded.raw.clone(),
    }
}

/// Compare old and new content of each changed index file.
///
/// The result is grouped by crate name (stable, so line order survives
/// within a name) with deletions ahead of additions.
pub fn parse_changes(files: &[ChangedFile]) -> RangeEntries {
    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    for file in files {
        let old = decode(&file.path, file.old.as_deref(), &mut warnings);
        let new = decode(&file.path, file.new.as_deref(), &mut warnings);

        let old_by_version: HashMap<&str, &Decoded> =
            old.iter().map(|d| (d.line.vers.as_str(), d)).collect();
        let new_versions: HashMap<&str, &Decoded> =
            new.iter().map(|d| (d.line.vers.as_str(), d)).collect();

        for d in &new {
            match old_by_version.get(d.line.vers.as_str()) {
                Some(prev) if prev.line.cksum == d.line.cksum => {}
                Some(prev) => {
                    entries.push(entry(prev, true));
                    entries.push(entry(d, false));
                }
                None => entries.push(entry(d, false)),
            }
        }
        for d in &old {
            if !new_versions.contains_key(d.line.vers.as_str()) {
                entries.push(entry(d, true));
            }
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name).then(b.deleted.cmp(&a.deleted)));
    RangeEntries { entries, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use crate::changelog::MergeOutcome;

    fn digest(c: char) -> String {
        c.to_string().repeat(64)
    }

    fn line(name: &str, vers: &str, c: char) -> String {
        format!(
            "{{\"name\":\"{name}\",\"vers\":\"{vers}\",\"deps\":[],\"cksum\":\"{}\",\"features\":{{}},\"yanked\":false}}",
            digest(c)
        )
    }

    fn file(path: &str, old: Option<&[String]>, new: Option<&[String]>) -> ChangedFile {
        let join = |lines: &[String]| (lines.join("\n") + "\n").into_bytes();
        ChangedFile {
            path: path.to_string(),
            old: old.map(join),
            new: new.map(join),
        }
    }

    fn specs(parsed: &RangeEntries) -> Vec<String> {
        parsed.entries.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn adds_and_deletes() {
        let files = [
            file("2/gc", None, Some(&[line("gc", "0.3.4", 'a')])),
            file("3/b/brs", None, Some(&[line("brs", "0.2.0", 'b')])),
            file("3/s/scd", Some(&[line("scd", "0.1.3", 'c')]), None),
        ];
        let parsed = parse_changes(&files);
        assert_eq!(specs(&parsed), ["brs@0.2.0", "gc@0.3.4", "-scd@0.1.3"]);
        assert_eq!(parsed.entries[2].checksum.as_str(), digest('c'));
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn appended_version_only() {
        let v1 = line("serde", "1.0.0", 'a');
        let v2 = line("serde", "1.0.1", 'b');
        let files = [file(
            "se/rd/serde",
            Some(std::slice::from_ref(&v1)),
            Some(&[v1.clone(), v2]),
        )];
        assert_eq!(specs(&parse_changes(&files)), ["serde@1.0.1"]);
    }

    #[test]
    fn checksum_change_is_delete_then_add() {
        let files = [file(
            "3/f/foo",
            Some(&[line("foo", "1.0.0", 'a')]),
            Some(&[line("foo", "1.0.0", 'b')]),
        )];
        let parsed = parse_changes(&files);
        assert_eq!(specs(&parsed), ["-foo@1.0.0", "foo@1.0.0"]);
        assert_eq!(parsed.entries[0].checksum.as_str(), digest('a'));
        assert_eq!(parsed.entries[1].checksum.as_str(), digest('b'));
    }

    #[test]
    fn removed_line_is_delete() {
        let keep = line("rand", "0.8.0", 'a');
        let files = [file(
            "ra/nd/rand",
            Some(&[keep.clone(), line("rand", "0.8.1", 'b')]),
            Some(&[keep]),
        )];
        assert_eq!(specs(&parse_changes(&files)), ["-rand@0.8.1"]);
    }

    #[test]
    fn malformed_lines_are_warnings() {
        let files = [file(
            "2/gc",
            None,
            Some(&[
                "not json".to_string(),
                line("gc", "0.3.4", 'a'),
                "{\"name\":\"gc\",\"vers\":\"0.3.5\",\"cksum\":\"short\"}".to_string(),
            ]),
        )];
        let parsed = parse_changes(&files);
        assert_eq!(specs(&parsed), ["gc@0.3.4"]);
        let lines: Vec<usize> = parsed.warnings.iter().map(|w| w.line).collect();
        assert_eq!(lines, [1, 3]);
        assert_eq!(parsed.warnings[0].path, "2/gc");
    }

    /// Resolves a fixed set of names; nothing else is used by `resolve_range`.
    struct Refs(Vec<(&'static str, &'static str)>);

    impl Changelog for Refs {
        fn resolve(
            &self,
            reference: &str,
        ) -> std::result::Result<Option<CommitId>, ChangelogError> {
            Ok(self
                .0
                .iter()
                .find(|(name, _)| *name == reference)
                .map(|(_, id)| CommitId::new(*id)))
        }
        fn read_branch(&self, name: &str) -> std::result::Result<Option<CommitId>, ChangelogError> {
            self.resolve(name)
        }
        fn write_branch(&self, _: &str, _: &CommitId) -> std::result::Result<(), ChangelogError> {
            unimplemented!()
        }
        fn head_branch(&self) -> std::result::Result<Option<String>, ChangelogError> {
            Ok(Some("working".into()))
        }
        fn fetch(&self) -> std::result::Result<CommitId, ChangelogError> {
            unimplemented!()
        }
        fn merge(&self, _: &CommitId) -> std::result::Result<MergeOutcome, ChangelogError> {
            unimplemented!()
        }
        fn reset_to(&self, _: &CommitId) -> std::result::Result<(), ChangelogError> {
            unimplemented!()
        }
        fn diff(
            &self,
            _: Option<&CommitId>,
            _: &CommitId,
        ) -> std::result::Result<Vec<ChangedFile>, ChangelogError> {
            panic!("empty ranges must not be diffed")
        }
        fn export_bundle(
            &self,
            _: Option<&CommitId>,
            _: &CommitId,
            _: &Path,
        ) -> std::result::Result<(), ChangelogError> {
            unimplemented!()
        }
        fn import_bundle(&self, _: &Path) -> std::result::Result<CommitId, ChangelogError> {
            unimplemented!()
        }
        fn origin_bundle_path(&self) -> std::result::Result<PathBuf, ChangelogError> {
            unimplemented!()
        }
        fn read_file(&self, _: &str) -> std::result::Result<Option<Vec<u8>>, ChangelogError> {
            unimplemented!()
        }
        fn commit_file(
            &self,
            _: &str,
            _: &[u8],
            _: &str,
        ) -> std::result::Result<CommitId, ChangelogError> {
            unimplemented!()
        }
    }

    #[test]
    fn start_resolution() {
        let refs = Refs(vec![("HEAD", "bbbb"), ("mark", "aaaa")]);

        let r = resolve_range(&refs, "mark", "HEAD", false).unwrap();
        assert_eq!(r.start, Some(CommitId::new("aaaa")));
        assert_eq!(r.end, CommitId::new("bbbb"));

        let r = resolve_range(&refs, "0", "HEAD", false).unwrap();
        assert_eq!(r.start, None);

        assert!(matches!(
            resolve_range(&refs, "nope", "HEAD", false),
            Err(MirrorError::Usage(_))
        ));
        assert_eq!(resolve_range(&refs, "nope", "HEAD", true).unwrap().start, None);

        assert!(matches!(
            resolve_range(&refs, "0", "missing", false),
            Err(MirrorError::Changelog(ChangelogError::UnknownRef(_)))
        ));
    }

    #[test]
    fn equal_endpoints_are_empty() {
        let refs = Refs(vec![("HEAD", "aaaa"), ("mark", "aaaa")]);
        let r = resolve_range(&refs, "mark", "HEAD", false).unwrap();
        assert!(r.is_empty());
        let parsed = range_entries(&refs, &r).unwrap();
        assert!(parsed.entries.is_empty());
    }
}
