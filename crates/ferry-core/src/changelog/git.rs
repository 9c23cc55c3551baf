//! [`Changelog`] over a local clone of the crate index.
//!
//! Branch moves, merges, diffs and commits go through `git2`. Bundle
//! export, and fetching from a bundle remote, shell out to `git`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use git2::build::CheckoutBuilder;
use git2::{BranchType, Commit, ErrorCode, Oid, Repository, Signature};
use regex::Regex;

use super::{
    ChangedFile, Changelog, CommitId, MergeOutcome, ORIGIN_BRANCH, WORKING_BRANCH,
};
use crate::download::is_remote;
use crate::error::ChangelogError;

const ORIGIN: &str = "origin";
const ORIGIN_MASTER_REF: &str = "refs/remotes/origin/master";
const BUNDLE_BRANCH: &str = "bundle/master";

/// Paths of per-package files in the crate index; everything else
/// (`config.json`, CI files) is ignored when computing a range.
static INDEX_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:1/[^/]+|2/[^/]+|3/[^/]/[^/]+|[^/]{2}/[^/]{2}/[^/]+)$").unwrap()
});

pub(crate) fn is_index_path(path: &str) -> bool {
    INDEX_PATH_RE.is_match(path)
}

/// A crate-index clone driven through libgit2.
pub struct GitChangelog {
    repo: Repository,
}

impl std::fmt::Debug for GitChangelog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitChangelog")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl GitChangelog {
    /// Open an existing index clone.
    pub fn open(index: &Path) -> Result<Self, ChangelogError> {
        if !index.is_dir() {
            return Err(ChangelogError::NotAnIndex(index.to_path_buf()));
        }
        let repo = Repository::open(index).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                ChangelogError::NotAnIndex(index.to_path_buf())
            } else {
                e.into()
            }
        })?;
        Ok(Self { repo })
    }

    /// Create a new clone at `index` whose `origin` is `origin_url`, with
    /// HEAD on an unborn `working` branch that tracks `origin/master`.
    pub fn init(index: &Path, origin_url: &str) -> Result<Self, ChangelogError> {
        if index.exists() {
            return Err(ChangelogError::AlreadyExists(index.to_path_buf()));
        }
        tracing::info!("create index repository at {}", index.display());
        std::fs::create_dir_all(index)?;
        let repo = Repository::init(index)?;

        tracing::info!("remote add origin {origin_url}");
        repo.remote(ORIGIN, origin_url)?;
        repo.set_head(&branch_ref(WORKING_BRANCH))?;

        let mut config = repo.config()?;
        config.set_str("branch.working.remote", ORIGIN)?;
        config.set_str("branch.working.merge", "refs/heads/master")?;

        Ok(Self { repo })
    }

    /// Like [`init`](Self::init) with `origin` pointing at a bundle file;
    /// bundles carry their tip as `bundle/master`, which is mapped onto
    /// `origin/master` as well.
    pub fn init_import(index: &Path, bundle: &Path) -> Result<Self, ChangelogError> {
        let location = std::path::absolute(bundle)?;
        let this = Self::init(index, &location.to_string_lossy())?;
        this.repo
            .remote_add_fetch(ORIGIN, "+refs/heads/bundle/*:refs/remotes/origin/*")?;
        Ok(this)
    }

    fn workdir(&self) -> Result<&Path, ChangelogError> {
        self.repo
            .workdir()
            .ok_or_else(|| ChangelogError::NotAnIndex(self.repo.path().to_path_buf()))
    }

    /// Point HEAD at `working`, creating it from the current HEAD if needed.
    ///
    /// Clones made before `working` existed had `master` checked out. Returns
    /// whether anything changed. A caller-created `working` that is not
    /// checked out is left alone.
    pub fn upgrade_to_working(&self) -> Result<bool, ChangelogError> {
        if self.head_branch()?.as_deref() == Some(WORKING_BRANCH)
            || self.read_branch(WORKING_BRANCH)?.is_some()
        {
            return Ok(false);
        }
        tracing::warn!("Upgrade index to use \"working\" branch as HEAD");
        if let Ok(commit) = self.repo.head().and_then(|h| h.peel_to_commit()) {
            tracing::info!("Checkout new \"working\" branch from current HEAD");
            self.repo.branch(WORKING_BRANCH, &commit, false)?;
        }
        self.repo.set_head(&branch_ref(WORKING_BRANCH))?;
        Ok(true)
    }

    fn origin_url(&self) -> Result<String, ChangelogError> {
        let remote = self
            .repo
            .find_remote(ORIGIN)
            .map_err(|_| ChangelogError::Remote("not configured".to_string()))?;
        remote
            .url()
            .map(str::to_string)
            .ok_or_else(|| ChangelogError::Remote("URL is not valid UTF-8".to_string()))
    }

    fn oid(&self, id: &CommitId) -> Result<Oid, ChangelogError> {
        Oid::from_str(id.as_str()).map_err(|_| ChangelogError::UnknownRef(id.to_string()))
    }

    fn commit(&self, id: &CommitId) -> Result<Commit<'_>, ChangelogError> {
        let oid = self.oid(id)?;
        self.repo
            .find_commit(oid)
            .map_err(|_| ChangelogError::UnknownRef(id.to_string()))
    }

    fn head_refname(&self) -> Result<String, ChangelogError> {
        let head = self.repo.find_reference("HEAD")?;
        Ok(head
            .symbolic_target()
            .map_or_else(|| branch_ref(WORKING_BRANCH), str::to_string))
    }

    fn signature(&self) -> Result<Signature<'static>, ChangelogError> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now("ferry", "ferry@localhost")?),
        }
    }

    fn checkout_head(&self) -> Result<(), ChangelogError> {
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn blob(&self, oid: Oid) -> Result<Option<Vec<u8>>, ChangelogError> {
        if oid.is_zero() {
            return Ok(None);
        }
        Ok(Some(self.repo.find_blob(oid)?.content().to_vec()))
    }

    fn run_git<I, S>(&self, args: I) -> Result<(), ChangelogError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let git = which::which("git")?;
        let args: Vec<S> = args.into_iter().collect();
        tracing::debug!(
            "git {}",
            args.iter()
                .map(|a| a.as_ref().to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let output = Command::new(git)
            .args(&args)
            .current_dir(self.workdir()?)
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ChangelogError::GitCommand {
                args: args
                    .iter()
                    .map(|a| a.as_ref().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Changelog for GitChangelog {
    fn resolve(&self, reference: &str) -> Result<Option<CommitId>, ChangelogError> {
        match self.repo.revparse_single(reference) {
            Ok(obj) => {
                let commit = obj.peel_to_commit()?;
                Ok(Some(CommitId::new(commit.id().to_string())))
            }
            Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::UnbornBranch) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_branch(&self, name: &str) -> Result<Option<CommitId>, ChangelogError> {
        match self.repo.find_branch(name, BranchType::Local) {
            Ok(branch) => Ok(branch.get().target().map(|oid| CommitId::new(oid.to_string()))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_branch(&self, name: &str, target: &CommitId) -> Result<(), ChangelogError> {
        let oid = self.oid(target)?;
        self.repo
            .reference(&branch_ref(name), oid, true, "ferry: move branch")?;
        Ok(())
    }

    fn head_branch(&self) -> Result<Option<String>, ChangelogError> {
        let name = self.head_refname()?;
        Ok(name.strip_prefix("refs/heads/").map(str::to_string))
    }

    fn fetch(&self) -> Result<CommitId, ChangelogError> {
        let url = self.origin_url()?;
        if !is_remote(&url) && !url.contains("://") && !Path::new(&url).is_dir() {
            // libgit2 cannot read bundles.
            self.run_git(["fetch", "--force", ORIGIN])?;
        } else {
            let mut remote = self.repo.find_remote(ORIGIN)?;
            remote.fetch(&[] as &[&str], None, None)?;
        }

        let oid = self
            .repo
            .refname_to_id(ORIGIN_MASTER_REF)
            .map_err(|_| ChangelogError::UnknownRef("origin/master".to_string()))?;
        self.repo
            .reference(&branch_ref(ORIGIN_BRANCH), oid, true, "ferry: fetch origin")?;
        Ok(CommitId::new(oid.to_string()))
    }

    fn merge(&self, incoming: &CommitId) -> Result<MergeOutcome, ChangelogError> {
        let incoming_commit = self.commit(incoming)?;
        let annotated = self.repo.find_annotated_commit(incoming_commit.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::UpToDate);
        }

        if analysis.is_unborn() || analysis.is_fast_forward() {
            let refname = self.head_refname()?;
            self.repo
                .reference(&refname, incoming_commit.id(), true, "ferry: fast-forward")?;
            self.checkout_head()?;
            return Ok(MergeOutcome::FastForward(incoming.clone()));
        }

        let head_commit = self.repo.head()?.peel_to_commit()?;
        let mut index = match self.repo.merge_commits(&head_commit, &incoming_commit, None) {
            Ok(index) => index,
            Err(e) => {
                tracing::debug!("merge failed: {e}");
                return Ok(MergeOutcome::Conflict);
            }
        };
        if index.has_conflicts() {
            return Ok(MergeOutcome::Conflict);
        }

        let tree = self.repo.find_tree(index.write_tree_to(&self.repo)?)?;
        let sig = self.signature()?;
        let id = self.repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            "Merge origin/master",
            &tree,
            &[&head_commit, &incoming_commit],
        )?;
        self.checkout_head()?;
        Ok(MergeOutcome::Merged(CommitId::new(id.to_string())))
    }

    fn reset_to(&self, target: &CommitId) -> Result<(), ChangelogError> {
        let oid = self.commit(target)?.id();
        let refname = self.head_refname()?;
        self.repo.reference(&refname, oid, true, "ferry: reset")?;
        self.checkout_head()
    }

    fn diff(
        &self,
        start: Option<&CommitId>,
        end: &CommitId,
    ) -> Result<Vec<ChangedFile>, ChangelogError> {
        let new_tree = self.commit(end)?.tree()?;
        let old_tree = match start {
            Some(start) => Some(self.commit(start)?.tree()?),
            None => None,
        };
        let diff = self
            .repo
            .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;

        let mut files = Vec::new();
        for delta in diff.deltas() {
            let Some(path) = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .and_then(Path::to_str)
            else {
                continue;
            };
            if !is_index_path(path) {
                continue;
            }
            files.push(ChangedFile {
                path: path.to_string(),
                old: self.blob(delta.old_file().id())?,
                new: self.blob(delta.new_file().id())?,
            });
        }
        Ok(files)
    }

    fn export_bundle(
        &self,
        start: Option<&CommitId>,
        end: &CommitId,
        dest: &Path,
    ) -> Result<(), ChangelogError> {
        self.write_branch(BUNDLE_BRANCH, end)?;
        let dest = std::path::absolute(dest)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut args = vec![
            "bundle".to_string(),
            "create".to_string(),
            dest.to_string_lossy().into_owned(),
        ];
        if let Some(start) = start {
            args.push(format!("^{start}"));
        }
        args.push(BUNDLE_BRANCH.to_string());
        self.run_git(&args)
    }

    fn import_bundle(&self, bundle: &Path) -> Result<CommitId, ChangelogError> {
        let origin = self.origin_bundle_path()?;
        if std::path::absolute(bundle)? != std::path::absolute(&origin)? {
            if let Some(parent) = origin.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(bundle, &origin)?;
        }
        self.fetch()
    }

    fn origin_bundle_path(&self) -> Result<PathBuf, ChangelogError> {
        let url = self.origin_url()?;
        if is_remote(&url) || url.contains("://") {
            return Err(ChangelogError::Remote(format!(
                "URL must be a local bundle file, not {url}"
            )));
        }
        Ok(PathBuf::from(url))
    }

    fn read_file(&self, rel_path: &str) -> Result<Option<Vec<u8>>, ChangelogError> {
        match std::fs::read(self.workdir()?.join(rel_path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn commit_file(
        &self,
        rel_path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<CommitId, ChangelogError> {
        std::fs::write(self.workdir()?.join(rel_path), content)?;

        let mut index = self.repo.index()?;
        index.add_path(Path::new(rel_path))?;
        index.write()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;

        let sig = self.signature()?;
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(CommitId::new(id.to_string()))
    }
}

fn branch_ref(name: &str) -> String {
    format!("refs/heads/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{MARK_BRANCH, PUBLISH_BRANCH};

    /// A bare-bones upstream index with `master` as its only branch.
    struct Upstream {
        dir: tempfile::TempDir,
        repo: Repository,
    }

    impl Upstream {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repository::init(dir.path()).unwrap();
            repo.set_head("refs/heads/master").unwrap();
            Self { dir, repo }
        }

        fn url(&self) -> String {
            self.dir.path().to_string_lossy().into_owned()
        }

        fn commit(&self, files: &[(&str, Option<&str>)]) -> Oid {
            let mut index = self.repo.index().unwrap();
            for (path, content) in files {
                let full = self.dir.path().join(path);
                match content {
                    Some(text) => {
                        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
                        std::fs::write(&full, text).unwrap();
                        index.add_path(Path::new(path)).unwrap();
                    }
                    None => {
                        std::fs::remove_file(&full).unwrap();
                        index.remove_path(Path::new(path)).unwrap();
                    }
                }
            }
            index.write().unwrap();
            let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::now("test", "test@example.com").unwrap();
            let parent = self
                .repo
                .refname_to_id("refs/heads/master")
                .ok()
                .map(|id| self.repo.find_commit(id).unwrap());
            let parents: Vec<&Commit<'_>> = parent.iter().collect();
            self.repo
                .commit(Some("refs/heads/master"), &sig, &sig, "update", &tree, &parents)
                .unwrap()
        }
    }

    fn line(name: &str, vers: &str) -> String {
        format!(
            "{{\"name\":\"{name}\",\"vers\":\"{vers}\",\"cksum\":\"{}\"}}\n",
            "a".repeat(64)
        )
    }

    #[test]
    fn index_paths() {
        assert!(is_index_path("1/a"));
        assert!(is_index_path("2/gc"));
        assert!(is_index_path("3/b/brs"));
        assert!(is_index_path("se/rd/serde"));
        assert!(!is_index_path("config.json"));
        assert!(!is_index_path(".github/workflows/ci.yml"));
        assert!(!is_index_path("3/bb/brs"));
    }

    #[test]
    fn init_refuses_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitChangelog::init(dir.path(), "https://example.invalid/index").unwrap_err();
        assert!(matches!(err, ChangelogError::AlreadyExists(_)));
    }

    #[test]
    fn fetch_fast_forward_and_diff() {
        let up = Upstream::new();
        up.commit(&[("2/gc", Some(&line("gc", "0.3.4"))), ("config.json", Some("{}"))]);

        let work = tempfile::tempdir().unwrap();
        let index = work.path().join("index");
        let log = GitChangelog::init(&index, &up.url()).unwrap();
        assert_eq!(log.head_branch().unwrap().as_deref(), Some(WORKING_BRANCH));
        assert_eq!(log.resolve("HEAD").unwrap(), None);

        let origin = log.fetch().unwrap();
        assert_eq!(log.read_branch(ORIGIN_BRANCH).unwrap(), Some(origin.clone()));
        assert_eq!(
            log.merge(&origin).unwrap(),
            MergeOutcome::FastForward(origin.clone())
        );
        assert!(index.join("2/gc").is_file());
        assert_eq!(log.merge(&origin).unwrap(), MergeOutcome::UpToDate);

        let files = log.diff(None, &origin).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "2/gc");
        assert!(files[0].old.is_none());

        up.commit(&[("2/gc", None), ("3/b/brs", Some(&line("brs", "0.2.0")))]);
        let next = log.fetch().unwrap();
        log.merge(&next).unwrap();
        let files = log.diff(Some(&origin), &next).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["2/gc", "3/b/brs"]);
        assert!(files[0].new.is_none());
        assert!(files[1].old.is_none());
    }

    #[test]
    fn conflicting_config_edit_reports_conflict() {
        let up = Upstream::new();
        up.commit(&[("config.json", Some("{\"dl\": \"upstream\"}\n"))]);

        let work = tempfile::tempdir().unwrap();
        let log = GitChangelog::init(&work.path().join("index"), &up.url()).unwrap();
        let origin = log.fetch().unwrap();
        log.merge(&origin).unwrap();

        log.commit_file("config.json", b"{\"dl\": \"local\"}\n", "local config")
            .unwrap();
        up.commit(&[("config.json", Some("{\"dl\": \"upstream-2\"}\n"))]);
        let next = log.fetch().unwrap();

        assert_eq!(log.merge(&next).unwrap(), MergeOutcome::Conflict);
        log.reset_to(&next).unwrap();
        assert_eq!(log.resolve("HEAD").unwrap(), Some(next));
        assert_eq!(
            log.read_file("config.json").unwrap().unwrap(),
            b"{\"dl\": \"upstream-2\"}\n"
        );
    }

    #[test]
    fn diverged_histories_merge() {
        let up = Upstream::new();
        up.commit(&[("2/gc", Some(&line("gc", "0.3.4")))]);

        let work = tempfile::tempdir().unwrap();
        let log = GitChangelog::init(&work.path().join("index"), &up.url()).unwrap();
        let origin = log.fetch().unwrap();
        log.merge(&origin).unwrap();
        log.commit_file("config.json", b"{}\n", "local config").unwrap();

        up.commit(&[("3/b/brs", Some(&line("brs", "0.2.0")))]);
        let next = log.fetch().unwrap();
        assert!(matches!(log.merge(&next).unwrap(), MergeOutcome::Merged(_)));
        assert!(log.read_file("3/b/brs").unwrap().is_some());
        assert!(log.read_file("config.json").unwrap().is_some());
    }

    #[test]
    fn branches_and_upgrade() {
        let up = Upstream::new();
        let tip = up.commit(&[("2/gc", Some(&line("gc", "0.3.4")))]);

        let work = tempfile::tempdir().unwrap();
        let index = work.path().join("index");
        let log = GitChangelog::init(&index, &up.url()).unwrap();
        let origin = log.fetch().unwrap();
        assert_eq!(origin.as_str(), tip.to_string());
        log.merge(&origin).unwrap();

        assert_eq!(log.read_branch(MARK_BRANCH).unwrap(), None);
        log.write_branch(MARK_BRANCH, &origin).unwrap();
        log.write_branch(PUBLISH_BRANCH, &origin).unwrap();
        assert_eq!(log.resolve(MARK_BRANCH).unwrap(), Some(origin.clone()));
        assert!(!log.upgrade_to_working().unwrap());

        // Simulate a clone from before the working branch existed.
        log.repo.set_head("refs/heads/master").unwrap();
        log.repo
            .find_branch(WORKING_BRANCH, BranchType::Local)
            .unwrap()
            .delete()
            .unwrap();
        assert!(log.upgrade_to_working().unwrap());
        assert_eq!(log.head_branch().unwrap().as_deref(), Some(WORKING_BRANCH));
        assert_eq!(log.read_branch(WORKING_BRANCH).unwrap(), Some(origin));
    }

    #[test]
    fn origin_bundle_path_requires_local_origin() {
        let work = tempfile::tempdir().unwrap();
        let log = GitChangelog::init(&work.path().join("a"), "https://example.invalid/x").unwrap();
        assert!(log.origin_bundle_path().is_err());

        let bundle = work.path().join("b/origin.bundle");
        let log = GitChangelog::init_import(&work.path().join("b"), &bundle).unwrap();
        assert_eq!(log.origin_bundle_path().unwrap(), bundle);
    }
}
