//! `download` and `verify` for the crate mirror.

use std::io::Write;
use std::path::{Path, PathBuf};

use ferry_schema::{PackageEntry, Sha256Digest, expand_url_template};

use super::CrateMirror;
use crate::changelog::GitChangelog;
use crate::download::Fetched;
use crate::error::{MirrorError, Result};

/// One crate file to fetch or check.
#[derive(Debug, Clone)]
struct CrateJob {
    url: String,
    dest: PathBuf,
    checksum: Sha256Digest,
}

impl CrateMirror {
    pub(super) async fn transfer(&mut self, download: bool) -> Result<()> {
        let phase = if download { "download" } else { "verify" };
        let index = GitChangelog::open(&self.opts.index)?;
        let (range, entries) = self.range_entries(&index)?;
        drop(index);
        let style = self.store_config()?.prefix;

        let wanted: Vec<&PackageEntry> = entries.iter().filter(|e| !e.deleted).collect();
        let jobs: Vec<CrateJob> = wanted
            .iter()
            .map(|e| CrateJob {
                url: expand_url_template(&self.opts.crates_url, &e.name, &e.version),
                dest: self.store_path(e, style),
                checksum: e.checksum.clone(),
            })
            .collect();

        let downloader = self.ctx.downloader.clone();
        let assume_ok = self.opts.assume_ok;
        let out = self
            .ctx
            .pool
            .run(jobs, move |job: CrateJob| {
                let downloader = downloader.clone();
                async move {
                    if download {
                        downloader
                            .download_verify_hash(&job.url, &job.dest, &job.checksum, assume_ok)
                            .await
                            .map_err(MirrorError::from)
                    } else {
                        downloader
                            .verify_hash(&job.dest, &job.checksum, assume_ok)
                            .await
                            .map(|()| Fetched::Cached)
                            .map_err(MirrorError::from)
                    }
                }
            })
            .await;

        let mut good = Vec::new();
        let mut bad = Vec::new();
        for (entry, result) in wanted.iter().zip(out.results) {
            let spec = entry.spec();
            match result {
                Some(Ok(fetched)) => {
                    let detail = match (download, fetched) {
                        (false, _) => "verified",
                        (true, Fetched::Cached) => "cached file",
                        (true, Fetched::AssumedOk) => "assuming OK",
                        (true, Fetched::Downloaded) => "downloaded",
                    };
                    self.ctx.reporter.done(&spec, detail);
                    good.push(spec);
                }
                Some(Err(e)) => {
                    self.ctx.reporter.failed(&spec, &e.to_string());
                    bad.push(spec);
                }
                None => {}
            }
        }
        if out.cancelled {
            return Err(MirrorError::Cancelled);
        }

        if let Some(path) = &self.opts.good_paths {
            write_spec_list(path, &good)?;
        }
        if let Some(path) = &self.opts.bad_paths {
            write_spec_list(path, &bad)?;
        }

        self.ctx.reporter.summary(phase, good.len(), bad.len());
        if !bad.is_empty() {
            if !self.opts.keep_going {
                return Err(MirrorError::PhaseFailed {
                    phase: phase.to_string(),
                    failed: bad.len(),
                    succeeded: good.len(),
                });
            }
            self.ctx
                .reporter
                .warning(&format!("{phase}: keeping going past {} failures", bad.len()));
        }
        self.state.record_processed(range.end);
        Ok(())
    }
}

/// Write one `name@version` per line, usable as a `--filter-file`.
fn write_spec_list(path: &Path, specs: &[String]) -> Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for spec in specs {
        writeln!(file, "{spec}")?;
    }
    file.flush()?;
    Ok(())
}
