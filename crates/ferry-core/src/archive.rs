//! Tarballs used to carry a mirror across the air gap.
//!
//! Compression follows the file extension: `.tar.zst`/`.tzst` use zstd,
//! plain `.tar` is stored as-is, anything else is gzip. Archives are built
//! in a temp file next to the destination and renamed into place once
//! complete.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;

use crate::error::{ArchiveError, MirrorError, Result};
use crate::paths::ensure_parent;

const ZSTD_LEVEL: i32 = 3;

/// Compression applied to a tar stream, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// `.tar.gz`, and the default for unknown extensions.
    Gzip,
    /// `.tar.zst` or `.tzst`.
    Zstd,
    /// Plain `.tar`.
    None,
}

impl Compression {
    /// Pick the compression for an archive path.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Self::Zstd
        } else if name.ends_with(".tar") {
            Self::None
        } else {
            Self::Gzip
        }
    }
}

enum Sink {
    Gzip(GzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::Encoder<'static, BufWriter<File>>),
    Plain(BufWriter<File>),
}

impl Sink {
    fn finish(self) -> io::Result<()> {
        match self {
            Self::Gzip(enc) => enc.finish()?.flush(),
            Self::Zstd(enc) => enc.finish()?.flush(),
            Self::Plain(mut w) => w.flush(),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Gzip(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
            Self::Plain(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
            Self::Plain(w) => w.flush(),
        }
    }
}

/// Streaming archive writer.
pub struct ArchiveWriter {
    builder: tar::Builder<Sink>,
    tmp: NamedTempFile,
    dest: PathBuf,
    members: usize,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("dest", &self.dest)
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    /// Start writing an archive for `dest`; nothing appears there until [`ArchiveWriter::finish`].
    pub fn create(dest: &Path) -> std::result::Result<Self, ArchiveError> {
        let io_err = |source| ArchiveError::Io {
            path: dest.to_path_buf(),
            source,
        };
        ensure_parent(dest).map_err(io_err)?;
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        let file = BufWriter::new(tmp.reopen().map_err(io_err)?);

        let sink = match Compression::from_path(dest) {
            Compression::Gzip => Sink::Gzip(GzEncoder::new(file, GzLevel::default())),
            Compression::Zstd => {
                Sink::Zstd(zstd::stream::Encoder::new(file, ZSTD_LEVEL).map_err(io_err)?)
            }
            Compression::None => Sink::Plain(file),
        };
        let mut builder = tar::Builder::new(sink);
        builder.follow_symlinks(true);

        Ok(Self {
            builder,
            tmp,
            dest: dest.to_path_buf(),
            members: 0,
        })
    }

    /// Add the file at `src` under the archive path `member`.
    pub fn append_file(
        &mut self,
        member: &str,
        src: &Path,
    ) -> std::result::Result<(), ArchiveError> {
        tracing::debug!("[pack] {member}");
        self.builder
            .append_path_with_name(src, member)
            .map_err(|source| ArchiveError::Io {
                path: src.to_path_buf(),
                source,
            })?;
        self.members += 1;
        Ok(())
    }

    /// Add an in-memory file.
    pub fn append_bytes(
        &mut self,
        member: &str,
        data: &[u8],
    ) -> std::result::Result<(), ArchiveError> {
        tracing::debug!("[pack] {member}");
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
        );
        header.set_cksum();
        self.builder
            .append_data(&mut header, member, data)
            .map_err(|source| ArchiveError::Io {
                path: self.dest.clone(),
                source,
            })?;
        self.members += 1;
        Ok(())
    }

    /// Finish the stream and move the archive to its destination.
    pub fn finish(self) -> std::result::Result<PathBuf, ArchiveError> {
        let dest = self.dest;
        let io_err = |source| ArchiveError::Io {
            path: dest.clone(),
            source,
        };
        let sink = self.builder.into_inner().map_err(io_err)?;
        sink.finish().map_err(io_err)?;
        self.tmp
            .persist(&dest)
            .map_err(|e| io_err(e.error))?;
        Ok(dest)
    }
}

/// One regular file read from an archive.
pub struct Member<'a> {
    /// Member path inside the archive.
    pub name: String,
    entry: tar::Entry<'a, Box<dyn Read>>,
}

impl std::fmt::Debug for Member<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Member<'_> {
    /// Write the member to `dest`, creating parent directories.
    pub fn extract_to(&mut self, dest: &Path) -> std::result::Result<(), ArchiveError> {
        tracing::debug!("[unpack] {}", self.name);
        let io_err = |source| ArchiveError::Io {
            path: dest.to_path_buf(),
            source,
        };
        ensure_parent(dest).map_err(io_err)?;
        let mut out = BufWriter::new(File::create(dest).map_err(io_err)?);
        io::copy(&mut self.entry, &mut out).map_err(io_err)?;
        out.flush().map_err(io_err)
    }

    /// Read the member as UTF-8 text.
    pub fn read_to_string(&mut self) -> std::result::Result<String, ArchiveError> {
        let mut text = String::new();
        self.entry
            .read_to_string(&mut text)
            .map_err(|source| ArchiveError::Io {
                path: PathBuf::from(&self.name),
                source,
            })?;
        Ok(text)
    }
}

fn open_reader(path: &Path) -> io::Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    Ok(match Compression::from_path(path) {
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Zstd => Box::new(zstd::stream::Decoder::with_buffer(file)?),
        Compression::None => Box::new(file),
    })
}

/// Visit each regular file of the archive at `path`, in archive order.
pub fn read_members<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&mut Member<'_>) -> Result<()>,
{
    let io_err = |source| {
        MirrorError::from(ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    let mut archive = tar::Archive::new(open_reader(path).map_err(io_err)?);
    for entry in archive.entries().map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(io_err)?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        visit(&mut Member { name, entry })?;
    }
    Ok(())
}
