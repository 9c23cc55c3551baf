//! SHA256 hashing and `.sha256` sidecar files.
//!
//! Sidecars follow the `sha256sum` binary format, `<hex> *<name>`. The
//! text-mode separator (two spaces) is accepted on read since upstream
//! servers emit both.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use ferry_schema::Sha256Digest;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::IntegrityError;
use crate::paths::path_append;

/// Extension of checksum sidecar files.
pub const HASH_SUFFIX: &str = ".sha256";

static SIDECAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<hash>[0-9a-fA-F]{64}) [ *](?P<name>.*)$").unwrap());

/// SHA256 of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> Sha256Digest {
    Sha256Digest::from_bytes(&Sha256::digest(data).into())
}

/// SHA256 of a file, streamed.
pub fn hash_file(path: &Path) -> Result<Sha256Digest, IntegrityError> {
    let io_err = |source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IntegrityError::Missing(path.to_path_buf())
        } else {
            io_err(e)
        }
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut BufReader::new(file), &mut hasher).map_err(io_err)?;
    Ok(Sha256Digest::from_bytes(&hasher.finalize().into()))
}

/// Fails with `Missing` if `path` is absent and `Mismatch` if its hash differs.
pub fn verify_hash(path: &Path, expected: &Sha256Digest) -> Result<(), IntegrityError> {
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(IntegrityError::Mismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// `<path>.sha256`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    path_append(path, HASH_SUFFIX)
}

/// URL of the sidecar published next to `url`.
pub fn sidecar_url(url: &str) -> String {
    format!("{url}{HASH_SUFFIX}")
}

/// Parse sidecar text into `(digest, file name)`.
pub fn parse_sidecar(text: &str) -> Option<(Sha256Digest, String)> {
    let line = text.strip_suffix('\n').unwrap_or(text);
    let line = line.strip_suffix('\r').unwrap_or(line);
    let caps = SIDECAR_RE.captures(line)?;
    let digest = Sha256Digest::new(&caps["hash"]).ok()?;
    Some((digest, caps["name"].to_string()))
}

/// Sidecar text for `name`, in `sha256sum --binary` form.
pub fn format_sidecar(digest: &Sha256Digest, name: &str) -> String {
    format!("{digest} *{name}\n")
}

/// Read the digest from a sidecar file.
pub fn read_sidecar(path: &Path) -> Result<Sha256Digest, IntegrityError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IntegrityError::Missing(path.to_path_buf())
        } else {
            IntegrityError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    parse_sidecar(&text)
        .map(|(digest, _)| digest)
        .ok_or_else(|| IntegrityError::BadSidecar {
            path: path.to_path_buf(),
            reason: "expected '<sha256> *<name>'".to_string(),
        })
}

/// Write `<path>.sha256` describing `path`.
pub fn write_sidecar_for(path: &Path, digest: &Sha256Digest) -> Result<(), IntegrityError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = sidecar_path(path);
    std::fs::write(&sidecar, format_sidecar(digest, &name)).map_err(|source| IntegrityError::Io {
        path: sidecar,
        source,
    })
}

/// Verify `path` against its `.sha256` sidecar.
pub fn verify_with_sidecar(path: &Path) -> Result<(), IntegrityError> {
    let expected = read_sidecar(&sidecar_path(path))?;
    verify_hash(path, &expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hashes_known_content() {
        assert_eq!(hash_bytes(b"hello").as_str(), HELLO_HASH);
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        std::fs::write(&p, b"hello").unwrap();
        assert_eq!(hash_file(&p).unwrap().as_str(), HELLO_HASH);
    }

    #[test]
    fn sidecar_both_separators() {
        let (d, name) = parse_sidecar(&format!("{HELLO_HASH} *rustc.tar.xz\n")).unwrap();
        assert_eq!(d.as_str(), HELLO_HASH);
        assert_eq!(name, "rustc.tar.xz");

        let (_, name) = parse_sidecar(&format!("{HELLO_HASH}  rustc.tar.xz")).unwrap();
        assert_eq!(name, "rustc.tar.xz");

        assert!(parse_sidecar("nonsense").is_none());
        assert!(parse_sidecar(&format!("{HELLO_HASH}\trustc")).is_none());
    }

    #[test]
    fn verify_reports_missing_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        let expected = Sha256Digest::new(HELLO_HASH).unwrap();

        assert!(matches!(
            verify_hash(&p, &expected),
            Err(IntegrityError::Missing(_))
        ));

        std::fs::write(&p, b"goodbye").unwrap();
        assert!(matches!(
            verify_hash(&p, &expected),
            Err(IntegrityError::Mismatch { .. })
        ));

        std::fs::write(&p, b"hello").unwrap();
        verify_hash(&p, &expected).unwrap();
    }

    #[test]
    fn sidecar_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("rustup-init");
        std::fs::write(&p, b"hello").unwrap();
        write_sidecar_for(&p, &hash_bytes(b"hello")).unwrap();

        let text = std::fs::read_to_string(sidecar_path(&p)).unwrap();
        assert_eq!(text, format!("{HELLO_HASH} *rustup-init\n"));
        verify_with_sidecar(&p).unwrap();

        std::fs::write(&p, b"tampered").unwrap();
        assert!(verify_with_sidecar(&p).is_err());
    }
}
