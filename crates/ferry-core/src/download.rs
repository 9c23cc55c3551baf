//! Fetching artifacts with streaming SHA256 verification.
//!
//! Sources are either `http(s)` URLs or local paths (optionally
//! `file://`-prefixed). Both are streamed into a sibling `.tmp` file that is
//! renamed into place only after the whole body has arrived, so an
//! interrupted fetch never leaves a truncated artifact at its final path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_schema::Sha256Digest;
use futures::{Stream, StreamExt};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{DownloadError, IntegrityError, TransportError};
use crate::integrity;
use crate::paths::{ensure_parent, tmp_path_for};
use crate::signature::SignatureCheck;

/// How a file ended up valid on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// Already present with the right hash.
    Cached,
    /// Present, hash not checked (`--assume-ok`).
    AssumedOk,
    /// Transferred from the source.
    Downloaded,
}

/// Fetches artifacts from HTTP(S) URLs or local paths.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    /// `timeout_secs == 0` disables the per-request timeout.
    pub fn new(timeout_secs: u64) -> Result<Self, TransportError> {
        let mut builder = Client::builder().user_agent(crate::USER_AGENT);
        if timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        let client = builder.build().map_err(TransportError::Client)?;
        Ok(Self { client })
    }

    /// Fetch `url` into `dest`, returning the SHA256 of what was written.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<Sha256Digest, TransportError> {
        let tmp = tmp_path_for(dest);
        ensure_parent(dest).map_err(|source| write_err(dest, source))?;

        let written = if is_remote(url) {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|source| http_err(url, source))?;
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|source| http_err(url, source)));
            write_stream(stream, &tmp).await
        } else {
            let src = local_path(url);
            let file = File::open(&src)
                .await
                .map_err(|source| TransportError::Local {
                    path: src.clone(),
                    source,
                })?;
            let stream = ReaderStream::new(file).map(|chunk| {
                chunk.map_err(|source| TransportError::Local {
                    path: src.clone(),
                    source,
                })
            });
            write_stream(stream, &tmp).await
        };

        match written {
            Ok(digest) => {
                tokio::fs::rename(&tmp, dest)
                    .await
                    .map_err(|source| write_err(dest, source))?;
                Ok(digest)
            }
            Err(e) => {
                tokio::fs::remove_file(&tmp).await.ok();
                Err(e)
            }
        }
    }

    /// Ensure `dest` holds the file whose hash is `expected`, fetching it
    /// from `url` only when it is absent or stale.
    pub async fn download_verify_hash(
        &self,
        url: &str,
        dest: &Path,
        expected: &Sha256Digest,
        assume_ok: bool,
    ) -> Result<Fetched, DownloadError> {
        if assume_ok && dest.is_file() {
            return Ok(Fetched::AssumedOk);
        }
        if hash_blocking(dest.to_path_buf()).await.as_ref() == Some(expected) {
            return Ok(Fetched::Cached);
        }

        tracing::debug!("[downloading] {}", dest.display());
        let actual = self.fetch(url, dest).await?;
        if &actual != expected {
            tokio::fs::remove_file(dest).await.ok();
            return Err(IntegrityError::Mismatch {
                path: dest.to_path_buf(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            }
            .into());
        }
        Ok(Fetched::Downloaded)
    }

    /// Like [`download_verify_hash`](Self::download_verify_hash) for files
    /// published with a `.sha256` sidecar (and optionally a signature).
    ///
    /// The sidecar is always re-fetched on download so a changed upstream
    /// file is noticed; `cached == false` skips the on-disk shortcut.
    pub async fn download_verify(
        &self,
        url: &str,
        dest: &Path,
        cached: bool,
        assume_ok: bool,
        signature: &SignatureCheck,
    ) -> Result<Fetched, DownloadError> {
        let sidecar = integrity::sidecar_path(dest);
        let sig_path = signature.sig_path(dest);

        if cached {
            if assume_ok
                && dest.is_file()
                && sidecar.is_file()
                && sig_path.as_ref().is_none_or(|p| p.is_file())
            {
                return Ok(Fetched::AssumedOk);
            }
            if verify_sidecar_blocking(dest.to_path_buf()).await.is_ok()
                && signature.check(dest).is_ok()
            {
                return Ok(Fetched::Cached);
            }
        }

        tracing::debug!("[downloading] {}", dest.display());
        self.fetch(&integrity::sidecar_url(url), &sidecar).await?;
        if let Some(sig_path) = &sig_path {
            self.fetch(&signature.sig_url(url), sig_path).await?;
        }

        let mut fetched = Fetched::Cached;
        if verify_sidecar_blocking(dest.to_path_buf()).await.is_err() {
            self.fetch(url, dest).await?;
            verify_sidecar_blocking(dest.to_path_buf()).await?;
            fetched = Fetched::Downloaded;
        }
        signature.check(dest)?;
        Ok(fetched)
    }

    /// Verify `dest` against `expected` without fetching anything.
    pub async fn verify_hash(
        &self,
        dest: &Path,
        expected: &Sha256Digest,
        assume_ok: bool,
    ) -> Result<(), IntegrityError> {
        if assume_ok {
            return if dest.is_file() {
                Ok(())
            } else {
                Err(IntegrityError::Missing(dest.to_path_buf()))
            };
        }
        let dest = dest.to_path_buf();
        let expected = expected.clone();
        tokio::task::spawn_blocking(move || integrity::verify_hash(&dest, &expected))
            .await
            .unwrap_or_else(|e| Err(join_err(e)))
    }

    /// Verify `dest` against its sidecar (and signature, when enabled).
    pub async fn verify(
        &self,
        dest: &Path,
        signature: &SignatureCheck,
    ) -> Result<(), IntegrityError> {
        verify_sidecar_blocking(dest.to_path_buf()).await?;
        signature.check(dest)
    }
}

/// True for `http:` and `https:` URLs; everything else is a local path.
pub fn is_remote(url: &str) -> bool {
    url.starts_with("http:") || url.starts_with("https:")
}

fn local_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

async fn write_stream<S, B>(mut stream: S, tmp: &Path) -> Result<Sha256Digest, TransportError>
where
    S: Stream<Item = Result<B, TransportError>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut file = File::create(tmp)
        .await
        .map_err(|source| write_err(tmp, source))?;
    let mut hasher = Sha256::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let bytes = chunk.as_ref();
        file.write_all(bytes)
            .await
            .map_err(|source| write_err(tmp, source))?;
        hasher.update(bytes);
    }

    file.flush().await.map_err(|source| write_err(tmp, source))?;
    Ok(Sha256Digest::from_bytes(&hasher.finalize().into()))
}

async fn hash_blocking(path: PathBuf) -> Option<Sha256Digest> {
    tokio::task::spawn_blocking(move || integrity::hash_file(&path).ok())
        .await
        .ok()
        .flatten()
}

async fn verify_sidecar_blocking(path: PathBuf) -> Result<(), IntegrityError> {
    tokio::task::spawn_blocking(move || integrity::verify_with_sidecar(&path))
        .await
        .unwrap_or_else(|e| Err(join_err(e)))
}

fn join_err(e: tokio::task::JoinError) -> IntegrityError {
    IntegrityError::Io {
        path: PathBuf::new(),
        source: std::io::Error::other(e),
    }
}

fn http_err(url: &str, source: reqwest::Error) -> TransportError {
    TransportError::Http {
        url: url.to_string(),
        source,
    }
}

fn write_err(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Write {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::{hash_bytes, sidecar_path};
    use mockito::Server;

    fn no_sig() -> SignatureCheck {
        SignatureCheck::disabled()
    }

    #[tokio::test]
    async fn http_download_is_verified_then_cached() {
        let mut server = Server::new_async().await;
        let body = b"crate bytes";
        let m = server
            .mock("GET", "/gc/gc-0.3.4.crate")
            .with_status(200)
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("2/gc/gc-0.3.4.crate");
        let url = format!("{}/gc/gc-0.3.4.crate", server.url());
        let dl = Downloader::new(5).unwrap();
        let expected = hash_bytes(body);

        let first = dl.download_verify_hash(&url, &dest, &expected, false).await.unwrap();
        assert_eq!(first, Fetched::Downloaded);
        let second = dl.download_verify_hash(&url, &dest, &expected, false).await.unwrap();
        assert_eq!(second, Fetched::Cached);

        m.assert_async().await;
        assert!(!tmp_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn mismatch_removes_file() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/x.crate")
            .with_status(200)
            .with_body("wrong")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.crate");
        let url = format!("{}/x.crate", server.url());
        let dl = Downloader::new(0).unwrap();

        let err = dl
            .download_verify_hash(&url, &dest, &hash_bytes(b"right"), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Integrity(IntegrityError::Mismatch { .. })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn http_error_status_is_transport_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/missing.crate")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.crate");
        let url = format!("{}/missing.crate", server.url());
        let err = Downloader::new(0)
            .unwrap()
            .download_verify_hash(&url, &dest, &hash_bytes(b""), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Transport(TransportError::Http { .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn local_source_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.crate");
        std::fs::write(&src, b"local").unwrap();
        let dest = dir.path().join("out/dest.crate");

        let dl = Downloader::new(0).unwrap();
        let url = format!("file://{}", src.display());
        let got = dl
            .download_verify_hash(&url, &dest, &hash_bytes(b"local"), false)
            .await
            .unwrap();
        assert_eq!(got, Fetched::Downloaded);
        assert_eq!(std::fs::read(&dest).unwrap(), b"local");
    }

    #[tokio::test]
    async fn assume_ok_skips_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.crate");
        std::fs::write(&dest, b"whatever").unwrap();
        let dl = Downloader::new(0).unwrap();
        let got = dl
            .download_verify_hash("http://unused.invalid/a", &dest, &hash_bytes(b"x"), true)
            .await
            .unwrap();
        assert_eq!(got, Fetched::AssumedOk);
    }

    #[tokio::test]
    async fn sidecar_download() {
        let mut server = Server::new_async().await;
        let body = b"rustup-init binary";
        let digest = hash_bytes(body);
        let _file = server
            .mock("GET", "/archive/1.0.0/x/rustup-init")
            .with_body(body)
            .expect(1)
            .create_async()
            .await;
        let _sum = server
            .mock("GET", "/archive/1.0.0/x/rustup-init.sha256")
            .with_body(format!("{digest}  rustup-init\n"))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("archive/1.0.0/x/rustup-init");
        let url = format!("{}/archive/1.0.0/x/rustup-init", server.url());
        let dl = Downloader::new(0).unwrap();

        let got = dl.download_verify(&url, &dest, true, false, &no_sig()).await.unwrap();
        assert_eq!(got, Fetched::Downloaded);
        assert!(sidecar_path(&dest).is_file());

        let again = dl.download_verify(&url, &dest, true, false, &no_sig()).await.unwrap();
        assert_eq!(again, Fetched::Cached);
        dl.verify(&dest, &no_sig()).await.unwrap();
    }
}
