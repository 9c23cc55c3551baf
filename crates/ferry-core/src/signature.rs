//! Detached-signature checks for toolchain manifests.
//!
//! Signature verification is a pass/fail oracle behind
//! [`SignatureVerifier`]; the shipped implementation shells out to `gpg`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::error::IntegrityError;
use crate::paths::path_append;

/// Extension of detached signature files.
pub const SIG_SUFFIX: &str = ".asc";

/// Pass/fail check of a detached signature.
pub trait SignatureVerifier: Send + Sync + std::fmt::Debug {
    /// Check that `sig` is a valid signature over `path`.
    fn verify(&self, path: &Path, sig: &Path) -> Result<(), IntegrityError>;
}

/// `gpg --batch --verify SIG FILE`, optionally against a dedicated keyring.
#[derive(Debug, Clone, Default)]
pub struct GpgVerifier {
    homedir: Option<PathBuf>,
}

impl GpgVerifier {
    /// Verify with the default keyring, or the one under `homedir`.
    pub fn new(homedir: Option<PathBuf>) -> Self {
        Self { homedir }
    }
}

impl SignatureVerifier for GpgVerifier {
    fn verify(&self, path: &Path, sig: &Path) -> Result<(), IntegrityError> {
        if !sig.is_file() {
            return Err(IntegrityError::Missing(sig.to_path_buf()));
        }
        let fail = |reason: String| IntegrityError::Signature {
            path: path.to_path_buf(),
            reason,
        };
        let gpg = which::which("gpg").map_err(|e| fail(format!("gpg not found: {e}")))?;

        let mut cmd = Command::new(gpg);
        if let Some(home) = &self.homedir {
            cmd.arg("--homedir").arg(home);
        }
        let output = cmd
            .arg("--batch")
            .arg("--verify")
            .arg(sig)
            .arg(path)
            .output()
            .map_err(|e| fail(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(fail(String::from_utf8_lossy(&output.stderr).trim().to_string()))
        }
    }
}

/// What to do with signatures for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePolicy {
    /// Ignore `.asc` files entirely (`--no-signature`).
    Skip,
    /// Check, but only warn on failure (`--warn-signature`).
    Warn,
    /// Check and fail on a bad or missing signature.
    Require,
}

/// A policy bound to a verifier.
#[derive(Debug, Clone)]
pub struct SignatureCheck {
    policy: SignaturePolicy,
    verifier: Arc<dyn SignatureVerifier>,
}

impl SignatureCheck {
    /// Apply `policy` using `verifier`.
    pub fn new(policy: SignaturePolicy, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { policy, verifier }
    }

    /// Never check signatures.
    pub fn disabled() -> Self {
        Self::new(SignaturePolicy::Skip, Arc::new(GpgVerifier::default()))
    }

    /// False under [`SignaturePolicy::Skip`].
    pub fn enabled(&self) -> bool {
        self.policy != SignaturePolicy::Skip
    }

    /// Signature path for `path`, or `None` when signatures are skipped.
    pub fn sig_path(&self, path: &Path) -> Option<PathBuf> {
        self.enabled().then(|| path_append(path, SIG_SUFFIX))
    }

    /// URL of the signature published next to `url`.
    pub fn sig_url(&self, url: &str) -> String {
        format!("{url}{SIG_SUFFIX}")
    }

    /// Check the signature next to `path` according to the policy.
    pub fn check(&self, path: &Path) -> Result<(), IntegrityError> {
        let Some(sig) = self.sig_path(path) else {
            return Ok(());
        };
        match self.verifier.verify(path, &sig) {
            Ok(()) => Ok(()),
            Err(e) if self.policy == SignaturePolicy::Warn => {
                tracing::warn!("signature failure for {}: {e}", path.display());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct AlwaysBad;

    impl SignatureVerifier for AlwaysBad {
        fn verify(&self, path: &Path, _sig: &Path) -> Result<(), IntegrityError> {
            Err(IntegrityError::Signature {
                path: path.to_path_buf(),
                reason: "bad".into(),
            })
        }
    }

    #[test]
    fn policy_controls_outcome() {
        let p = Path::new("channel-rust-stable.toml");

        let skip = SignatureCheck::new(SignaturePolicy::Skip, Arc::new(AlwaysBad));
        assert!(skip.check(p).is_ok());
        assert!(skip.sig_path(p).is_none());

        let warn = SignatureCheck::new(SignaturePolicy::Warn, Arc::new(AlwaysBad));
        assert!(warn.check(p).is_ok());

        let require = SignatureCheck::new(SignaturePolicy::Require, Arc::new(AlwaysBad));
        assert!(require.check(p).is_err());
        assert_eq!(
            require.sig_path(p),
            Some(PathBuf::from("channel-rust-stable.toml.asc"))
        );
    }

    #[test]
    fn gpg_reports_missing_signature_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("m.toml");
        std::fs::write(&f, "x").unwrap();
        let err = GpgVerifier::default()
            .verify(&f, &dir.path().join("m.toml.asc"))
            .unwrap_err();
        assert!(matches!(err, IntegrityError::Missing(_)));
    }
}
