//! Publication guard for the crate index branches.
//!
//! `master` is what cargo sees. It may only move to a commit whose range
//! was downloaded or verified in this run, so every phase that completes
//! that work records its END here, and `mark` asks [`MirrorState::publish`]
//! to move the branches.

use crate::changelog::{Changelog, CommitId, MARK_BRANCH, PUBLISH_BRANCH};
use crate::error::{MirrorError, Result};

/// What this run has processed, and so what `mark` may publish.
#[derive(Debug, Clone, Default)]
pub struct MirrorState {
    processed: Option<CommitId>,
    forced: bool,
}

impl MirrorState {
    /// A state with nothing processed.
    pub fn new() -> Self {
        Self::default()
    }

    /// A state that lets `mark` publish without a processed range.
    ///
    /// Used when `mark` runs on its own, where the caller takes
    /// responsibility for the artifact store being complete.
    pub fn forced() -> Self {
        Self {
            processed: None,
            forced: true,
        }
    }

    /// Record that every artifact up to `end` is present (failures tolerated
    /// by `--keep-going` included).
    pub fn record_processed(&mut self, end: CommitId) {
        self.processed = Some(end);
    }

    /// END of the last range downloaded or verified.
    pub fn processed(&self) -> Option<&CommitId> {
        self.processed.as_ref()
    }

    /// Check that `candidate` may become visible.
    pub fn check_publish(&self, candidate: &CommitId) -> Result<()> {
        match &self.processed {
            Some(done) if done == candidate => Ok(()),
            _ if self.forced => {
                tracing::warn!(
                    "marking {} without downloading or verifying it first",
                    candidate.short()
                );
                Ok(())
            }
            Some(done) => Err(MirrorError::Visibility {
                candidate: candidate.to_string(),
                reason: format!("only {} was processed in this run", done.short()),
            }),
            None => Err(MirrorError::Visibility {
                candidate: candidate.to_string(),
                reason: "nothing was downloaded or verified in this run".to_string(),
            }),
        }
    }

    /// Move `mark` and `master` to `candidate`.
    ///
    /// A branch that is checked out as HEAD is left where it is.
    pub fn publish<C: Changelog + ?Sized>(
        &self,
        changelog: &C,
        candidate: &CommitId,
    ) -> Result<()> {
        self.check_publish(candidate)?;
        let head = changelog.head_branch()?;
        for branch in [MARK_BRANCH, PUBLISH_BRANCH] {
            if head.as_deref() == Some(branch) {
                tracing::warn!("not moving branch \"{branch}\": it is checked out as HEAD");
                continue;
            }
            tracing::info!("{branch} -> {}", candidate.short());
            changelog.write_branch(branch, candidate)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_requires_processed_end() {
        let a = CommitId::new("a".repeat(40));
        let b = CommitId::new("b".repeat(40));

        let mut state = MirrorState::new();
        assert!(matches!(
            state.check_publish(&a),
            Err(MirrorError::Visibility { .. })
        ));

        state.record_processed(a.clone());
        assert!(state.check_publish(&a).is_ok());
        assert!(state.check_publish(&b).is_err());

        state.record_processed(b.clone());
        assert!(state.check_publish(&b).is_ok());
        assert!(state.check_publish(&a).is_err());
    }

    #[test]
    fn forced_state_publishes_anything() {
        let a = CommitId::new("a".repeat(40));
        assert!(MirrorState::forced().check_publish(&a).is_ok());
    }
}
