//! Shared run context.
//!
//! Groups what every store needs for one invocation: the HTTP downloader,
//! the bounded worker pool (with its cancellation token) and the reporter.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::download::Downloader;
use crate::error::TransportError;
use crate::pool::WorkerPool;
use crate::reporter::Reporter;

/// Default number of concurrent transfers.
pub const DEFAULT_NUM_JOBS: usize = 4;

/// Downloader, worker pool and reporter for one invocation.
#[derive(Clone)]
pub struct Context {
    /// HTTP and local-path fetcher.
    pub downloader: Downloader,
    /// Bounded pool for per-file tasks.
    pub pool: WorkerPool,
    /// Progress and summary sink.
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("jobs", &self.pool.jobs())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Bundle existing parts.
    pub fn new(downloader: Downloader, pool: WorkerPool, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            downloader,
            pool,
            reporter,
        }
    }

    /// Build a context from the common CLI knobs.
    pub fn from_settings(
        num_jobs: usize,
        timeout_secs: u64,
        cancel: CancellationToken,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(
            Downloader::new(timeout_secs)?,
            WorkerPool::new(num_jobs, cancel),
            reporter,
        ))
    }

    /// True once the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.pool.cancel_token().is_cancelled()
    }
}
