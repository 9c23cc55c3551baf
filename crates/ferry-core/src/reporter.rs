//! Reporter trait for dependency injection
//!
//! Phases report progress through this trait instead of printing, so the
//! engine stays independent of how the CLI presents it.

/// Progress sink for mirror phases.
pub trait Reporter: Send + Sync {
    /// A new phase or section has started (e.g. "download", "Pack: stable").
    fn section(&self, title: &str);

    /// One item finished successfully; `detail` is a short tag such as
    /// `downloaded` or `cached`.
    fn done(&self, item: &str, detail: &str);

    /// One item failed with a reason.
    fn failed(&self, item: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Final tally for a phase.
    fn summary(&self, phase: &str, good: usize, bad: usize);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn done(&self, item: &str, detail: &str) {
        (**self).done(item, detail);
    }
    fn failed(&self, item: &str, reason: &str) {
        (**self).failed(item, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, phase: &str, good: usize, bad: usize) {
        (**self).summary(phase, good, bad);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn done(&self, _: &str, _: &str) {}
    fn failed(&self, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: &str, _: usize, _: usize) {}
}

/// Forwards everything to `tracing`: per-item chatter at debug, failures at
/// error, phase banners and tallies at info.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn section(&self, title: &str) {
        tracing::info!("{title}...");
    }
    fn done(&self, item: &str, detail: &str) {
        tracing::debug!("[{detail}] {item}");
    }
    fn failed(&self, item: &str, reason: &str) {
        tracing::error!("{item}: {reason}");
    }
    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }
    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }
    fn summary(&self, phase: &str, good: usize, bad: usize) {
        tracing::info!(phase, "{bad} bad paths, {good} good paths");
    }
}
