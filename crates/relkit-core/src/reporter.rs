//! Reporter trait for dependency injection
//!
//! The pipeline reports progress through this trait so it is not coupled
//! to a terminal. Structured diagnostics still go through `tracing`; the
//! reporter carries the operator-facing narrative.

use relkit_schema::PackageTarget;

/// Receives operator-facing progress from the pipeline.
pub trait Reporter: Send + Sync {
    /// A pipeline stage has started (e.g. "Compiling").
    fn section(&self, title: &str);

    /// Work on a single target has progressed (e.g. "packaged", "notarized").
    fn artifact(&self, target: &PackageTarget, action: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display a final summary of the run.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn artifact(&self, _: &PackageTarget, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
