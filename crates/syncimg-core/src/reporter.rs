//! Reporter trait for dependency injection
//!
//! Core logic reports progress through this trait instead of logging
//! directly, so the binary decides how output is rendered and tests can
//! capture it. Every call carries a nesting `depth` (distro, build, arch,
//! file) which implementations render as indentation.

use tracing::{error, info, warn};

pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Processing precise", "Publishing").
    fn section(&self, depth: usize, title: &str);

    /// Log an informational message.
    fn info(&self, depth: usize, msg: &str);

    /// Log a success message.
    fn success(&self, depth: usize, msg: &str);

    /// Log a warning message.
    fn warning(&self, depth: usize, msg: &str);

    /// Log an error message.
    fn error(&self, depth: usize, msg: &str);

    /// Display a final summary line.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, depth: usize, title: &str) {
        (**self).section(depth, title);
    }
    fn info(&self, depth: usize, msg: &str) {
        (**self).info(depth, msg);
    }
    fn success(&self, depth: usize, msg: &str) {
        (**self).success(depth, msg);
    }
    fn warning(&self, depth: usize, msg: &str) {
        (**self).warning(depth, msg);
    }
    fn error(&self, depth: usize, msg: &str) {
        (**self).error(depth, msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _depth: usize, _title: &str) {}
    fn info(&self, _depth: usize, _msg: &str) {}
    fn success(&self, _depth: usize, _msg: &str) {}
    fn warning(&self, _depth: usize, _msg: &str) {}
    fn error(&self, _depth: usize, _msg: &str) {}
    fn summary(&self, _count: usize, _action: &str, _elapsed_secs: f64) {}
}

/// Emits `tracing` events, two spaces of indentation per depth level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

fn pad(depth: usize) -> String {
    "  ".repeat(depth)
}

impl Reporter for TracingReporter {
    fn section(&self, depth: usize, title: &str) {
        info!("{}== {title}", pad(depth));
    }

    fn info(&self, depth: usize, msg: &str) {
        info!("{}{msg}", pad(depth));
    }

    fn success(&self, depth: usize, msg: &str) {
        info!("{}ok: {msg}", pad(depth));
    }

    fn warning(&self, depth: usize, msg: &str) {
        warn!("{}{msg}", pad(depth));
    }

    fn error(&self, depth: usize, msg: &str) {
        error!("{}{msg}", pad(depth));
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        info!("{count} {action} in {elapsed_secs:.1}s");
    }
}
