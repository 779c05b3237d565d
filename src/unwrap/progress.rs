//! Progress reporting for the unwrapping pipeline.
//!
//! Unwrapping a large mesh can take a while; this module provides a simple
//! progress callback mechanism the pipeline uses to report stage transitions
//! and per-chart completion to callers.
//!
//! # Example
//!
//! ```
//! use peel::unwrap::Progress;
//!
//! let progress = Progress::new(|current, total, message| {
//!     eprintln!("[{}/{}] {}", current, total, message);
//! });
//!
//! // Pass to the unwrap options
//! // let options = UnwrapOptions::default().with_progress(progress);
//! ```

/// A progress callback that receives updates during unwrapping.
///
/// The callback receives:
/// - `current`: Current step (0-based)
/// - `total`: Total number of steps
/// - `message`: Description of the current operation
///
/// The callback may be invoked concurrently from worker threads during the
/// parallel solve stage, hence the `Send + Sync` bound.
pub struct Progress {
    callback: Box<dyn Fn(usize, usize, &str) + Send + Sync>,
}

impl Progress {
    /// Create a new progress reporter with the given callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(usize, usize, &str) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Report progress.
    #[inline]
    pub fn report(&self, current: usize, total: usize, message: &str) {
        (self.callback)(current, total, message);
    }

    /// Report progress within a sub-range.
    ///
    /// Maps progress from `[0, sub_total]` to `[range_current, range_current + 1]`
    /// within a total of `range_total` steps. The pipeline uses this to report
    /// per-chart completion within the solve stage's slice of the overall run.
    #[inline]
    pub fn report_sub(
        &self,
        sub_current: usize,
        sub_total: usize,
        range_current: usize,
        range_total: usize,
        message: &str,
    ) {
        if sub_total == 0 || range_total == 0 {
            return;
        }
        // Map sub-progress to the range [range_current, range_current + 1)
        // Using fixed-point math to avoid floating point: multiply by 1000 for precision
        let sub_fraction = (sub_current * 1000) / sub_total;
        let effective = range_current * 1000 + sub_fraction;
        let total_scaled = range_total * 1000;
        (self.callback)(effective, total_scaled, message);
    }

    /// Create a no-op progress reporter that discards all updates.
    pub fn none() -> Self {
        Self::new(|_, _, _| {})
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_report() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let progress = Progress::new(move |_, _, _| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        progress.report(0, 4, "segmenting");
        progress.report(1, 4, "cutting");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_report_sub_scaling() {
        let last = Arc::new(AtomicUsize::new(usize::MAX));
        let last2 = Arc::clone(&last);
        let progress = Progress::new(move |current, _, _| {
            last2.store(current, Ordering::SeqCst);
        });

        // Halfway through stage 2 of 4
        progress.report_sub(5, 10, 2, 4, "solving charts");
        assert_eq!(last.load(Ordering::SeqCst), 2500);
    }

    #[test]
    fn test_none_is_silent() {
        let progress = Progress::none();
        progress.report(0, 1, "noop");
        progress.report_sub(0, 0, 0, 0, "degenerate totals ignored");
    }
}
