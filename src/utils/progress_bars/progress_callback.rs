// src/utils/progress_bars/progress_callback.rs - Progress callbacks for detection runs

use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;

use crate::models::matching::{DetectionPhase, DetectionProgress};

/// Receives a snapshot after every phase change and before every block.
pub type ProgressCallback = Arc<dyn Fn(&DetectionProgress) + Send + Sync>;

/// Callback that only writes progress to the log
pub fn create_logging_callback(label: &str) -> ProgressCallback {
    let label = label.to_string();
    Arc::new(move |progress: &DetectionProgress| match progress.phase {
        DetectionPhase::Analyzing => debug!("[{}] Progress: analyzing blocks", label),
        DetectionPhase::Processing => debug!(
            "[{}] Progress: block {}/{} ({}) - {} pairs, {} definite, {} maybe",
            label,
            progress.current_block,
            progress.total_blocks,
            progress.block_key.as_deref().unwrap_or("-"),
            progress.pairs_found,
            progress.definite_count,
            progress.maybe_count
        ),
        DetectionPhase::Complete => info!(
            "[{}] Progress: complete - {} pairs across {} blocks",
            label, progress.pairs_found, progress.total_blocks
        ),
    })
}

/// Convenience macro for pushing a snapshot to an optional callback
#[macro_export]
macro_rules! update_progress {
    ($callback:expr, $progress:expr) => {
        if let Some(ref cb) = $callback {
            cb(&$progress);
        }
    };
}

/// Running counters of a detection run, pushed to the callback on each update.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    snapshot: DetectionProgress,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            snapshot: DetectionProgress::analyzing(),
            start_time: Instant::now(),
        }
    }

    pub fn analyzing(&mut self) {
        self.snapshot.phase = DetectionPhase::Analyzing;
        self.emit();
    }

    pub fn set_total_blocks(&mut self, total_blocks: usize) {
        self.snapshot.total_blocks = total_blocks;
    }

    /// Announces the block about to be processed; `index` is zero-based.
    pub fn block_started(&mut self, index: usize, key: &str) {
        self.snapshot.phase = DetectionPhase::Processing;
        self.snapshot.current_block = index + 1;
        self.snapshot.block_key = Some(key.to_string());
        self.emit();
    }

    pub fn record_pairs(&mut self, pairs: usize, definite: usize, maybe: usize) {
        self.snapshot.pairs_found += pairs;
        self.snapshot.definite_count += definite;
        self.snapshot.maybe_count += maybe;
    }

    pub fn complete(&mut self) {
        self.snapshot.phase = DetectionPhase::Complete;
        self.snapshot.block_key = None;
        self.emit();
        debug!(
            "Detection finished in {:.2}s",
            self.start_time.elapsed().as_secs_f64()
        );
    }

    fn emit(&self) {
        update_progress!(self.callback, self.snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_tracker() {
        let seen: Arc<Mutex<Vec<DetectionProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p: &DetectionProgress| {
            seen_clone.lock().unwrap().push(p.clone());
        });

        let mut tracker = ProgressTracker::new(Some(callback));
        tracker.analyzing();
        tracker.set_total_blocks(2);
        tracker.block_started(0, "SM0");
        tracker.record_pairs(3, 1, 2);
        tracker.block_started(1, "JN");
        tracker.complete();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].phase, DetectionPhase::Analyzing);
        assert_eq!(seen[1].current_block, 1);
        assert_eq!(seen[2].block_key.as_deref(), Some("JN"));
        assert_eq!(seen[2].pairs_found, 3);
        assert_eq!(seen[3].phase, DetectionPhase::Complete);
        assert_eq!(seen[3].maybe_count, 2);
    }

    #[test]
    fn test_logging_callback_creation() {
        let callback = create_logging_callback("TestRun");
        callback(&DetectionProgress::analyzing());
    }
}
