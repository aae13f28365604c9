// src/utils/progress_bars/logging.rs - Logging helpers for detection and merge runs
use log::{info, warn};
use std::time::Instant;

use crate::matching::phonetic::BlockingStrategy;
use crate::models::matching::DetectionResult;

#[derive(Clone)]
pub struct DetectionLogger {
    label: String,
    start_time: Instant,
}

impl DetectionLogger {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            label: format!("{}.{}", table, column),
            start_time: Instant::now(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn log_start(&self, strategy: BlockingStrategy, definite: f64, maybe: f64) {
        info!(
            "[{}] 🔎 🚀 Starting duplicate detection (strategy: {}, definite ≥ {:.1}, maybe ≥ {:.1})",
            self.label, strategy, definite, maybe
        );
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        match details {
            Some(details) => info!(
                "[{}] 🔎 🔄 Phase: {} - {} [+{:.1}s]",
                self.label, phase, details, elapsed.as_secs_f32()
            ),
            None => info!(
                "[{}] 🔎 🔄 Phase: {} [+{:.1}s]",
                self.label, phase, elapsed.as_secs_f32()
            ),
        }
    }

    pub fn log_blocks(&self, distinct_values: usize, total_blocks: usize, oversized: usize) {
        info!(
            "[{}] 🔎 📊 {} distinct values → {} comparable blocks ({} oversized, sampled)",
            self.label, distinct_values, total_blocks, oversized
        );
    }

    pub fn log_block_failed(&self, key: &str, error: &anyhow::Error) {
        warn!(
            "[{}] 🔎 ⚠️  Block '{}' failed and was skipped: {:#}",
            self.label, key, error
        );
    }

    pub fn log_cancelled(&self, blocks_processed: usize, total_blocks: usize) {
        info!(
            "[{}] 🔎 ⏹️  Cancelled after {}/{} blocks [+{:.1}s]",
            self.label,
            blocks_processed,
            total_blocks,
            self.start_time.elapsed().as_secs_f32()
        );
    }

    pub fn log_completion(&self, result: &DetectionResult) {
        info!(
            "[{}] 🔎 ✅ Detection complete: {} pairs found, {} returned ({} definite, {} maybe) from {}/{} blocks in {:.2}s",
            self.label,
            result.total_found,
            result.pairs.len(),
            result.definite_count,
            result.maybe_count,
            result.blocks_processed,
            result.total_blocks,
            self.start_time.elapsed().as_secs_f64()
        );
        if result.failed_blocks > 0 {
            warn!(
                "[{}] 🔎 ⚠️  {} blocks were skipped after engine errors",
                self.label, result.failed_blocks
            );
        }
    }
}

pub fn log_merge_start(table: &str, merged_pairs: usize, audit_entry_id: Option<&str>) {
    info!(
        "[{}] 🧹 Merging {} accepted pairs{}",
        table,
        merged_pairs,
        audit_entry_id
            .map(|id| format!(" (audit entry {})", id))
            .unwrap_or_default()
    );
}

pub fn log_merge_completion(table: &str, deleted: usize, failed: usize, elapsed_secs: f64) {
    if failed > 0 {
        warn!(
            "[{}] 🧹 ⚠️  Merge finished with {} rows deleted and {} failed deletes in {:.2}s",
            table, deleted, failed, elapsed_secs
        );
    } else {
        info!(
            "[{}] 🧹 ✅ Merge finished: {} rows deleted in {:.2}s",
            table, deleted, elapsed_secs
        );
    }
}
