// src/utils/config.rs
//! Tuning parameters for blocked duplicate detection.
//! Every value has a default and can be overridden from the environment.

use log::{debug, info};
use std::env;
use std::str::FromStr;

use crate::models::matching::BlockStrategy;

pub const DEFAULT_STRICT_BLOCK_ROWS: usize = 500;
pub const DEFAULT_SAMPLE_BLOCK_ROWS: usize = 2000;
pub const DEFAULT_STRICT_THRESHOLD_BUMP: f64 = 5.0;
pub const DEFAULT_BLOCK_SAMPLE_SIZE: usize = 500;
pub const DEFAULT_MAX_PAIRS_PER_BLOCK: usize = 1000;
pub const DEFAULT_MAX_TOTAL_PAIRS: usize = 10_000;
pub const DEFAULT_ROW_KEY_COLUMN: &str = "_row_id";

#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    /// Blocks with at least this many rows are compared with a raised threshold.
    pub strict_block_min_rows: usize,
    /// Blocks with more than this many rows are sampled.
    pub sample_block_min_rows: usize,
    /// Percentage points added to the acceptance threshold in strict blocks.
    pub strict_threshold_bump: f64,
    /// Rows drawn from a sampled block before pairwise comparison.
    pub block_sample_size: usize,
    /// Most pairs a sampled block may emit.
    pub max_pairs_per_block: usize,
    /// Most pairs a detection run returns.
    pub max_total_pairs: usize,
    /// Column that uniquely identifies a row for deletion.
    pub row_key_column: String,
    /// Fixed seed for block sampling; thread entropy when unset.
    pub sample_seed: Option<u64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            strict_block_min_rows: DEFAULT_STRICT_BLOCK_ROWS,
            sample_block_min_rows: DEFAULT_SAMPLE_BLOCK_ROWS,
            strict_threshold_bump: DEFAULT_STRICT_THRESHOLD_BUMP,
            block_sample_size: DEFAULT_BLOCK_SAMPLE_SIZE,
            max_pairs_per_block: DEFAULT_MAX_PAIRS_PER_BLOCK,
            max_total_pairs: DEFAULT_MAX_TOTAL_PAIRS,
            row_key_column: DEFAULT_ROW_KEY_COLUMN.to_string(),
            sample_seed: None,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl MatchingConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let config = Self {
            strict_block_min_rows: env_or("DEDUPE_STRICT_BLOCK_ROWS", DEFAULT_STRICT_BLOCK_ROWS),
            sample_block_min_rows: env_or("DEDUPE_SAMPLE_BLOCK_ROWS", DEFAULT_SAMPLE_BLOCK_ROWS),
            strict_threshold_bump: env_or(
                "DEDUPE_STRICT_THRESHOLD_BUMP",
                DEFAULT_STRICT_THRESHOLD_BUMP,
            ),
            block_sample_size: env_or("DEDUPE_BLOCK_SAMPLE_SIZE", DEFAULT_BLOCK_SAMPLE_SIZE),
            max_pairs_per_block: env_or("DEDUPE_MAX_PAIRS_PER_BLOCK", DEFAULT_MAX_PAIRS_PER_BLOCK),
            max_total_pairs: env_or("DEDUPE_MAX_TOTAL_PAIRS", DEFAULT_MAX_TOTAL_PAIRS),
            row_key_column: env::var("DEDUPE_ROW_KEY_COLUMN")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ROW_KEY_COLUMN.to_string()),
            sample_seed: env::var("DEDUPE_SAMPLE_SEED")
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok()),
        };
        debug!("Matching config from env: {:?}", config);
        config
    }

    /// Processing strategy for a block of `size` rows.
    pub fn block_strategy_for(&self, size: usize) -> BlockStrategy {
        if size < self.strict_block_min_rows {
            BlockStrategy::Full
        } else if size <= self.sample_block_min_rows {
            BlockStrategy::Strict
        } else {
            BlockStrategy::Sample
        }
    }

    pub fn log_config(&self) {
        info!("⚙️  Blocking configuration:");
        info!(
            "   full < {} rows ≤ strict (+{:.1} pts) ≤ {} rows < sample",
            self.strict_block_min_rows, self.strict_threshold_bump, self.sample_block_min_rows
        );
        info!(
            "   sample {} rows/block, ≤ {} pairs/block, ≤ {} pairs total",
            self.block_sample_size, self.max_pairs_per_block, self.max_total_pairs
        );
        info!("   row key column: {}", self.row_key_column);
    }
}
