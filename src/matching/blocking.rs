// src/matching/blocking.rs - Key table and block analysis
use log::debug;
use std::collections::{BTreeMap, HashMap};

use crate::matching::phonetic::{BlockingStrategy, KeyGenerator};
use crate::models::matching::{BlockInfo, BlockStrategy};
use crate::utils::config::MatchingConfig;

/// Key of the single block used when blocking is disabled.
pub const ALL_ROWS_BLOCK_KEY: &str = "*";

/// Distinct column value → blocking key, computed once per distinct value.
/// Owned by one detection run and released when the run ends.
pub struct KeyTable {
    strategy: BlockingStrategy,
    keys: HashMap<String, String>,
}

impl KeyTable {
    /// Returns `None` for strategies that bypass keying.
    pub fn build(strategy: BlockingStrategy, value_counts: &[(String, usize)]) -> Option<Self> {
        if !strategy.is_keyed() {
            return None;
        }
        let generator = KeyGenerator::new(strategy);
        let keys = value_counts
            .iter()
            .filter(|(value, _)| !value.trim().is_empty())
            .filter_map(|(value, _)| {
                generator
                    .key_for(value)
                    .map(|key| (value.clone(), key))
            })
            .collect::<HashMap<_, _>>();
        debug!(
            "Built {} key table over {} distinct values",
            strategy,
            keys.len()
        );
        Some(Self { strategy, keys })
    }

    pub fn key(&self, value: &str) -> Option<&str> {
        self.keys.get(value).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Drop for KeyTable {
    fn drop(&mut self) {
        debug!(
            "Released {} key table ({} distinct values)",
            self.strategy,
            self.keys.len()
        );
    }
}

/// Groups distinct values into blocks and assigns each a processing strategy.
///
/// Blank values never enter a block, and blocks with fewer than two rows are
/// dropped since they cannot produce a pair. The result is sorted by ascending
/// size so small blocks finish first.
pub fn analyze_blocks(
    value_counts: &[(String, usize)],
    key_table: Option<&KeyTable>,
    config: &MatchingConfig,
) -> Vec<BlockInfo> {
    let mut grouped: BTreeMap<&str, (usize, Vec<String>)> = BTreeMap::new();

    for (value, count) in value_counts {
        if value.trim().is_empty() || *count == 0 {
            continue;
        }
        let key = match key_table {
            Some(table) => match table.key(value) {
                Some(key) => key,
                None => continue,
            },
            None => ALL_ROWS_BLOCK_KEY,
        };
        let entry = grouped.entry(key).or_insert_with(|| (0, Vec::new()));
        entry.0 += count;
        entry.1.push(value.clone());
    }

    let mut blocks: Vec<BlockInfo> = grouped
        .into_iter()
        .filter(|(_, (size, _))| *size >= 2)
        .map(|(key, (size, values))| BlockInfo {
            key: key.to_string(),
            size,
            strategy: config.block_strategy_for(size),
            values,
        })
        .collect();

    blocks.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.key.cmp(&b.key)));
    blocks
}

pub fn count_oversized(blocks: &[BlockInfo]) -> usize {
    blocks
        .iter()
        .filter(|b| b.strategy == BlockStrategy::Sample)
        .count()
}
