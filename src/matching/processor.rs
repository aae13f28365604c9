// src/matching/processor.rs - Block-by-block duplicate detection
use anyhow::{bail, Context, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::str::FromStr;
use uuid::Uuid;

use crate::engine::{EngineGate, TableEngine};
use crate::matching::blocking::{analyze_blocks, count_oversized, KeyTable};
use crate::matching::curator::{classify, stratified_sort};
use crate::matching::phonetic::BlockingStrategy;
use crate::matching::similarity::{calculate_field_similarities, jaro_winkler_similarity};
use crate::models::core::Row;
use crate::models::matching::{
    BlockInfo, BlockStrategy, DetectionResult, MatchPair, MatchZone,
};
use crate::utils::cancellation::CancellationToken;
use crate::utils::config::MatchingConfig;
use crate::utils::progress_bars::logging::DetectionLogger;
use crate::utils::progress_bars::progress_callback::{ProgressCallback, ProgressTracker};

/// What to look for duplicates in, and how to judge them.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRequest {
    pub table: String,
    pub column: String,
    pub strategy: BlockingStrategy,
    /// Pairs at or above this similarity are definite matches.
    pub definite_threshold: f64,
    /// Pairs below this similarity are never emitted.
    pub maybe_threshold: f64,
}

impl DetectionRequest {
    pub fn new(
        table: &str,
        column: &str,
        strategy: BlockingStrategy,
        definite_threshold: f64,
        maybe_threshold: f64,
    ) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            strategy,
            definite_threshold,
            maybe_threshold,
        }
    }

    /// Builds a request from a strategy name; unknown names are an error.
    pub fn parse(
        table: &str,
        column: &str,
        strategy: &str,
        definite_threshold: f64,
        maybe_threshold: f64,
    ) -> Result<Self> {
        let strategy = BlockingStrategy::from_str(strategy)?;
        Ok(Self::new(table, column, strategy, definite_threshold, maybe_threshold))
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |t: f64| (0.0..=100.0).contains(&t);
        if !in_range(self.definite_threshold) || !in_range(self.maybe_threshold) {
            bail!(
                "Thresholds must be within 0-100 (definite {}, maybe {})",
                self.definite_threshold,
                self.maybe_threshold
            );
        }
        if self.maybe_threshold > self.definite_threshold {
            bail!(
                "Maybe threshold {} exceeds definite threshold {}",
                self.maybe_threshold,
                self.definite_threshold
            );
        }
        if self.table.trim().is_empty() || self.column.trim().is_empty() {
            bail!("Table and column must be named");
        }
        Ok(())
    }
}

/// Acceptance threshold for a block, raised for strict blocks.
pub fn block_threshold(strategy: BlockStrategy, maybe_threshold: f64, config: &MatchingConfig) -> f64 {
    match strategy {
        BlockStrategy::Strict => (maybe_threshold + config.strict_threshold_bump).min(100.0),
        BlockStrategy::Full | BlockStrategy::Sample => maybe_threshold,
    }
}

/// Row indices and match-column similarity of one accepted pair.
pub type ScoredPair = (usize, usize, f64);

/// Scores every `i < j` pair of non-blank values at or above `threshold`.
pub fn score_block_pairs(values: &[String], threshold: f64) -> Vec<ScoredPair> {
    let mut scored = Vec::new();
    for i in 0..values.len() {
        if values[i].trim().is_empty() {
            continue;
        }
        for j in (i + 1)..values.len() {
            if values[j].trim().is_empty() {
                continue;
            }
            let similarity = jaro_winkler_similarity(&values[i], &values[j]);
            if similarity >= threshold {
                scored.push((i, j, similarity));
            }
        }
    }
    scored
}

/// Keeps the `cap` best scored pairs, best first.
pub fn keep_best(mut scored: Vec<ScoredPair>, cap: usize) -> Vec<ScoredPair> {
    let by_similarity_desc = |a: &ScoredPair, b: &ScoredPair| b.2.total_cmp(&a.2);
    if cap == 0 {
        return Vec::new();
    }
    if scored.len() > cap {
        scored.select_nth_unstable_by(cap - 1, by_similarity_desc);
        scored.truncate(cap);
    }
    scored.sort_by(by_similarity_desc);
    scored
}

/// Materializes scored pairs into match pairs with their field breakdowns.
pub fn build_pairs(rows: &[Row], scored: &[ScoredPair], columns: &[String]) -> Vec<MatchPair> {
    scored
        .iter()
        .map(|&(i, j, similarity)| {
            MatchPair::new(
                Uuid::new_v4().to_string(),
                rows[i].clone(),
                rows[j].clone(),
                similarity,
                calculate_field_similarities(&rows[i], &rows[j], columns),
            )
        })
        .collect()
}

/// Compares every pair of rows inside one block.
///
/// Sampled blocks are first cut down to `block_sample_size` random rows and
/// emit at most `max_pairs_per_block` pairs, best first. Rows are cloned and
/// field breakdowns computed only for emitted pairs.
pub fn compare_block<R: Rng + ?Sized>(
    mut rows: Vec<Row>,
    block: &BlockInfo,
    column: &str,
    columns: &[String],
    maybe_threshold: f64,
    config: &MatchingConfig,
    rng: &mut R,
) -> Vec<MatchPair> {
    if block.strategy == BlockStrategy::Sample && rows.len() > config.block_sample_size {
        let (sampled, _) = rows.partial_shuffle(rng, config.block_sample_size);
        rows = sampled.to_vec();
    }

    let threshold = block_threshold(block.strategy, maybe_threshold, config);
    let values: Vec<String> = rows.iter().map(|row| row.text(column)).collect();
    let mut scored = score_block_pairs(&values, threshold);
    if block.strategy == BlockStrategy::Sample {
        scored = keep_best(scored, config.max_pairs_per_block);
    }
    build_pairs(&rows, &scored, columns)
}

/// Runs detection while holding the engine gate for the whole run.
pub async fn find_duplicates_chunked<E: TableEngine>(
    gate: &EngineGate<E>,
    request: &DetectionRequest,
    config: &MatchingConfig,
    on_progress: Option<ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<DetectionResult> {
    let engine = gate.acquire().await;
    run_detection(&*engine, request, config, on_progress, cancel).await
}

/// Detection against an engine the caller already has exclusive access to.
///
/// A failing block is logged and skipped. Cancellation is honoured between
/// blocks and yields the partial result gathered so far.
pub async fn run_detection<E: TableEngine + ?Sized>(
    engine: &E,
    request: &DetectionRequest,
    config: &MatchingConfig,
    on_progress: Option<ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<DetectionResult> {
    request.validate()?;
    let logger = DetectionLogger::new(&request.table, &request.column);
    logger.log_start(
        request.strategy,
        request.definite_threshold,
        request.maybe_threshold,
    );

    let mut tracker = ProgressTracker::new(on_progress);
    tracker.analyzing();

    let columns = engine
        .table_columns(&request.table)
        .await
        .with_context(|| format!("Failed to read columns of {}", request.table))?;
    if !columns.iter().any(|c| *c == request.column) {
        bail!(
            "Column '{}' not found in table '{}'",
            request.column,
            request.table
        );
    }

    logger.log_phase("Analyzing", Some("counting distinct values"));
    let value_counts = engine
        .value_counts(&request.table, &request.column)
        .await
        .with_context(|| format!("Failed to analyze {}.{}", request.table, request.column))?;

    // Dropped on every exit path below, including errors and cancellation.
    let key_table = KeyTable::build(request.strategy, &value_counts);
    let blocks = analyze_blocks(&value_counts, key_table.as_ref(), config);

    let mut result = DetectionResult {
        total_blocks: blocks.len(),
        oversized_blocks_count: count_oversized(&blocks),
        ..Default::default()
    };
    tracker.set_total_blocks(result.total_blocks);
    logger.log_blocks(
        value_counts.len(),
        result.total_blocks,
        result.oversized_blocks_count,
    );

    if cancel.is_cancelled() {
        result.cancelled = true;
        logger.log_cancelled(0, result.total_blocks);
        return Ok(result);
    }

    let mut rng = match config.sample_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut found: Vec<MatchPair> = Vec::new();

    for (index, block) in blocks.iter().enumerate() {
        tracker.block_started(index, &block.key);
        if cancel.is_cancelled() {
            result.cancelled = true;
            logger.log_cancelled(result.blocks_processed, result.total_blocks);
            break;
        }

        let loaded = if block.strategy == BlockStrategy::Sample {
            engine
                .sample_rows_with_values(
                    &request.table,
                    &request.column,
                    &block.values,
                    config.block_sample_size,
                    rng.gen(),
                )
                .await
        } else {
            engine
                .rows_with_values(&request.table, &request.column, &block.values)
                .await
        };
        let rows = match loaded
            .with_context(|| format!("Failed to load rows for block '{}'", block.key))
        {
            Ok(rows) => rows,
            Err(e) => {
                logger.log_block_failed(&block.key, &e);
                result.failed_blocks += 1;
                continue;
            }
        };

        let pairs = compare_block(
            rows,
            block,
            &request.column,
            &columns,
            request.maybe_threshold,
            config,
            &mut rng,
        );

        let mut definite = 0;
        let mut maybe = 0;
        for pair in &pairs {
            match classify(
                pair.similarity(),
                request.definite_threshold,
                request.maybe_threshold,
            ) {
                MatchZone::Definite => definite += 1,
                MatchZone::Maybe => maybe += 1,
                MatchZone::NotMatch => {}
            }
        }
        debug!(
            "Block '{}' ({} rows, {}) produced {} pairs",
            block.key,
            block.size,
            block.strategy,
            pairs.len()
        );

        tracker.record_pairs(pairs.len(), definite, maybe);
        result.definite_count += definite;
        result.maybe_count += maybe;
        result.blocks_processed += 1;
        found.extend(pairs);

        tokio::task::yield_now().await;
    }

    drop(key_table);
    tracker.complete();

    result.total_found = found.len();
    result.pairs = stratified_sort(found, config.max_total_pairs);
    if result.pairs.len() < result.total_found {
        info!(
            "[{}] Capped {} pairs to {}",
            logger.label(),
            result.total_found,
            result.pairs.len()
        );
    }
    logger.log_completion(&result);
    Ok(result)
}
