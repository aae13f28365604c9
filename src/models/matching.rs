// src/models/matching.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::core::Row;

/// Review status of a candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Pending,
    Merged,
    KeptSeparate,
}

/// Which side of a pair survives a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeepRow {
    A,
    B,
}

impl KeepRow {
    pub fn other(self) -> Self {
        match self {
            KeepRow::A => KeepRow::B,
            KeepRow::B => KeepRow::A,
        }
    }
}

/// Per-column comparison outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Exact,
    Similar,
    Different,
}

impl FieldStatus {
    pub const SIMILAR_FLOOR: f64 = 70.0;

    pub fn from_similarity(similarity: f64) -> Self {
        if similarity >= 100.0 {
            FieldStatus::Exact
        } else if similarity >= Self::SIMILAR_FLOOR {
            FieldStatus::Similar
        } else {
            FieldStatus::Different
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSimilarity {
    pub column: String,
    pub value_a: String,
    pub value_b: String,
    pub similarity: f64,
    pub status: FieldStatus,
}

/// A candidate duplicate.
///
/// `similarity` is derived from the match column when the pair is created and is
/// read-only afterwards; only `status` and `keep_row` change during review.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPair {
    id: String,
    row_a: Row,
    row_b: Row,
    similarity: f64,
    field_similarities: Vec<FieldSimilarity>,
    pub status: PairStatus,
    pub keep_row: KeepRow,
}

impl MatchPair {
    pub fn new(
        id: String,
        row_a: Row,
        row_b: Row,
        similarity: f64,
        field_similarities: Vec<FieldSimilarity>,
    ) -> Self {
        Self {
            id,
            row_a,
            row_b,
            similarity,
            field_similarities,
            status: PairStatus::Pending,
            keep_row: KeepRow::A,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn row_a(&self) -> &Row {
        &self.row_a
    }

    pub fn row_b(&self) -> &Row {
        &self.row_b
    }

    pub fn similarity(&self) -> f64 {
        self.similarity
    }

    pub fn field_similarities(&self) -> &[FieldSimilarity] {
        &self.field_similarities
    }

    pub fn set_status(&mut self, status: PairStatus) {
        self.status = status;
    }

    pub fn toggle_keep_row(&mut self) {
        self.keep_row = self.keep_row.other();
    }

    pub fn kept_row(&self) -> &Row {
        match self.keep_row {
            KeepRow::A => &self.row_a,
            KeepRow::B => &self.row_b,
        }
    }

    pub fn removed_row(&self) -> &Row {
        match self.keep_row {
            KeepRow::A => &self.row_b,
            KeepRow::B => &self.row_a,
        }
    }
}

/// Similarity zone of a pair relative to the caller's two thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchZone {
    Definite,
    Maybe,
    NotMatch,
}

/// How a block is compared, chosen from its row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStrategy {
    /// Every pair in the block is compared at the requested threshold.
    Full,
    /// Every pair is compared, but the acceptance threshold is raised.
    Strict,
    /// A bounded random subset is compared and the emitted pairs are capped.
    Sample,
}

impl fmt::Display for BlockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockStrategy::Full => "full",
            BlockStrategy::Strict => "strict",
            BlockStrategy::Sample => "sample",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockInfo {
    pub key: String,
    pub size: usize,
    pub strategy: BlockStrategy,
    /// Distinct match-column values that fall in this block.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPhase {
    Analyzing,
    Processing,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionProgress {
    pub phase: DetectionPhase,
    pub current_block: usize,
    pub total_blocks: usize,
    pub block_key: Option<String>,
    pub pairs_found: usize,
    pub definite_count: usize,
    pub maybe_count: usize,
}

impl DetectionProgress {
    pub fn analyzing() -> Self {
        Self {
            phase: DetectionPhase::Analyzing,
            current_block: 0,
            total_blocks: 0,
            block_key: None,
            pairs_found: 0,
            definite_count: 0,
            maybe_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub pairs: Vec<MatchPair>,
    /// Pairs accepted across all processed blocks, before the output cap.
    pub total_found: usize,
    pub oversized_blocks_count: usize,
    pub blocks_processed: usize,
    pub total_blocks: usize,
    pub definite_count: usize,
    pub maybe_count: usize,
    pub failed_blocks: usize,
    pub cancelled: bool,
}
