// src/matching/merge.rs - Applies accepted merges and records the audit trail
use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::Serialize;
use std::time::Instant;

use crate::engine::{EngineGate, TableEngine};
use crate::matching::audit::AuditMergeRecord;
use crate::models::matching::{MatchPair, PairStatus};
use crate::utils::progress_bars::logging::{log_merge_completion, log_merge_start};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    /// Rows the engine reported as deleted.
    pub deleted: usize,
    /// Deletes that succeeded but found no row, e.g. on a repeated merge.
    pub skipped_missing: usize,
    pub failed_deletes: usize,
    pub audit_records_written: usize,
    pub audit_failures: usize,
}

/// Deletes the non-kept row of every merged pair in `pairs`.
///
/// With an `audit_entry_id`, each pair's audit record is written before its
/// delete. Audit write failures and failed deletes are logged and skipped.
/// Only a missing table or key column aborts the batch.
pub async fn merge_duplicates<E: TableEngine + ?Sized>(
    engine: &E,
    table: &str,
    pairs: &[MatchPair],
    match_column: &str,
    key_column: &str,
    audit_entry_id: Option<&str>,
) -> Result<MergeOutcome> {
    let start = Instant::now();
    let columns = engine
        .table_columns(table)
        .await
        .with_context(|| format!("Failed to read columns of {}", table))?;
    if !columns.iter().any(|c| c == key_column) {
        bail!("Key column '{}' not found in table '{}'", key_column, table);
    }

    let merged: Vec<(usize, &MatchPair)> = pairs
        .iter()
        .enumerate()
        .filter(|(_, pair)| pair.status == PairStatus::Merged)
        .collect();
    log_merge_start(table, merged.len(), audit_entry_id);

    let mut outcome = MergeOutcome::default();
    if merged.is_empty() {
        return Ok(outcome);
    }

    if audit_entry_id.is_some() {
        engine
            .ensure_audit_store()
            .await
            .context("Failed to prepare the audit detail store")?;
    }

    for (pair_index, pair) in merged {
        let kept = pair.kept_row();
        let removed = pair.removed_row();

        if let Some(entry_id) = audit_entry_id {
            let record = AuditMergeRecord {
                audit_entry_id: entry_id,
                pair_index,
                similarity: pair.similarity(),
                match_column,
                kept_row: kept,
                deleted_row: removed,
            };
            let written = match record.to_stored() {
                Ok(stored) => engine.append_audit_record(&stored).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => outcome.audit_records_written += 1,
                Err(e) => {
                    warn!("Audit record for pair {} ({}) not written: {:#}", pair_index, pair.id(), e);
                    outcome.audit_failures += 1;
                }
            }
        }

        let key = match removed.get(key_column) {
            Some(key) if !key.is_null() => key,
            _ => {
                warn!(
                    "Pair {} ({}) has no {} on the row to delete; skipping",
                    pair_index,
                    pair.id(),
                    key_column
                );
                outcome.failed_deletes += 1;
                continue;
            }
        };

        match engine.delete_rows(table, key_column, key).await {
            Ok(0) => {
                debug!("Row {} = {} already gone from {}", key_column, key, table);
                outcome.skipped_missing += 1;
            }
            Ok(n) => outcome.deleted += n as usize,
            Err(e) => {
                warn!("Failed to delete {} = {} from {}: {:#}", key_column, key, table, e);
                outcome.failed_deletes += 1;
            }
        }
    }

    log_merge_completion(
        table,
        outcome.deleted,
        outcome.failed_deletes,
        start.elapsed().as_secs_f64(),
    );
    Ok(outcome)
}

/// [`merge_duplicates`] holding the engine gate for the whole batch.
pub async fn merge_with_gate<E: TableEngine>(
    gate: &EngineGate<E>,
    table: &str,
    pairs: &[MatchPair],
    match_column: &str,
    key_column: &str,
    audit_entry_id: Option<&str>,
) -> Result<MergeOutcome> {
    let engine = gate.acquire().await;
    merge_duplicates(&*engine, table, pairs, match_column, key_column, audit_entry_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::matching::audit::load_audit_details;
    use crate::models::core::{Row, Scalar};

    fn person(id: i64, name: &str) -> Row {
        Row::from_cells(vec![("_row_id", Scalar::Int(id)), ("name", Scalar::from(name))])
    }

    fn engine_with(rows: Vec<Row>) -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.create_table("people", vec!["_row_id", "name"], rows).unwrap();
        engine
    }

    fn merged_pair(id: &str, a: Row, b: Row, similarity: f64) -> MatchPair {
        let mut pair = MatchPair::new(id.to_string(), a, b, similarity, Vec::new());
        pair.set_status(PairStatus::Merged);
        pair
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let engine = engine_with(vec![person(1, "Ann"), person(2, "Anne"), person(3, "Bob")]);
        let pairs = vec![merged_pair("p0", person(1, "Ann"), person(2, "Anne"), 94.2)];

        let first = merge_duplicates(&engine, "people", &pairs, "name", "_row_id", None)
            .await
            .unwrap();
        assert_eq!(first.deleted, 1);
        assert_eq!(engine.row_count("people").unwrap(), 2);

        let second = merge_duplicates(&engine, "people", &pairs, "name", "_row_id", None)
            .await
            .unwrap();
        assert_eq!(second.deleted, 0);
        assert_eq!(second.skipped_missing, 1);
        assert_eq!(second.failed_deletes, 0);
        assert!(!engine.has_audit_store().unwrap());
    }

    #[tokio::test]
    async fn test_only_merged_pairs_and_keep_side() {
        let engine = engine_with(vec![
            person(1, "Ann"),
            person(2, "Anne"),
            person(3, "Bob"),
            person(4, "Bobby"),
        ]);
        let mut keep_b = merged_pair("p0", person(1, "Ann"), person(2, "Anne"), 94.2);
        keep_b.toggle_keep_row();
        let mut pending = MatchPair::new("p1".to_string(), person(3, "Bob"), person(4, "Bobby"), 90.0, Vec::new());
        pending.set_status(PairStatus::KeptSeparate);

        let outcome = merge_duplicates(&engine, "people", &[keep_b, pending], "name", "_row_id", None)
            .await
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        let left = engine.value_counts("people", "name").await.unwrap();
        let names: Vec<&str> = left.iter().map(|(v, _)| v.as_str()).collect();
        assert_eq!(names, vec!["Anne", "Bob", "Bobby"]);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_stop_batch() {
        let engine = engine_with(vec![person(1, "Ann"), person(2, "Anne"), person(3, "Bob"), person(4, "Bobby")]);
        engine.fail_deletes_for_key("2").unwrap();
        let pairs = vec![
            merged_pair("p0", person(1, "Ann"), person(2, "Anne"), 94.2),
            merged_pair("p1", person(3, "Bob"), person(4, "Bobby"), 90.7),
            merged_pair("p2", person(3, "Bob"), Row::from_cells(vec![("name", "Bobb")]), 95.0),
        ];

        let outcome = merge_duplicates(&engine, "people", &pairs, "name", "_row_id", None)
            .await
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.failed_deletes, 2);
        assert_eq!(engine.row_count("people").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_audit_written_before_delete_and_read_back() {
        let engine = engine_with(vec![person(1, "Ann"), person(2, "Anne"), person(3, "Bob"), person(4, "Bobby")]);
        let pairs = vec![
            merged_pair("p0", person(3, "Bob"), person(4, "Bobby"), 90.7),
            MatchPair::new("p1".to_string(), person(1, "Ann"), person(3, "Bob"), 61.0, Vec::new()),
            merged_pair("p2", person(1, "Ann"), person(2, "Anne"), 94.2),
        ];
        engine.fail_deletes_for_key("2").unwrap();

        let outcome = merge_with_gate(
            &EngineGate::new(engine),
            "people",
            &pairs,
            "name",
            "_row_id",
            Some("entry-7"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.failed_deletes, 1);
        // The audit record precedes the delete attempt, so it survives the failure.
        assert_eq!(outcome.audit_records_written, 2);
        assert_eq!(outcome.audit_failures, 0);
    }

    #[tokio::test]
    async fn test_failed_audit_write_still_deletes() {
        let engine = engine_with(vec![person(1, "Ann"), person(2, "Anne"), person(3, "Bob"), person(4, "Bobby")]);
        engine.fail_audit_writes_for_pair(0).unwrap();
        let pairs = vec![
            merged_pair("p0", person(3, "Bob"), person(4, "Bobby"), 90.7),
            merged_pair("p1", person(1, "Ann"), person(2, "Anne"), 94.2),
        ];

        let outcome = merge_duplicates(&engine, "people", &pairs, "name", "_row_id", Some("entry-3"))
            .await
            .unwrap();
        assert_eq!(outcome.audit_failures, 1);
        assert_eq!(outcome.audit_records_written, 1);
        assert_eq!(outcome.deleted, 2);
        assert_eq!(engine.row_count("people").unwrap(), 2);

        let details = load_audit_details(&engine, "entry-3").await.unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].pair_index, 1);
    }

    #[tokio::test]
    async fn test_audit_details_ordered_by_pair_index() {
        let engine = engine_with(vec![person(1, "Ann"), person(2, "Anne"), person(3, "Bob"), person(4, "Bobby")]);
        let pairs = vec![
            merged_pair("p0", person(3, "Bob"), person(4, "Bobby"), 90.7),
            merged_pair("p1", person(1, "Ann"), person(2, "Anne"), 94.2),
        ];
        merge_duplicates(&engine, "people", &pairs, "name", "_row_id", Some("entry-9"))
            .await
            .unwrap();

        let details = load_audit_details(&engine, "entry-9").await.unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].pair_index, 0);
        assert_eq!(details[0].similarity, 91);
        assert_eq!(details[0].kept_row["name"], "Bob");
        assert_eq!(details[0].deleted_row["name"], "Bobby");
        assert_eq!(details[1].deleted_row["_row_id"], 2);
        assert!(load_audit_details(&engine, "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_column_aborts() {
        let engine = engine_with(vec![person(1, "Ann"), person(2, "Anne")]);
        let pairs = vec![merged_pair("p0", person(1, "Ann"), person(2, "Anne"), 94.2)];
        assert!(merge_duplicates(&engine, "people", &pairs, "name", "id", None).await.is_err());
        assert!(merge_duplicates(&engine, "ghosts", &pairs, "name", "_row_id", None).await.is_err());
        assert_eq!(engine.row_count("people").unwrap(), 2);
    }
}
