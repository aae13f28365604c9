// src/engine/memory.rs - In-process table engine
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::engine::TableEngine;
use crate::matching::audit::StoredAuditRecord;
use crate::models::core::{Row, Scalar};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    audit_store: Option<Vec<StoredAuditRecord>>,
    failing_values: HashSet<String>,
    failing_keys: HashSet<String>,
    failing_audit_pairs: HashSet<i32>,
}

/// Table engine holding everything in memory.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Memory engine state was poisoned"))
    }

    /// Creates or replaces a table. Row cells outside `columns` are dropped and
    /// missing ones read as null.
    pub fn create_table<S: Into<String>>(
        &self,
        name: &str,
        columns: Vec<S>,
        rows: Vec<Row>,
    ) -> Result<()> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let rows = rows
            .into_iter()
            .map(|row| {
                let mut shaped = Row::new();
                for column in &columns {
                    shaped.set(column.clone(), row.get(column).cloned().unwrap_or(Scalar::Null));
                }
                shaped
            })
            .collect();
        self.state()?
            .tables
            .insert(name.to_string(), MemoryTable { columns, rows });
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let state = self.state()?;
        let table = state
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("Table '{}' not found", table))?;
        Ok(table.rows.len())
    }

    /// Makes every block query touching `value` fail.
    pub fn fail_queries_for_value(&self, value: &str) -> Result<()> {
        self.state()?.failing_values.insert(value.to_string());
        Ok(())
    }

    /// Makes deletes of the row with this key value fail.
    pub fn fail_deletes_for_key(&self, key: &str) -> Result<()> {
        self.state()?.failing_keys.insert(key.to_string());
        Ok(())
    }

    /// Makes audit writes for this pair index fail.
    pub fn fail_audit_writes_for_pair(&self, pair_index: i32) -> Result<()> {
        self.state()?.failing_audit_pairs.insert(pair_index);
        Ok(())
    }

    /// Appends a stored record bypassing serialization, creating the store if needed.
    pub fn insert_raw_audit_record(&self, record: StoredAuditRecord) -> Result<()> {
        self.state()?
            .audit_store
            .get_or_insert_with(Vec::new)
            .push(record);
        Ok(())
    }

    pub fn has_audit_store(&self) -> Result<bool> {
        Ok(self.state()?.audit_store.is_some())
    }
}

fn table_ref<'a>(state: &'a MemoryState, table: &str) -> Result<&'a MemoryTable> {
    state
        .tables
        .get(table)
        .ok_or_else(|| anyhow!("Table '{}' not found", table))
}

fn check_column(table: &MemoryTable, name: &str, column: &str) -> Result<()> {
    if !table.columns.iter().any(|c| c == column) {
        bail!("Column '{}' not found in table '{}'", column, name);
    }
    Ok(())
}

#[async_trait]
impl TableEngine for MemoryEngine {
    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let state = self.state()?;
        Ok(table_ref(&state, table)?.columns.clone())
    }

    async fn value_counts(&self, table: &str, column: &str) -> Result<Vec<(String, usize)>> {
        let state = self.state()?;
        let t = table_ref(&state, table)?;
        check_column(t, table, column)?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for row in &t.rows {
            match row.get(column) {
                Some(value) if !value.is_blank() => {
                    *counts.entry(value.as_match_string()).or_insert(0) += 1;
                }
                _ => {}
            }
        }
        Ok(counts.into_iter().collect())
    }

    async fn rows_with_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Vec<Row>> {
        let state = self.state()?;
        let t = table_ref(&state, table)?;
        check_column(t, table, column)?;

        if let Some(bad) = values.iter().find(|v| state.failing_values.contains(*v)) {
            bail!("Query failed for value '{}'", bad);
        }

        let wanted: HashSet<&str> = values.iter().map(String::as_str).collect();
        Ok(t.rows
            .iter()
            .filter(|row| {
                row.get(column)
                    .map(|v| !v.is_null() && wanted.contains(v.as_match_string().as_str()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn sample_rows_with_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
        limit: usize,
        seed: u64,
    ) -> Result<Vec<Row>> {
        let mut rows = self.rows_with_values(table, column, values).await?;
        if rows.len() > limit {
            let mut rng = StdRng::seed_from_u64(seed);
            let (sampled, _) = rows.partial_shuffle(&mut rng, limit);
            rows = sampled.to_vec();
        }
        Ok(rows)
    }

    async fn delete_rows(&self, table: &str, key_column: &str, key: &Scalar) -> Result<u64> {
        let mut state = self.state()?;
        let key_text = key.as_match_string();
        if state.failing_keys.contains(&key_text) {
            bail!("Delete failed for key '{}'", key_text);
        }
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("Table '{}' not found", table))?;
        if !t.columns.iter().any(|c| c == key_column) {
            bail!("Column '{}' not found in table '{}'", key_column, table);
        }

        let before = t.rows.len();
        t.rows.retain(|row| {
            row.get(key_column)
                .map(|v| v.is_null() || v.as_match_string() != key_text)
                .unwrap_or(true)
        });
        let deleted = (before - t.rows.len()) as u64;
        debug!("Deleted {} rows from {} where {} = {}", deleted, table, key_column, key_text);
        Ok(deleted)
    }

    async fn ensure_audit_store(&self) -> Result<()> {
        self.state()?.audit_store.get_or_insert_with(Vec::new);
        Ok(())
    }

    async fn append_audit_record(&self, record: &StoredAuditRecord) -> Result<()> {
        let mut state = self.state()?;
        if state.failing_audit_pairs.contains(&record.pair_index) {
            bail!("Audit write failed for pair {}", record.pair_index);
        }
        let store = state
            .audit_store
            .as_mut()
            .ok_or_else(|| anyhow!("Audit store has not been created"))?;
        store.push(record.clone());
        Ok(())
    }

    async fn audit_records(&self, audit_entry_id: &str) -> Result<Vec<StoredAuditRecord>> {
        let state = self.state()?;
        let mut records: Vec<StoredAuditRecord> = state
            .audit_store
            .as_ref()
            .map(|store| {
                store
                    .iter()
                    .filter(|r| r.audit_entry_id == audit_entry_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|r| r.pair_index);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .create_table(
                "people",
                vec!["_row_id", "name"],
                vec![
                    Row::from_cells(vec![("_row_id", Scalar::Int(1)), ("name", "Ann".into())]),
                    Row::from_cells(vec![("_row_id", Scalar::Int(2)), ("name", "Ann".into())]),
                    Row::from_cells(vec![("_row_id", Scalar::Int(3)), ("name", "  ".into())]),
                    Row::from_cells(vec![("_row_id", Scalar::Int(4))]),
                ],
            )
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_value_counts_skip_blank_values() {
        let engine = people();
        let counts = engine.value_counts("people", "name").await.unwrap();
        assert_eq!(counts, vec![("Ann".to_string(), 2)]);
        assert!(engine.value_counts("people", "nope").await.is_err());
        assert!(engine.table_columns("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let engine = people();
        let key = Scalar::Int(2);
        assert_eq!(engine.delete_rows("people", "_row_id", &key).await.unwrap(), 1);
        assert_eq!(engine.delete_rows("people", "_row_id", &key).await.unwrap(), 0);
        assert_eq!(engine.row_count("people").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_audit_store_is_lazy() {
        let engine = people();
        let record = StoredAuditRecord {
            id: "r1".to_string(),
            audit_entry_id: "e1".to_string(),
            pair_index: 0,
            similarity: 99,
            match_column: "name".to_string(),
            kept_row_json: "{}".to_string(),
            deleted_row_json: "{}".to_string(),
            created_at: chrono::Utc::now(),
        };
        assert!(!engine.has_audit_store().unwrap());
        assert!(engine.append_audit_record(&record).await.is_err());
        engine.ensure_audit_store().await.unwrap();
        engine.append_audit_record(&record).await.unwrap();
        assert_eq!(engine.audit_records("e1").await.unwrap().len(), 1);
        assert!(engine.audit_records("other").await.unwrap().is_empty());
    }
}
