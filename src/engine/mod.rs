// src/engine/mod.rs - Query engine seam used by detection and merging
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::matching::audit::StoredAuditRecord;
use crate::models::core::{Row, Scalar};

pub mod memory;
pub mod postgres;

pub use memory::MemoryEngine;
pub use postgres::PgEngine;

/// The tabular query engine a detection run reads from and a merge writes to.
///
/// Every call is a potential suspension point. Callers serialize access through
/// an [`EngineGate`].
#[async_trait]
pub trait TableEngine: Send + Sync {
    /// Column names of `table` in catalog order. Unknown tables are an error.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Distinct stringified values of `column` with their row counts, skipping
    /// nulls and blank strings.
    async fn value_counts(&self, table: &str, column: &str) -> Result<Vec<(String, usize)>>;

    /// Full rows whose stringified `column` value is one of `values`.
    async fn rows_with_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Vec<Row>>;

    /// At most `limit` rows drawn at random from those [`rows_with_values`]
    /// would return. The same `seed` over the same data draws the same rows.
    ///
    /// [`rows_with_values`]: TableEngine::rows_with_values
    async fn sample_rows_with_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
        limit: usize,
        seed: u64,
    ) -> Result<Vec<Row>>;

    /// Deletes rows whose `key_column` equals `key`, returning how many went.
    async fn delete_rows(&self, table: &str, key_column: &str, key: &Scalar) -> Result<u64>;

    /// Creates the audit detail store if it does not exist yet.
    async fn ensure_audit_store(&self) -> Result<()>;

    async fn append_audit_record(&self, record: &StoredAuditRecord) -> Result<()>;

    /// Audit details of one audit entry, ordered by pair index.
    async fn audit_records(&self, audit_entry_id: &str) -> Result<Vec<StoredAuditRecord>>;
}

/// Single mutual-exclusion gate in front of an engine: one detection run,
/// merge or query holds it at a time, for the whole operation.
pub struct EngineGate<E> {
    engine: Arc<Mutex<E>>,
}

impl<E> Clone for EngineGate<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: TableEngine> EngineGate<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Waits for exclusive access to the engine.
    pub async fn acquire(&self) -> MutexGuard<'_, E> {
        self.engine.lock().await
    }

    /// Exclusive access if nothing else holds the gate right now.
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, E>> {
        self.engine.try_lock().ok()
    }
}

/// Double-quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
