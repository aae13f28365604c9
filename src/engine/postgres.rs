// src/engine/postgres.rs - PostgreSQL-backed table engine
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info};

use crate::engine::{quote_ident, TableEngine};
use crate::matching::audit::{StoredAuditRecord, AUDIT_TABLE};
use crate::models::core::{Row, Scalar};
use crate::utils::db_connect::PgPool;

#[derive(Debug, Clone)]
struct ColumnDef {
    name: String,
    data_type: String,
}

/// Table engine over a bb8 pool of PostgreSQL connections.
///
/// Values are read as text and typed from the declared column type, so
/// `bigint` and `numeric` columns keep full precision as [`Scalar::BigInt`].
pub struct PgEngine {
    pool: PgPool,
    schema: String,
}

impl PgEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema: "public".to_string(),
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    /// Splits an optional `schema.` prefix off a table name.
    fn split_table<'a>(&'a self, table: &'a str) -> (&'a str, &'a str) {
        match table.split_once('.') {
            Some((schema, name)) => (schema, name),
            None => (self.schema.as_str(), table),
        }
    }

    fn qualified(&self, table: &str) -> String {
        let (schema, name) = self.split_table(table);
        format!("{}.{}", quote_ident(schema), quote_ident(name))
    }

    async fn catalog(&self, table: &str) -> Result<Vec<ColumnDef>> {
        let (schema, name) = self.split_table(table);
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for catalog query")?;
        let rows = conn
            .query(
                "SELECT column_name::text, data_type::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&schema, &name],
            )
            .await
            .with_context(|| format!("Failed to read catalog for table {}", table))?;
        if rows.is_empty() {
            bail!("Table '{}' not found", table);
        }
        Ok(rows
            .iter()
            .map(|row| ColumnDef {
                name: row.get(0),
                data_type: row.get(1),
            })
            .collect())
    }

    async fn checked_column(&self, table: &str, column: &str) -> Result<Vec<ColumnDef>> {
        let columns = self.catalog(table).await?;
        if !columns.iter().any(|c| c.name == column) {
            bail!("Column '{}' not found in table '{}'", column, table);
        }
        Ok(columns)
    }

    /// Rows of one block, optionally a seeded random subset of at most `limit`.
    async fn fetch_block_rows(
        &self,
        table: &str,
        column: &str,
        values: &[String],
        sample: Option<(usize, u64)>,
    ) -> Result<Vec<Row>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let columns = self.checked_column(table, column).await?;
        let select_list = columns
            .iter()
            .map(|c| format!("{}::text", quote_ident(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}::text = ANY($1)",
            select_list,
            self.qualified(table),
            quote_ident(column)
        );
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for block rows")?;

        let rows = match sample {
            None => conn.query(sql.as_str(), &[&values]).await,
            Some((limit, seed)) => {
                conn.execute("SELECT setseed($1)", &[&pg_seed(seed)])
                    .await
                    .context("Failed to seed block sampling")?;
                sql.push_str(" ORDER BY random() LIMIT $2");
                let limit = i64::try_from(limit).unwrap_or(i64::MAX);
                conn.query(sql.as_str(), &[&values, &limit]).await
            }
        }
        .with_context(|| format!("Failed to fetch block rows from {}", table))?;

        Ok(rows
            .iter()
            .map(|pg_row| {
                let mut row = Row::new();
                for (idx, def) in columns.iter().enumerate() {
                    let text: Option<String> = pg_row.get(idx);
                    row.set(def.name.clone(), scalar_from_text(&def.data_type, text));
                }
                row
            })
            .collect())
    }
}

/// Maps a sampling seed onto the [-1, 1] range `setseed` accepts.
fn pg_seed(seed: u64) -> f64 {
    (seed as f64 / u64::MAX as f64) * 2.0 - 1.0
}

/// Types a text-cast cell from its declared PostgreSQL type.
fn scalar_from_text(data_type: &str, text: Option<String>) -> Scalar {
    let Some(text) = text else {
        return Scalar::Null;
    };
    match data_type {
        "smallint" | "integer" => text
            .parse::<i64>()
            .map(Scalar::Int)
            .unwrap_or(Scalar::Text(text)),
        "bigint" | "numeric" | "decimal" => Scalar::BigInt(text),
        "real" | "double precision" => match text.parse::<f64>() {
            Ok(f) => Scalar::Float(f),
            Err(_) => Scalar::Text(text),
        },
        "boolean" => match text.as_str() {
            "true" | "t" => Scalar::Bool(true),
            "false" | "f" => Scalar::Bool(false),
            _ => Scalar::Text(text),
        },
        _ => Scalar::Text(text),
    }
}

#[async_trait]
impl TableEngine for PgEngine {
    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .catalog(table)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    async fn value_counts(&self, table: &str, column: &str) -> Result<Vec<(String, usize)>> {
        self.checked_column(table, column).await?;
        let col = quote_ident(column);
        let sql = format!(
            "SELECT {col}::text AS value, COUNT(*) AS n FROM {table}
             WHERE {col} IS NOT NULL AND btrim({col}::text) <> ''
             GROUP BY 1",
            col = col,
            table = self.qualified(table)
        );
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for value_counts")?;
        let rows = conn
            .query(sql.as_str(), &[])
            .await
            .with_context(|| format!("Failed to count values of {}.{}", table, column))?;
        Ok(rows
            .iter()
            .map(|row| {
                let value: String = row.get(0);
                let n: i64 = row.get(1);
                (value, n.max(0) as usize)
            })
            .collect())
    }

    async fn rows_with_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Vec<Row>> {
        self.fetch_block_rows(table, column, values, None).await
    }

    async fn sample_rows_with_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
        limit: usize,
        seed: u64,
    ) -> Result<Vec<Row>> {
        self.fetch_block_rows(table, column, values, Some((limit, seed)))
            .await
    }

    async fn delete_rows(&self, table: &str, key_column: &str, key: &Scalar) -> Result<u64> {
        self.checked_column(table, key_column).await?;
        let sql = format!(
            "DELETE FROM {} WHERE {}::text = $1",
            self.qualified(table),
            quote_ident(key_column)
        );
        let key_text = key.as_match_string();
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for delete")?;
        let deleted = conn
            .execute(sql.as_str(), &[&key_text])
            .await
            .with_context(|| format!("Failed to delete {} = {} from {}", key_column, key_text, table))?;
        debug!("Deleted {} rows from {} where {} = {}", deleted, table, key_column, key_text);
        Ok(deleted)
    }

    async fn ensure_audit_store(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                audit_entry_id TEXT NOT NULL,
                pair_index INTEGER NOT NULL,
                similarity INTEGER NOT NULL,
                match_column TEXT NOT NULL,
                kept_row_json TEXT NOT NULL,
                deleted_row_json TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS {index} ON {table} (audit_entry_id, pair_index);",
            table = self.qualified(AUDIT_TABLE),
            index = quote_ident(&format!("{}_entry_idx", AUDIT_TABLE)),
        );
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for audit store setup")?;
        conn.batch_execute(&sql)
            .await
            .context("Failed to create audit detail store")?;
        info!("Audit detail store {} is ready", AUDIT_TABLE);
        Ok(())
    }

    async fn append_audit_record(&self, record: &StoredAuditRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, audit_entry_id, pair_index, similarity, match_column,
                             kept_row_json, deleted_row_json, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.qualified(AUDIT_TABLE)
        );
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for audit insert")?;
        conn.execute(
            sql.as_str(),
            &[
                &record.id,
                &record.audit_entry_id,
                &record.pair_index,
                &record.similarity,
                &record.match_column,
                &record.kept_row_json,
                &record.deleted_row_json,
                &record.created_at,
            ],
        )
        .await
        .with_context(|| format!("Failed to insert audit record {}", record.id))?;
        Ok(())
    }

    async fn audit_records(&self, audit_entry_id: &str) -> Result<Vec<StoredAuditRecord>> {
        let sql = format!(
            "SELECT id, audit_entry_id, pair_index, similarity, match_column,
                    kept_row_json, deleted_row_json, created_at
             FROM {} WHERE audit_entry_id = $1 ORDER BY pair_index",
            self.qualified(AUDIT_TABLE)
        );
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for audit query")?;
        let rows = conn
            .query(sql.as_str(), &[&audit_entry_id])
            .await
            .with_context(|| format!("Failed to query audit records for {}", audit_entry_id))?;
        Ok(rows
            .iter()
            .map(|row| StoredAuditRecord {
                id: row.get("id"),
                audit_entry_id: row.get("audit_entry_id"),
                pair_index: row.get("pair_index"),
                similarity: row.get("similarity"),
                match_column: row.get("match_column"),
                kept_row_json: row.get("kept_row_json"),
                deleted_row_json: row.get("deleted_row_json"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_from_text_keeps_precision() {
        assert_eq!(scalar_from_text("integer", Some("42".into())), Scalar::Int(42));
        assert_eq!(
            scalar_from_text("numeric", Some("123456789012345678901234567890".into())),
            Scalar::BigInt("123456789012345678901234567890".into())
        );
        assert_eq!(scalar_from_text("boolean", Some("true".into())), Scalar::Bool(true));
        assert_eq!(scalar_from_text("double precision", Some("1.5".into())), Scalar::Float(1.5));
        assert_eq!(scalar_from_text("text", None), Scalar::Null);
        assert_eq!(scalar_from_text("text", Some("x".into())), Scalar::Text("x".into()));
    }

    #[test]
    fn test_sampling_seed_stays_in_setseed_range() {
        assert_eq!(pg_seed(0), -1.0);
        assert_eq!(pg_seed(u64::MAX), 1.0);
        let mid = pg_seed(u64::MAX / 2);
        assert!(mid.abs() < 1e-9);
    }
}
