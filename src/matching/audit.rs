// src/matching/audit.rs - Append-only merge audit records
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::TableEngine;
use crate::models::core::Row;

pub const AUDIT_TABLE: &str = "dedupe_audit_details";

/// What was kept and what was removed for one accepted pair.
#[derive(Debug, Clone)]
pub struct AuditMergeRecord<'a> {
    pub audit_entry_id: &'a str,
    pub pair_index: usize,
    pub similarity: f64,
    pub match_column: &'a str,
    pub kept_row: &'a Row,
    pub deleted_row: &'a Row,
}

impl AuditMergeRecord<'_> {
    /// Serializes the row payloads into a storable record.
    pub fn to_stored(&self) -> Result<StoredAuditRecord> {
        Ok(StoredAuditRecord {
            id: Uuid::new_v4().to_string(),
            audit_entry_id: self.audit_entry_id.to_string(),
            pair_index: i32::try_from(self.pair_index)
                .context("Pair index does not fit the audit store")?,
            similarity: self.similarity.round() as i32,
            match_column: self.match_column.to_string(),
            kept_row_json: serialize_row_payload(self.kept_row)
                .context("Failed to serialize kept row")?,
            deleted_row_json: serialize_row_payload(self.deleted_row)
                .context("Failed to serialize deleted row")?,
            created_at: Utc::now(),
        })
    }
}

/// One persisted audit detail row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAuditRecord {
    pub id: String,
    pub audit_entry_id: String,
    pub pair_index: i32,
    pub similarity: i32,
    pub match_column: String,
    pub kept_row_json: String,
    pub deleted_row_json: String,
    pub created_at: DateTime<Utc>,
}

/// Drill-down view of a stored record with its payloads decoded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDetail {
    pub pair_index: i32,
    pub similarity: i32,
    pub match_column: String,
    pub kept_row: Value,
    pub deleted_row: Value,
    pub created_at: DateTime<Utc>,
}

pub fn serialize_row_payload(row: &Row) -> Result<String> {
    serde_json::to_string(row).context("Row payload is not JSON-serializable")
}

/// Decodes a stored row payload.
///
/// Payloads that were escaped twice are unescaped and parsed again; anything
/// still unreadable comes back as `{"_unparseable": true, "_raw": ...}`.
pub fn parse_row_payload(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(inner)) => {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&inner) {
                return value;
            }
        }
        Ok(value) => return value,
        Err(_) => {}
    }

    let unescaped = raw.trim().replace("\\\"", "\"").replace("''", "'");
    let unescaped = unescaped
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(&unescaped);
    if let Ok(value) = serde_json::from_str::<Value>(unescaped) {
        return value;
    }

    warn!("Audit payload could not be parsed; returning raw fallback");
    json!({ "_unparseable": true, "_raw": raw })
}

pub fn is_unparseable(payload: &Value) -> bool {
    payload
        .get("_unparseable")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Audit details for one audit entry, ordered by pair index.
pub async fn load_audit_details<E>(engine: &E, audit_entry_id: &str) -> Result<Vec<AuditDetail>>
where
    E: TableEngine + ?Sized,
{
    let mut records = engine
        .audit_records(audit_entry_id)
        .await
        .with_context(|| format!("Failed to load audit records for entry {}", audit_entry_id))?;
    records.sort_by_key(|r| r.pair_index);

    Ok(records
        .into_iter()
        .map(|record| AuditDetail {
            pair_index: record.pair_index,
            similarity: record.similarity,
            kept_row: parse_row_payload(&record.kept_row_json),
            deleted_row: parse_row_payload(&record.deleted_row_json),
            match_column: record.match_column,
            created_at: record.created_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::models::core::Scalar;

    #[test]
    fn test_stored_record_rounds_similarity() {
        let kept = Row::from_cells(vec![("_row_id", Scalar::Int(1)), ("name", "Ann".into())]);
        let deleted = Row::from_cells(vec![("_row_id", Scalar::Int(2)), ("name", "Anne".into())]);
        let record = AuditMergeRecord {
            audit_entry_id: "entry-1",
            pair_index: 3,
            similarity: 94.6,
            match_column: "name",
            kept_row: &kept,
            deleted_row: &deleted,
        };
        let stored = record.to_stored().unwrap();
        assert_eq!(stored.similarity, 95);
        assert_eq!(stored.pair_index, 3);
        assert_eq!(stored.kept_row_json, r#"{"_row_id":1,"name":"Ann"}"#);
        assert_eq!(parse_row_payload(&stored.deleted_row_json)["name"], "Anne");
    }

    #[test]
    fn test_parse_recovers_double_escaped_payloads() {
        let direct = parse_row_payload(r#"{"name":"O'Brien"}"#);
        assert_eq!(direct["name"], "O'Brien");

        let json_in_string = parse_row_payload(r#""{\"name\":\"Ann\"}""#);
        assert_eq!(json_in_string["name"], "Ann");

        let sql_escaped = parse_row_payload(r#"{\"name\":\"O''Brien\"}"#);
        assert_eq!(sql_escaped["name"], "O'Brien");
    }

    fn raw_record(pair_index: i32, kept: &str, deleted: &str) -> StoredAuditRecord {
        StoredAuditRecord {
            id: format!("raw-{}", pair_index),
            audit_entry_id: "legacy".to_string(),
            pair_index,
            similarity: 88,
            match_column: "name".to_string(),
            kept_row_json: kept.to_string(),
            deleted_row_json: deleted.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_load_recovers_stored_payloads() {
        let engine = MemoryEngine::new();
        engine
            .insert_raw_audit_record(raw_record(2, "{broken", r#"{"name":"Bo"}"#))
            .unwrap();
        engine
            .insert_raw_audit_record(raw_record(0, r#""{\"name\":\"Ann\"}""#, r#"{\"name\":\"O''Brien\"}"#))
            .unwrap();

        let details = load_audit_details(&engine, "legacy").await.unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].pair_index, 0);
        assert_eq!(details[0].kept_row["name"], "Ann");
        assert_eq!(details[0].deleted_row["name"], "O'Brien");

        assert!(is_unparseable(&details[1].kept_row));
        assert_eq!(details[1].kept_row["_raw"], "{broken");
        assert_eq!(details[1].deleted_row["name"], "Bo");
    }

    #[test]
    fn test_parse_falls_back_to_sentinel() {
        let payload = parse_row_payload("{not json at all");
        assert!(is_unparseable(&payload));
        assert_eq!(payload["_raw"], "{not json at all");
        assert!(!is_unparseable(&parse_row_payload("{}")));
    }
}
