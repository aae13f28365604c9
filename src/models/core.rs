// src/models/core.rs
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// A single engine-native cell value.
///
/// Arbitrary-precision integers (Postgres `numeric`, `bigint` columns and the like)
/// are carried as their decimal text in `BigInt` so that JSON emission never narrows them.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigInt(String),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Stringified form used for matching and blocking. Null becomes the empty string.
    pub fn as_match_string(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::BigInt(s) | Scalar::Text(s) => s.clone(),
        }
    }

    /// True for null and for values that stringify to whitespace only.
    pub fn is_blank(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::BigInt(s) | Scalar::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.as_match_string()),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Int(i) => serializer.serialize_i64(*i),
            Scalar::Float(f) => serializer.serialize_f64(*f),
            Scalar::BigInt(s) | Scalar::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Scalar::Null)
    }
}

/// A full row snapshot: column names in catalog order, each with its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Scalar)>,
}

impl Row {
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }

    pub fn from_cells<I, K, V>(cells: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Scalar>,
    {
        Self {
            cells: cells
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Sets a column's value, replacing it in place if the column already exists.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Scalar>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Stringified value of a column; missing columns and nulls read as "".
    pub fn text(&self, column: &str) -> String {
        self.get(column)
            .map(Scalar::as_match_string)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigint_serializes_as_string() {
        let row = Row::from_cells(vec![
            ("id", Scalar::BigInt("123456789012345678901234567890".to_string())),
            ("name", Scalar::Text("Ada".to_string())),
            ("score", Scalar::Null),
        ]);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(
            json,
            r#"{"id":"123456789012345678901234567890","name":"Ada","score":null}"#
        );
    }

    #[test]
    fn test_row_text_defaults() {
        let mut row = Row::new();
        row.set("a", 5i64);
        row.set("b", Scalar::Null);
        row.set("a", 7i64);
        assert_eq!(row.len(), 2);
        assert_eq!(row.text("a"), "7");
        assert_eq!(row.text("b"), "");
        assert_eq!(row.text("missing"), "");
        assert!(Scalar::Text("   ".to_string()).is_blank());
        assert!(!Scalar::Int(0).is_blank());
    }
}
